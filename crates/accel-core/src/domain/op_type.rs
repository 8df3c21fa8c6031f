//! Operation types known to the dispatcher.

use std::fmt;

use crate::error::AccelError;

/// Operation type tag. The numeric value is what travels as `read[0]` of a
/// generic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum OpType {
    Noop = 0,
    Exec,
    ExecWithResource,
    ImageClassify,
    ImageDetect,
    ImageSegment,
    ImagePose,
    ImageDepth,
    TfModelLoad,
    TfModelUnload,
    TfModelRun,
    TfliteModelLoad,
    TfliteModelUnload,
    TfliteModelRun,
    TorchModelLoad,
    TorchModelRun,
    TorchSgemm,
    BlasSgemm,
    FpgaArrayCopy,
    FpgaMmult,
    FpgaParallel,
    FpgaVectorAdd,
    MinMax,
    Opencv,
}

impl OpType {
    /// Number of operation types.
    pub const COUNT: usize = 24;

    pub const ALL: [OpType; OpType::COUNT] = [
        OpType::Noop,
        OpType::Exec,
        OpType::ExecWithResource,
        OpType::ImageClassify,
        OpType::ImageDetect,
        OpType::ImageSegment,
        OpType::ImagePose,
        OpType::ImageDepth,
        OpType::TfModelLoad,
        OpType::TfModelUnload,
        OpType::TfModelRun,
        OpType::TfliteModelLoad,
        OpType::TfliteModelUnload,
        OpType::TfliteModelRun,
        OpType::TorchModelLoad,
        OpType::TorchModelRun,
        OpType::TorchSgemm,
        OpType::BlasSgemm,
        OpType::FpgaArrayCopy,
        OpType::FpgaMmult,
        OpType::FpgaParallel,
        OpType::FpgaVectorAdd,
        OpType::MinMax,
        OpType::Opencv,
    ];

    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            OpType::Noop => "noop",
            OpType::Exec => "exec",
            OpType::ExecWithResource => "exec-with-resource",
            OpType::ImageClassify => "image-classify",
            OpType::ImageDetect => "image-detect",
            OpType::ImageSegment => "image-segment",
            OpType::ImagePose => "image-pose",
            OpType::ImageDepth => "image-depth",
            OpType::TfModelLoad => "tf-model-load",
            OpType::TfModelUnload => "tf-model-unload",
            OpType::TfModelRun => "tf-model-run",
            OpType::TfliteModelLoad => "tflite-model-load",
            OpType::TfliteModelUnload => "tflite-model-unload",
            OpType::TfliteModelRun => "tflite-model-run",
            OpType::TorchModelLoad => "torch-model-load",
            OpType::TorchModelRun => "torch-model-run",
            OpType::TorchSgemm => "torch-sgemm",
            OpType::BlasSgemm => "blas-sgemm",
            OpType::FpgaArrayCopy => "fpga-array-copy",
            OpType::FpgaMmult => "fpga-mmult",
            OpType::FpgaParallel => "fpga-parallel",
            OpType::FpgaVectorAdd => "fpga-vector-add",
            OpType::MinMax => "minmax",
            OpType::Opencv => "opencv",
        }
    }
}

impl TryFrom<u32> for OpType {
    type Error = AccelError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        OpType::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| AccelError::InvalidArgument(format!("unknown operation type {value}")))
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
