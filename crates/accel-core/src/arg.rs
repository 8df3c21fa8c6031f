//! Generic argument envelope.
//!
//! Every operation can be expressed as an ordered `read` sequence (inputs,
//! operation type first) and an ordered `write` sequence (pre-sized outputs).
//! [`Arg`] owns its bytes; [`RawArg`] is the `#[repr(C)]` view handed to
//! native code and device drivers.
//!
//! ```text
//! read:  [ {4, RAW, &op_type} | {len, sub, &in_1} | ... ]
//! write: [ {len, sub, &out_1} | ... ]
//! ```

use std::ffi::c_void;

use crate::domain::OpType;
use crate::error::{AccelError, Result};

/// Well-known `sub_type` tags. Callers may use any other value for their own
/// disambiguation.
pub mod kind {
    pub const RAW: u32 = 0;
    pub const INT32: u32 = 5;
    pub const INT64: u32 = 7;
    pub const UINT32: u32 = 13;
    pub const UINT64: u32 = 15;
    pub const FLOAT32: u32 = 17;
    pub const FLOAT64: u32 = 19;
    pub const STRING: u32 = 27;
    pub const BUFFER: u32 = 28;
    pub const CUSTOM: u32 = 29;
}

/// One argument of a generic operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Arg {
    data: Vec<u8>,
    sub_type: u32,
}

impl Arg {
    pub fn new(data: Vec<u8>, sub_type: u32) -> Self {
        Self { data, sub_type }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec(), kind::BUFFER)
    }

    /// Native-endian `u32`.
    pub fn from_u32(value: u32) -> Self {
        Self::new(value.to_ne_bytes().to_vec(), kind::UINT32)
    }

    pub fn from_i32(value: i32) -> Self {
        Self::new(value.to_ne_bytes().to_vec(), kind::INT32)
    }

    pub fn from_u64(value: u64) -> Self {
        Self::new(value.to_ne_bytes().to_vec(), kind::UINT64)
    }

    /// NUL-terminated string, readable as a C string by native callees.
    pub fn from_text(value: &str) -> Self {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        Self::new(data, kind::STRING)
    }

    /// Zeroed output buffer of `len` bytes.
    pub fn output(len: usize) -> Self {
        Self::new(vec![0; len], kind::RAW)
    }

    /// The `read[0]` operation tag.
    pub fn op_type(op: OpType) -> Self {
        Self::new(op.as_u32().to_ne_bytes().to_vec(), kind::RAW)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sub_type(&self) -> u32 {
        self.sub_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Overwrite the contents, keeping the buffer size.
    pub fn fill_from(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.data.len() {
            return Err(AccelError::InvalidArgument(format!(
                "output expects {} bytes, got {}",
                self.data.len(),
                bytes.len()
            )));
        }
        self.data.copy_from_slice(bytes);
        Ok(())
    }

    pub fn as_u32(&self) -> Result<u32> {
        let bytes: [u8; 4] = self.data.as_slice().try_into().map_err(|_| {
            AccelError::InvalidArgument(format!("expected 4-byte integer, got {} bytes", self.len()))
        })?;
        Ok(u32::from_ne_bytes(bytes))
    }

    pub fn as_i32(&self) -> Result<i32> {
        self.as_u32().map(|v| v as i32)
    }

    pub fn as_u64(&self) -> Result<u64> {
        let bytes: [u8; 8] = self.data.as_slice().try_into().map_err(|_| {
            AccelError::InvalidArgument(format!("expected 8-byte integer, got {} bytes", self.len()))
        })?;
        Ok(u64::from_ne_bytes(bytes))
    }

    /// UTF-8 contents up to the first NUL.
    pub fn as_str(&self) -> Result<&str> {
        let end = self
            .data
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.data.len());
        std::str::from_utf8(&self.data[..end])
            .map_err(|e| AccelError::InvalidArgument(format!("argument is not UTF-8: {e}")))
    }

    /// FFI view borrowing this argument's buffer.
    pub fn raw(&mut self) -> Result<RawArg> {
        let size = u32::try_from(self.data.len()).map_err(|_| {
            AccelError::InvalidArgument(format!("argument of {} bytes too large", self.len()))
        })?;
        Ok(RawArg {
            size,
            sub_type: self.sub_type,
            buf: self.data.as_mut_ptr() as *mut c_void,
        })
    }

    /// Copy an argument out of its FFI view.
    ///
    /// # Safety
    ///
    /// `raw.buf` must be valid for reads of `raw.size` bytes, or null with a
    /// zero size.
    pub unsafe fn from_raw(raw: &RawArg) -> Self {
        let data = if raw.buf.is_null() || raw.size == 0 {
            Vec::new()
        } else {
            // SAFETY: upheld by the caller.
            unsafe { std::slice::from_raw_parts(raw.buf as *const u8, raw.size as usize) }.to_vec()
        };
        Self::new(data, raw.sub_type)
    }
}

/// `#[repr(C)]` argument descriptor: `{ size, sub_type, pointer }`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawArg {
    pub size: u32,
    pub sub_type: u32,
    pub buf: *mut c_void,
}

/// Build FFI views over a slice of arguments. The views borrow the
/// arguments' buffers and must not outlive them.
pub fn raw_args(args: &mut [Arg]) -> Result<Vec<RawArg>> {
    args.iter_mut().map(Arg::raw).collect()
}

/// Builder for argument sequences with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgList {
    args: Vec<Arg>,
}

impl ArgList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            args: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, arg: Arg) -> &mut Self {
        self.args.push(arg);
        self
    }

    /// Plain bytes with a caller-chosen tag.
    pub fn push_serial(&mut self, bytes: &[u8], sub_type: u32) -> &mut Self {
        self.push(Arg::new(bytes.to_vec(), sub_type))
    }

    /// A value the caller encodes itself, tagged `CUSTOM`.
    pub fn push_encoded<T, F>(&mut self, value: &T, encode: F) -> &mut Self
    where
        F: FnOnce(&T) -> Vec<u8>,
    {
        self.push(Arg::new(encode(value), kind::CUSTOM))
    }

    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.push(Arg::from_u32(value))
    }

    pub fn push_i32(&mut self, value: i32) -> &mut Self {
        self.push(Arg::from_i32(value))
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.push(Arg::from_text(value))
    }

    pub fn push_output(&mut self, len: usize) -> &mut Self {
        self.push(Arg::output(len))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Arg> {
        self.args
            .get(index)
            .ok_or_else(|| AccelError::InvalidArgument(format!("no argument at index {index}")))
    }

    /// Argument at `index`, checked for the expected tag.
    pub fn expect(&self, index: usize, sub_type: u32) -> Result<&Arg> {
        let arg = self.get(index)?;
        if arg.sub_type() != sub_type {
            return Err(AccelError::InvalidArgument(format!(
                "argument {index} has type {}, expected {sub_type}",
                arg.sub_type()
            )));
        }
        Ok(arg)
    }

    pub fn extract_u32(&self, index: usize) -> Result<u32> {
        self.expect(index, kind::UINT32)?.as_u32()
    }

    pub fn extract_i32(&self, index: usize) -> Result<i32> {
        self.expect(index, kind::INT32)?.as_i32()
    }

    pub fn extract_str(&self, index: usize) -> Result<&str> {
        self.expect(index, kind::STRING)?.as_str()
    }

    /// Decode a `CUSTOM` argument with the caller's decoder.
    pub fn extract_decoded<T, F>(&self, index: usize, decode: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        decode(self.expect(index, kind::CUSTOM)?.as_bytes())
    }

    pub fn as_slice(&self) -> &[Arg] {
        &self.args
    }

    pub fn as_mut_slice(&mut self) -> &mut [Arg] {
        &mut self.args
    }

    pub fn into_vec(self) -> Vec<Arg> {
        self.args
    }
}

impl From<Vec<Arg>> for ArgList {
    fn from(args: Vec<Arg>) -> Self {
        Self { args }
    }
}
