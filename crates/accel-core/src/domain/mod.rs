//! Domain layer: plain value types with no runtime state.

pub mod flags;
pub mod id_pool;
pub mod op_type;
pub mod version;

pub use flags::PluginFlags;
pub use id_pool::{Id, IdPool};
pub use op_type::OpType;
pub use version::{check_compatible, Version};

/// Resource type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ResourceType {
    /// Loadable code unit.
    Lib = 0,
    /// Opaque data blob.
    Data,
    /// Model files.
    Model,
}

impl ResourceType {
    pub const COUNT: usize = 3;

    pub const ALL: [ResourceType; ResourceType::COUNT] =
        [ResourceType::Lib, ResourceType::Data, ResourceType::Model];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceType::Lib => "lib",
            ResourceType::Data => "data",
            ResourceType::Model => "model",
        }
    }
}

impl TryFrom<u32> for ResourceType {
    type Error = crate::error::AccelError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        ResourceType::ALL.get(value as usize).copied().ok_or_else(|| {
            crate::error::AccelError::InvalidArgument(format!("unknown resource type {value}"))
        })
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
