//! # Plugins
//!
//! A plugin implements one or more operations and may take over session and
//! resource lifecycle through [`SessionHooks`]. Plugins are either
//! registered in-process ([`PluginRegistry::register`]) or loaded from a
//! shared library exporting the entry point generated by
//! [`declare_plugin!`](crate::declare_plugin).
//!
//! ## Lifecycle
//!
//! ```text
//! register ──► version gate ──► link ──► init(ctx) ──► ops reachable
//!                                           │
//!                                           └─ error: ops removed, unlinked
//!
//! unregister ──► ops removed ──► unlink ──► fini()
//! ```

pub mod loader;
pub mod registry;

pub use registry::{select_by_hint, Operation, PluginEntry, PluginRegistry};

use std::sync::Arc;

use crate::domain::{OpType, PluginFlags};
use crate::error::Result;
use crate::ops::OpImpl;
use crate::resource::Resource;
use crate::session::Session;

/// Symbol every loadable plugin library exports.
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"accel_plugin_entry";

/// Signature of [`PLUGIN_ENTRY_SYMBOL`]. Rust ABI: the library must be built
/// against the same `accel-core` with the same toolchain.
pub type PluginEntryFn = fn() -> Box<dyn Plugin>;

/// Static description of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    /// Runtime version the plugin was built against.
    pub runtime_version: String,
    pub flags: PluginFlags,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, flags: PluginFlags) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            runtime_version: crate::RUNTIME_VERSION.to_string(),
            flags,
        }
    }
}

/// A backend implementation.
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    /// Called once after linking. Register operations through `ctx`.
    fn init(&self, ctx: &PluginContext<'_>) -> Result<()>;

    /// Called once after the plugin's operations are removed.
    fn fini(&self) -> Result<()>;

    /// Session and resource lifecycle overrides.
    fn session_hooks(&self) -> Option<&dyn SessionHooks> {
        None
    }
}

/// Lifecycle overrides for plugins that back sessions themselves.
pub trait SessionHooks: Send + Sync {
    /// May set the session's remote id and private data.
    fn session_init(&self, session: &Session, hint: PluginFlags) -> Result<()>;

    fn session_release(&self, session: &Session) -> Result<()>;

    fn session_update(&self, session: &Session, hint: PluginFlags) -> Result<()>;

    fn resource_register(&self, resource: &Resource, session: &Session) -> Result<()>;

    fn resource_unregister(&self, resource: &Resource, session: &Session) -> Result<()>;

    /// Refresh a buffer resource's contents from the backing peer.
    fn resource_sync(&self, resource: &Resource, _session: &Session) -> Result<()> {
        resource.sync()
    }
}

/// Handle given to [`Plugin::init`] for attaching operations.
pub struct PluginContext<'a> {
    registry: &'a PluginRegistry,
    owner: &'a Arc<PluginEntry>,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(registry: &'a PluginRegistry, owner: &'a Arc<PluginEntry>) -> Self {
        Self { registry, owner }
    }

    pub fn owner(&self) -> &Arc<PluginEntry> {
        self.owner
    }

    pub fn register_op(&self, op_type: OpType, imp: OpImpl) -> Result<()> {
        self.registry.register_op(self.owner, op_type, imp)
    }

    /// Register by raw type number, as a foreign descriptor would.
    pub fn register_op_raw(&self, op_type: u32, imp: OpImpl) -> Result<()> {
        self.registry
            .register_op(self.owner, OpType::try_from(op_type)?, imp)
    }

    pub fn register_ops(&self, ops: Vec<(OpType, OpImpl)>) -> Result<()> {
        self.registry.register_ops(self.owner, ops)
    }
}

/// Export a plugin constructor under [`PLUGIN_ENTRY_SYMBOL`].
///
/// ```rust,ignore
/// accel_core::declare_plugin!(MyPlugin::default());
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:expr) => {
        #[no_mangle]
        pub fn accel_plugin_entry() -> ::std::boxed::Box<dyn $crate::plugin::Plugin> {
            ::std::boxed::Box::new($constructor)
        }
    };
}
