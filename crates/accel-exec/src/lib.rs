//! # Accel Exec
//!
//! Plugin running user-supplied functions from shared objects.
//!
//! | Operation | Code comes from |
//! |-----------|-----------------|
//! | `noop` | (logs only) |
//! | `exec` | a library path |
//! | `exec-with-resource` | a Lib resource: its dependencies, then its files |
//!
//! Units are kept mapped between calls unless `ACCEL_EXEC_DLCLOSE_ENABLED`
//! is set. Code loaded here runs in-process with full privileges.
//!
//! Build with the `dynamic` feature to export the plugin entry point and load
//! the resulting library through `ACCEL_PLUGINS`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod loader;
pub mod plugin;

pub use config::{DlopenMode, ExecConfig};
pub use loader::{CodeLoader, CodeUnit, ExecEntry, NativeLoader, UnitSource, Visibility};
pub use plugin::ExecPlugin;

#[cfg(feature = "dynamic")]
accel_core::declare_plugin!(ExecPlugin::from_env());
