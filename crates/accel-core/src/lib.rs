//! # Accel Core
//!
//! Process-local hardware-acceleration runtime. Applications open sessions,
//! register resources (code units, data, models) with them and invoke
//! operations; the runtime routes each call to a plugin implementing it.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): plain values, no runtime state
//!   - `OpType`, `ResourceType`, `PluginFlags`, `Version`
//!   - `IdPool`: bounded id allocator
//!
//! - **Plugin Layer** (`plugin/`): registry, operation table, library loader
//!   - `Plugin` / `SessionHooks`: the traits a backend implements
//!   - `PluginRegistry`: linking, version gate, hint-based selection
//!
//! - **Lifecycle Layer**: `session`, `resource`, `registration`
//!   - many-to-many links between sessions and resources, with refcounts
//!
//! - **Dispatch Layer** (`ops/`): typed entry points and the generic
//!   operation (`genop`) envelope
//!
//! - **Runtime** (`runtime`): owns all of the above plus the run directory
//!
//! ## Invariants
//!
//! - A resource is never destroyed while a session references it.
//! - A session id is returned to its pool exactly once.
//! - An operation is only reachable while its plugin is linked.
//!
//! ## Usage Example
//!
//! ```ignore
//! use accel_core::{Arg, PluginFlags};
//!
//! let rt = accel_core::bootstrap()?;
//! let sess = rt.sessions().init(PluginFlags::NONE)?;
//!
//! let mut read = vec![Arg::from_i32(15)];
//! let mut write = vec![Arg::output(4)];
//! rt.exec(&sess, "/usr/lib/libmytestlib.so", "mytestfunc", &mut read, &mut write)?;
//!
//! rt.sessions().release(&sess)?;
//! accel_core::shutdown()?;
//! ```
//!
//! ## Environment
//!
//! See [`config::RuntimeConfig::from_env`] for the variables read at startup.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod arg;
pub mod backends;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ops;
pub mod plugin;
pub mod prof;
pub mod registration;
pub mod resource;
pub mod runtime;
pub mod session;

use std::sync::{Arc, OnceLock};

pub use arg::{Arg, ArgList, RawArg};
pub use config::{LogLevel, RuntimeConfig};
pub use domain::{Id, OpType, PluginFlags, ResourceType, Version};
pub use error::{AccelError, Result};
pub use ops::OpImpl;
pub use plugin::{
    Operation, Plugin, PluginContext, PluginEntry, PluginInfo, PluginRegistry, SessionHooks,
};
pub use registration::{Registration, RegistrationTable};
pub use resource::{BufferFile, Persistence, Resource, ResourceFile, ResourceManager};
pub use runtime::Runtime;
pub use session::{Session, SessionManager};

/// Version plugins are checked against.
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();

/// Process-wide runtime, configured from the environment on first use.
pub fn runtime() -> Arc<Runtime> {
    GLOBAL
        .get_or_init(|| Arc::new(Runtime::new(RuntimeConfig::from_env())))
        .clone()
}

/// Install logging and bootstrap the process-wide runtime.
pub fn bootstrap() -> Result<Arc<Runtime>> {
    let rt = runtime();
    logging::init(rt.config())?;
    rt.bootstrap()?;
    Ok(rt)
}

/// Shut the process-wide runtime down, if it was ever created.
pub fn shutdown() -> Result<()> {
    match GLOBAL.get() {
        Some(rt) => rt.shutdown(),
        None => Ok(()),
    }
}
