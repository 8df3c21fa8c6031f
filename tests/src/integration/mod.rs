//! Integration tests and the fixtures they share.

pub mod concurrency;
pub mod exec_e2e;
pub mod genop_roundtrip;
pub mod native_exec;
pub mod remote_e2e;

use std::path::Path;
use std::sync::Arc;

use accel_core::{Runtime, RuntimeConfig};

/// Bootstrapped runtime whose run directory lives under `base`.
pub fn runtime_in(base: &Path) -> Arc<Runtime> {
    let config = RuntimeConfig {
        rundir_base: base.join("run"),
        ..RuntimeConfig::default()
    };
    let rt = Arc::new(Runtime::new(config));
    if let Err(e) = rt.bootstrap() {
        panic!("runtime bootstrap failed: {e}");
    }
    rt
}
