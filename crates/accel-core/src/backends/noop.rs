//! Debug plugin implementing `noop` by logging the call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::domain::{OpType, PluginFlags};
use crate::error::Result;
use crate::ops::OpImpl;
use crate::plugin::{Plugin, PluginContext, PluginInfo};

/// Answers `noop` and counts how often it did.
#[derive(Debug, Default)]
pub struct NoopPlugin {
    calls: Arc<AtomicUsize>,
}

impl NoopPlugin {
    pub const NAME: &'static str = "noop";

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Plugin for NoopPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(Self::NAME, crate::RUNTIME_VERSION, PluginFlags::DEBUG)
    }

    fn init(&self, ctx: &PluginContext<'_>) -> Result<()> {
        let calls = self.calls.clone();
        ctx.register_op(
            OpType::Noop,
            OpImpl::noop(move |session| {
                calls.fetch_add(1, Ordering::Relaxed);
                info!("[noop] Calling no-op for session {}", session.id());
                Ok(())
            }),
        )
    }

    fn fini(&self) -> Result<()> {
        Ok(())
    }
}
