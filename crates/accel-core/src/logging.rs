//! Log subscriber setup.
//!
//! The runtime only emits `tracing` events. Installing a subscriber is left to
//! the embedding application, or done here from [`RuntimeConfig`] when the
//! process-wide [`crate::bootstrap`] is used.

use std::fs::OpenOptions;

use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;
use crate::error::Result;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides the configured level. Does nothing if a global
/// subscriber is already set.
pub fn init(config: &RuntimeConfig) -> Result<()> {
    let level = LevelFilter::from_level(config.log_level.as_tracing());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_err() {
        debug!("[Logging] Global subscriber already installed, keeping it");
    }
    Ok(())
}
