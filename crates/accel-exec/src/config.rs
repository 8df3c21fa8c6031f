//! Exec plugin configuration.

use std::env;

use accel_core::config::parse_bool;
use tracing::warn;

/// When symbols of a loaded unit are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DlopenMode {
    /// Resolve everything at load time.
    #[default]
    Now,
    /// Resolve functions on first call.
    Lazy,
}

impl DlopenMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "now" => Some(DlopenMode::Now),
            "lazy" => Some(DlopenMode::Lazy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecConfig {
    pub dlopen_mode: DlopenMode,

    /// Close units after each call instead of keeping them mapped.
    pub dlclose_enabled: bool,
}

impl ExecConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ACCEL_EXEC_DLOPEN_MODE`: `now` or `lazy` (default: now)
    /// - `ACCEL_EXEC_DLCLOSE_ENABLED`: unload after every call (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let dlopen_mode = match lookup("ACCEL_EXEC_DLOPEN_MODE") {
            Some(value) => DlopenMode::parse(&value).unwrap_or_else(|| {
                warn!("[Exec] Unknown dlopen mode {:?}, using now", value);
                defaults.dlopen_mode
            }),
            None => defaults.dlopen_mode,
        };

        let dlclose_enabled = lookup("ACCEL_EXEC_DLCLOSE_ENABLED")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.dlclose_enabled);

        Self {
            dlopen_mode,
            dlclose_enabled,
        }
    }
}
