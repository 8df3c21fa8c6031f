//! Runtime configuration from environment variables.

use std::env;
use std::path::PathBuf;

use tracing::warn;

/// Log verbosity as the integer levels the runtime has always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    /// Clamp an integer into the valid range.
    pub fn from_int(level: i64) -> Self {
        match level {
            i64::MIN..=1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    pub fn as_tracing(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

/// Configuration consumed once at bootstrap.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Plugin libraries to load, in order.
    pub plugins: Vec<PathBuf>,

    pub log_level: LogLevel,

    /// Append logs here instead of stderr.
    pub log_file: Option<PathBuf>,

    pub profiling_enabled: bool,

    /// Accept plugins built for any runtime version.
    pub version_ignore: bool,

    /// Parent of the per-boot run directory.
    pub rundir_base: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            log_level: LogLevel::Error,
            log_file: None,
            profiling_enabled: false,
            version_ignore: false,
            rundir_base: env::temp_dir().join("accel"),
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ACCEL_PLUGINS`: `:`-separated plugin library paths (default: none).
    ///   `ACCEL_BACKENDS` is accepted with a deprecation warning.
    /// - `ACCEL_LOG_LEVEL`: 1 error, 2 warn, 3 info, 4 debug (default: 1)
    /// - `ACCEL_LOG_FILE`: log file path (default: stderr)
    /// - `ACCEL_PROFILING_ENABLED`: collect profiling regions (default: false)
    /// - `ACCEL_VERSION_IGNORE`: skip the plugin version gate (default: false).
    ///   `ACCEL_IGNORE_VERSION` is accepted with a deprecation warning.
    /// - `ACCEL_RUNDIR`: run directory parent (default: `$TMPDIR/accel`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let plugins = lookup_with_alias(&lookup, "ACCEL_PLUGINS", "ACCEL_BACKENDS")
            .map(|list| parse_plugin_list(&list))
            .unwrap_or(defaults.plugins);

        let log_level = lookup("ACCEL_LOG_LEVEL")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(LogLevel::from_int)
            .unwrap_or(defaults.log_level);

        let log_file = lookup("ACCEL_LOG_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let profiling_enabled = lookup("ACCEL_PROFILING_ENABLED")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.profiling_enabled);

        let version_ignore =
            lookup_with_alias(&lookup, "ACCEL_VERSION_IGNORE", "ACCEL_IGNORE_VERSION")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.version_ignore);

        let rundir_base = lookup("ACCEL_RUNDIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.rundir_base);

        Self {
            plugins,
            log_level,
            log_file,
            profiling_enabled,
            version_ignore,
            rundir_base,
        }
    }
}

fn lookup_with_alias<F>(lookup: &F, key: &str, deprecated: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        return Some(value);
    }
    let value = lookup(deprecated)?;
    warn!("[Config] {} is deprecated, use {}", deprecated, key);
    Some(value)
}

/// Split a `:`-separated path list, dropping empty entries.
pub fn parse_plugin_list(list: &str) -> Vec<PathBuf> {
    list.split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Parse a boolean environment value.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> RuntimeConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]);
        assert!(config.plugins.is_empty());
        assert_eq!(config.log_level, LogLevel::Error);
        assert!(config.log_file.is_none());
        assert!(!config.profiling_enabled);
        assert!(!config.version_ignore);
    }

    #[test]
    fn test_plugin_list() {
        let config = config_from(&[("ACCEL_PLUGINS", "/a/libone.so::/b/libtwo.so:")]);
        assert_eq!(
            config.plugins,
            vec![PathBuf::from("/a/libone.so"), PathBuf::from("/b/libtwo.so")]
        );
    }

    #[test]
    fn test_deprecated_aliases() {
        let config = config_from(&[
            ("ACCEL_BACKENDS", "/old/lib.so"),
            ("ACCEL_IGNORE_VERSION", "1"),
        ]);
        assert_eq!(config.plugins, vec![PathBuf::from("/old/lib.so")]);
        assert!(config.version_ignore);

        let config = config_from(&[
            ("ACCEL_PLUGINS", "/new/lib.so"),
            ("ACCEL_BACKENDS", "/old/lib.so"),
        ]);
        assert_eq!(config.plugins, vec![PathBuf::from("/new/lib.so")]);
    }

    #[test]
    fn test_levels_and_flags() {
        let config = config_from(&[
            ("ACCEL_LOG_LEVEL", "3"),
            ("ACCEL_PROFILING_ENABLED", "yes"),
            ("ACCEL_LOG_FILE", "/tmp/accel.log"),
        ]);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.profiling_enabled);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/accel.log")));

        assert_eq!(LogLevel::from_int(0), LogLevel::Error);
        assert_eq!(LogLevel::from_int(9), LogLevel::Debug);
        assert_eq!(config_from(&[("ACCEL_LOG_LEVEL", "junk")]).log_level, LogLevel::Error);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
