//! Remote plugin configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Which binding the plugin forwards through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    Device,
    #[default]
    Socket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub transport: TransportKind,

    /// Device-control node.
    pub device: PathBuf,

    /// `unix://path`, `tcp://host:port` or `vsock://cid:port`.
    pub address: String,

    /// Read/write timeout of socket calls.
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            device: PathBuf::from("/dev/accel"),
            address: "vsock://2:2048".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RemoteConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ACCEL_REMOTE_TRANSPORT`: `socket` or `device` (default: socket)
    /// - `ACCEL_REMOTE_DEVICE`: device node (default: /dev/accel)
    /// - `ACCEL_REMOTE_ADDRESS`: agent address (default: vsock://2:2048)
    /// - `ACCEL_REMOTE_TIMEOUT_MS`: socket timeout (default: 30000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let transport = match lookup("ACCEL_REMOTE_TRANSPORT").as_deref().map(str::trim) {
            None => defaults.transport,
            Some("socket") => TransportKind::Socket,
            Some("device") => TransportKind::Device,
            Some(other) => {
                warn!("[Remote] Unknown transport {:?}, using socket", other);
                defaults.transport
            }
        };

        let device = lookup("ACCEL_REMOTE_DEVICE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.device);

        let address = lookup("ACCEL_REMOTE_ADDRESS")
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.address);

        let timeout = lookup("ACCEL_REMOTE_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout);

        Self {
            transport,
            device,
            address,
            timeout,
        }
    }
}
