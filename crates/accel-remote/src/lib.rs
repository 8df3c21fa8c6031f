//! # Accel Remote
//!
//! Remote plugin for the accel runtime: sessions hinted `REMOTE` are backed
//! by a session on a peer runtime, resources are mirrored there and every
//! operation is forwarded.
//!
//! ## Bindings
//!
//! | Binding | Module | Peer |
//! |---------|--------|------|
//! | Device control | `device` | paravirtual driver behind `/dev/accel` |
//! | Socket | `socket` | an [`Agent`] over unix, tcp or vsock |
//!
//! The [`Agent`] side runs in the peer process against its own
//! [`accel_core::Runtime`].
//!
//! ## Loading
//!
//! Built with the `dynamic` feature, the `cdylib` exports the plugin entry
//! point and is configured through `ACCEL_REMOTE_*` variables (see
//! [`RemoteConfig::from_env`]).

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod agent;
pub mod config;
pub mod device;
pub mod plugin;
pub mod protocol;
pub mod socket;
pub mod transport;

pub use agent::{Agent, AgentServer};
pub use config::{RemoteConfig, TransportKind};
pub use device::DeviceTransport;
pub use plugin::RemotePlugin;
pub use protocol::{Request, Response, WireArg, WireFile};
pub use socket::{Address, SocketTransport};
pub use transport::{ResourceSpec, Transport};

#[cfg(feature = "dynamic")]
accel_core::declare_plugin!(RemotePlugin::<Box<dyn Transport>>::from_env());
