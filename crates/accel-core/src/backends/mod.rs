//! Built-in plugins.

pub mod noop;

pub use noop::NoopPlugin;
