//! # Accel Test Suite
//!
//! Cross-crate tests driving a full [`accel_core::Runtime`] with the bundled
//! plugins.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── genop_roundtrip.rs  # typed calls vs. the generic envelope
//!     ├── concurrency.rs      # link/unlink races on shared sessions/resources
//!     ├── exec_e2e.rs         # exec plugin through the runtime
//!     ├── native_exec.rs      # exec over dlopen, with C fixtures from build.rs
//!     └── remote_e2e.rs       # remote plugin ⇄ agent over a unix socket
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p accel-tests
//! cargo test -p accel-tests integration::remote_e2e
//!
//! # Benchmarks
//! cargo bench -p accel-tests
//! ```

pub mod integration;
