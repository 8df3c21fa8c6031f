//! # Error Types
//!
//! Every fallible call in the runtime returns [`AccelError`]. Each variant maps
//! onto a standard OS error number through [`AccelError::code`], so callers (and
//! the remote wire protocol) can switch on a stable integer instead of on
//! plugin-private codes.
//!
//! | Tier | Variants |
//! |------|----------|
//! | Local validation | `InvalidArgument`, `NameTooLong` |
//! | State preconditions | `BackendNotReady`, `AlreadyExists`, `NotFound`, `Busy`, `PermissionDenied`, `NotSupported`, `TooManyUsers` |
//! | Transport / plugin | `ExecFormat`, `ConnectionReset`, `Protocol`, `LibBad`, `NoDevice`, `Io`, `Remote` |

use thiserror::Error;

/// Runtime result alias.
pub type Result<T> = std::result::Result<T, AccelError>;

/// Errors surfaced by the runtime and its plugins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccelError {
    /// Null, zero, out-of-range or type-mismatched argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory")]
    OutOfMemory,

    /// No implementation or capability for the request.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation in progress")]
    InProgress,

    /// Target is still referenced.
    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A shared object loaded but is not a usable plugin.
    #[error("Bad shared library: {0}")]
    LibBad(String),

    #[error("No such device: {0}")]
    NoDevice(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// Remote peer or transport failure.
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// Backend answered with something the runtime cannot interpret.
    #[error("Backend protocol error: {0}")]
    Protocol(String),

    /// User code ran and returned a non-zero status.
    #[error("Exec format error: {0}")]
    ExecFormat(String),

    #[error("Name too long: {0}")]
    NameTooLong(String),

    /// An id pool is exhausted.
    #[error("Too many users: {0}")]
    TooManyUsers(String),

    #[error("Operation not permitted: {0}")]
    PermissionDenied(String),

    /// Subsystem not bootstrapped yet.
    #[error("Backend not ready: {0}")]
    BackendNotReady(String),

    /// Remote peer returned a code with no local counterpart.
    #[error("Remote I/O error: code {0}")]
    Remote(i32),
}

impl AccelError {
    /// OS error number for this error.
    pub fn code(&self) -> i32 {
        match self {
            AccelError::InvalidArgument(_) => libc::EINVAL,
            AccelError::OutOfMemory => libc::ENOMEM,
            AccelError::NotSupported(_) => libc::ENOTSUP,
            AccelError::InProgress => libc::EINPROGRESS,
            AccelError::Busy(_) => libc::EBUSY,
            AccelError::AlreadyExists(_) => libc::EEXIST,
            AccelError::NotFound(_) => libc::ENOENT,
            AccelError::LibBad(_) => libc::ELIBBAD,
            AccelError::NoDevice(_) => libc::ENODEV,
            AccelError::Io(_) => libc::EIO,
            AccelError::ConnectionReset(_) => libc::ECONNRESET,
            AccelError::Protocol(_) | AccelError::BackendNotReady(_) => libc::EPROTO,
            AccelError::ExecFormat(_) => libc::ENOEXEC,
            AccelError::NameTooLong(_) => libc::ENAMETOOLONG,
            AccelError::TooManyUsers(_) => libc::EUSERS,
            AccelError::PermissionDenied(_) => libc::EPERM,
            AccelError::Remote(code) => *code,
        }
    }

    /// Rebuild an error from an OS error number. `0` is success and yields `None`.
    pub fn from_code(code: i32) -> Option<AccelError> {
        let origin = || "reported by peer".to_string();
        let err = match code {
            0 => return None,
            libc::EINVAL => AccelError::InvalidArgument(origin()),
            libc::ENOMEM => AccelError::OutOfMemory,
            libc::ENOTSUP => AccelError::NotSupported(origin()),
            libc::EINPROGRESS => AccelError::InProgress,
            libc::EBUSY => AccelError::Busy(origin()),
            libc::EEXIST => AccelError::AlreadyExists(origin()),
            libc::ENOENT => AccelError::NotFound(origin()),
            libc::ELIBBAD => AccelError::LibBad(origin()),
            libc::ENODEV => AccelError::NoDevice(origin()),
            libc::EIO => AccelError::Io(origin()),
            libc::ECONNRESET => AccelError::ConnectionReset(origin()),
            libc::EPROTO => AccelError::Protocol(origin()),
            libc::ENOEXEC => AccelError::ExecFormat(origin()),
            libc::ENAMETOOLONG => AccelError::NameTooLong(origin()),
            libc::EUSERS => AccelError::TooManyUsers(origin()),
            libc::EPERM => AccelError::PermissionDenied(origin()),
            other => AccelError::Remote(other),
        };
        Some(err)
    }

    /// Convert a plain status code into a result.
    pub fn check(code: i32) -> Result<()> {
        match AccelError::from_code(code) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl From<std::io::Error> for AccelError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => AccelError::NotFound(err.to_string()),
            ErrorKind::AlreadyExists => AccelError::AlreadyExists(err.to_string()),
            ErrorKind::PermissionDenied => AccelError::PermissionDenied(err.to_string()),
            ErrorKind::OutOfMemory => AccelError::OutOfMemory,
            _ => AccelError::Io(err.to_string()),
        }
    }
}
