//! # Wire Protocol
//!
//! Every call is one request frame followed by one response frame on a fresh
//! connection.
//!
//! ```text
//! ┌────────────────┬──────────────────────────────┐
//! │ len: u32 (LE)  │ bincode(Request | Response)  │
//! └────────────────┴──────────────────────────────┘
//! ```
//!
//! | Request | Success response |
//! |---------|------------------|
//! | `SessionCreate` | `Id` |
//! | `SessionUpdate`, `SessionDestroy` | `Ok` |
//! | `ResourceCreate` | `Id` |
//! | `ResourceDestroy`, `ResourceRegister`, `ResourceUnregister` | `Ok` |
//! | `ResourceSync` | `Files` |
//! | `Genop`, `Exec` | `Args` (the write arguments) |
//!
//! Any request may instead get `Error { code, message }`, `code` being an
//! [`AccelError::code`] value.

use std::io::{self, Read, Write};

use accel_core::{AccelError, Arg, Id};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frames above this size are rejected unread.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireArg {
    pub data: Vec<u8>,
    pub sub_type: u32,
}

impl From<&Arg> for WireArg {
    fn from(arg: &Arg) -> Self {
        Self {
            data: arg.as_bytes().to_vec(),
            sub_type: arg.sub_type(),
        }
    }
}

impl From<WireArg> for Arg {
    fn from(arg: WireArg) -> Self {
        Arg::new(arg.data, arg.sub_type)
    }
}

pub fn to_wire(args: &[Arg]) -> Vec<WireArg> {
    args.iter().map(WireArg::from).collect()
}

pub fn from_wire(args: Vec<WireArg>) -> Vec<Arg> {
    args.into_iter().map(Arg::from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFile {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    SessionCreate { flags: u32 },
    SessionUpdate { session: Id, flags: u32 },
    SessionDestroy { session: Id },
    ResourceCreate { rtype: u32, files: Vec<WireFile>, deps: Vec<Id> },
    ResourceDestroy { resource: Id },
    ResourceRegister { resource: Id, session: Id },
    ResourceUnregister { resource: Id, session: Id },
    ResourceSync { resource: Id },
    Genop { session: Id, read: Vec<WireArg>, write: Vec<WireArg> },
    Exec {
        session: Id,
        library: String,
        symbol: String,
        read: Vec<WireArg>,
        write: Vec<WireArg>,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::SessionCreate { .. } => "session-create",
            Request::SessionUpdate { .. } => "session-update",
            Request::SessionDestroy { .. } => "session-destroy",
            Request::ResourceCreate { .. } => "resource-create",
            Request::ResourceDestroy { .. } => "resource-destroy",
            Request::ResourceRegister { .. } => "resource-register",
            Request::ResourceUnregister { .. } => "resource-unregister",
            Request::ResourceSync { .. } => "resource-sync",
            Request::Genop { .. } => "genop",
            Request::Exec { .. } => "exec",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Id(Id),
    Files(Vec<WireFile>),
    Args(Vec<WireArg>),
    Error { code: i32, message: String },
}

impl Response {
    pub fn from_error(err: &AccelError) -> Self {
        Response::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("undecodable frame: {0}")]
    Decode(#[from] bincode::Error),
}

impl From<FrameError> for AccelError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => AccelError::ConnectionReset(e.to_string()),
            FrameError::TooLarge(_) | FrameError::Decode(_) => AccelError::Protocol(err.to_string()),
        }
    }
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), FrameError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

/// Map a peer's error code back to a local error.
pub fn remote_error(code: i32, message: &str) -> AccelError {
    AccelError::from_code(code)
        .unwrap_or_else(|| AccelError::Protocol(format!("peer reported failure without a code: {message}")))
}
