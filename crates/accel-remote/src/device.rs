//! # Device-Control Binding
//!
//! Talks to a paravirtual accelerator driver through `ioctl` on a device
//! node. The node is opened on first use and kept open.
//!
//! | Request | Nr | Argument |
//! |---------|----|----------|
//! | `sess_create` | 1 | [`SessionCtl`], id written back |
//! | `sess_destroy` | 2 | [`SessionCtl`] |
//! | `gen_do_op` | 3 | [`GenOpCtl`] over the genop read/write arrays |
//! | `sess_update` | 4 | [`SessionCtl`] |
//!
//! All are `_IOWR('@', nr, argument)`.
//!
//! Resources cannot be mirrored through the device.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use accel_core::arg::{raw_args, RawArg};
use accel_core::{AccelError, Arg, Id, PluginFlags, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::protocol::WireFile;
use crate::transport::{ResourceSpec, Transport};

const IOC_MAGIC: u8 = b'@';

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionCtl {
    pub id: u32,
    pub flags: u32,
}

/// Generic operation: read segments go to the device, write segments come
/// back filled.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GenOpCtl {
    pub session_id: u32,
    pub read_nr: u32,
    pub read: *mut RawArg,
    pub write_nr: u32,
    pub write: *mut RawArg,
}

mod ioctl {
    use super::{GenOpCtl, SessionCtl, IOC_MAGIC};

    nix::ioctl_readwrite!(sess_create, IOC_MAGIC, 1, SessionCtl);
    nix::ioctl_readwrite!(sess_destroy, IOC_MAGIC, 2, SessionCtl);
    nix::ioctl_readwrite!(gen_do_op, IOC_MAGIC, 3, GenOpCtl);
    nix::ioctl_readwrite!(sess_update, IOC_MAGIC, 4, SessionCtl);
}

/// Device-control transport.
#[derive(Debug)]
pub struct DeviceTransport {
    path: PathBuf,
    device: Mutex<Option<Arc<File>>>,
}

impl DeviceTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            device: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    fn device(&self) -> Result<Arc<File>> {
        let mut slot = self.device.lock();
        if let Some(device) = slot.as_ref() {
            return Ok(Arc::clone(device));
        }
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map(Arc::new)
            .map_err(|e| AccelError::NoDevice(format!("{}: {}", self.path.display(), e)))?;
        info!("[Remote] Opened device {}", self.path.display());
        *slot = Some(Arc::clone(&device));
        Ok(device)
    }

    /// Run one control request against the open device.
    fn control<F>(&self, what: &str, request: F) -> Result<()>
    where
        F: FnOnce(RawFd) -> nix::Result<i32>,
    {
        let device = self.device()?;
        request(device.as_raw_fd()).map_err(|errno| {
            AccelError::ConnectionReset(format!("{}: {}: {}", self.path.display(), what, errno))
        })?;
        Ok(())
    }

    fn no_resources(&self) -> AccelError {
        AccelError::NotSupported(format!(
            "{}: resources cannot be forwarded over the device",
            self.path.display()
        ))
    }
}

fn segment_count(args: &[RawArg]) -> Result<u32> {
    u32::try_from(args.len())
        .map_err(|_| AccelError::InvalidArgument(format!("{} arguments is too many", args.len())))
}

impl Transport for DeviceTransport {
    fn name(&self) -> &str {
        "device"
    }

    fn session_create(&self, hint: PluginFlags) -> Result<Id> {
        let mut ctl = SessionCtl {
            id: 0,
            flags: hint.bits(),
        };
        // SAFETY: `ctl` is the struct the request was declared with.
        self.control("session create", |fd| unsafe { ioctl::sess_create(fd, &mut ctl) })?;
        debug!("[Remote] Device session {} created", ctl.id);
        Ok(ctl.id)
    }

    fn session_update(&self, session: Id, hint: PluginFlags) -> Result<()> {
        let mut ctl = SessionCtl {
            id: session,
            flags: hint.bits(),
        };
        // SAFETY: as above.
        self.control("session update", |fd| unsafe { ioctl::sess_update(fd, &mut ctl) })
    }

    fn session_destroy(&self, session: Id) -> Result<()> {
        let mut ctl = SessionCtl { id: session, flags: 0 };
        // SAFETY: as above.
        self.control("session destroy", |fd| unsafe { ioctl::sess_destroy(fd, &mut ctl) })
    }

    fn resource_create(&self, _spec: &ResourceSpec) -> Result<Id> {
        Err(self.no_resources())
    }

    fn resource_destroy(&self, _resource: Id) -> Result<()> {
        Err(self.no_resources())
    }

    fn resource_register(&self, _resource: Id, _session: Id) -> Result<()> {
        Err(self.no_resources())
    }

    fn resource_unregister(&self, _resource: Id, _session: Id) -> Result<()> {
        Err(self.no_resources())
    }

    fn resource_sync(&self, _resource: Id) -> Result<Vec<WireFile>> {
        Err(self.no_resources())
    }

    fn do_op(&self, session: Id, read: &mut [Arg], write: &mut [Arg]) -> Result<()> {
        let mut raw_read = raw_args(read)?;
        let mut raw_write = raw_args(write)?;
        let mut ctl = GenOpCtl {
            session_id: session,
            read_nr: segment_count(&raw_read)?,
            read: raw_read.as_mut_ptr(),
            write_nr: segment_count(&raw_write)?,
            write: raw_write.as_mut_ptr(),
        };
        // SAFETY: the segment arrays borrow `read` and `write`, which
        // outlive the call.
        self.control("genop", |fd| unsafe { ioctl::gen_do_op(fd, &mut ctl) })
    }
}
