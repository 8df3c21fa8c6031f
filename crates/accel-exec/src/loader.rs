//! # Code Loading
//!
//! A [`CodeLoader`] opens code units and a [`CodeUnit`] calls symbols in
//! them. [`NativeLoader`] is the production loader, backed by the platform
//! dynamic linker through `libloading`; tests substitute in-process units.
//!
//! ## Entry point ABI
//!
//! ```text
//! int fn(RawArg *read, size_t nr_read, RawArg *write, size_t nr_write)
//! ```
//!
//! A non-zero return is reported as [`AccelError::ExecFormat`].

use std::ffi::c_int;
use std::path::{Path, PathBuf};

use accel_core::arg::{raw_args, RawArg};
use accel_core::{AccelError, Arg, Result};
use tracing::debug;

use crate::config::DlopenMode;

/// Signature every exec symbol must have.
pub type ExecEntry = unsafe extern "C" fn(*mut RawArg, usize, *mut RawArg, usize) -> c_int;

/// Symbol visibility for later loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Symbols serve only this unit.
    Local,
    /// Symbols resolve references of units loaded afterwards.
    Global,
}

/// Where a unit's code comes from.
#[derive(Debug, Clone, Copy)]
pub enum UnitSource<'a> {
    Path(&'a Path),
    Memory { name: &'a str, bytes: &'a [u8] },
}

impl UnitSource<'_> {
    pub fn describe(&self) -> String {
        match self {
            UnitSource::Path(path) => path.display().to_string(),
            UnitSource::Memory { name, bytes } => format!("{} ({} bytes in memory)", name, bytes.len()),
        }
    }
}

/// An opened code unit. Dropping it unloads the code.
pub trait CodeUnit: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve `symbol` and run it over the argument arrays.
    fn call(&self, symbol: &str, read: &mut [Arg], write: &mut [Arg]) -> Result<()>;
}

/// Opens code units.
pub trait CodeLoader: Send + Sync {
    fn open(&self, source: UnitSource<'_>, visibility: Visibility) -> Result<Box<dyn CodeUnit>>;
}

/// Loader over the platform dynamic linker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLoader {
    mode: DlopenMode,
}

impl NativeLoader {
    pub fn new(mode: DlopenMode) -> Self {
        Self { mode }
    }
}

#[cfg(unix)]
mod native {
    use std::fs::File;

    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};

    use super::*;

    pub(super) struct NativeUnit {
        name: String,
        library: Library,
        // Closed after `library`.
        _backing: Option<File>,
    }

    impl CodeUnit for NativeUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn call(&self, symbol: &str, read: &mut [Arg], write: &mut [Arg]) -> Result<()> {
            // SAFETY: exec symbols are required to have the `ExecEntry` type.
            let entry = unsafe { self.library.get::<ExecEntry>(symbol.as_bytes()) }.map_err(|e| {
                AccelError::InvalidArgument(format!("{}: symbol {}: {}", self.name, symbol, e))
            })?;

            let mut raw_read = raw_args(read)?;
            let mut raw_write = raw_args(write)?;
            debug!(
                "[Exec] Calling {}:{} ({} in, {} out)",
                self.name,
                symbol,
                raw_read.len(),
                raw_write.len()
            );
            // SAFETY: the descriptors point into `read` and `write`, which are
            // borrowed for the whole call.
            let ret = unsafe {
                entry(
                    raw_read.as_mut_ptr(),
                    raw_read.len(),
                    raw_write.as_mut_ptr(),
                    raw_write.len(),
                )
            };
            if ret != 0 {
                return Err(AccelError::ExecFormat(format!(
                    "{}:{} returned {}",
                    self.name, symbol, ret
                )));
            }
            Ok(())
        }
    }

    pub(super) fn open(
        mode: DlopenMode,
        source: UnitSource<'_>,
        visibility: Visibility,
    ) -> Result<Box<dyn CodeUnit>> {
        let flags = match mode {
            DlopenMode::Now => RTLD_NOW,
            DlopenMode::Lazy => RTLD_LAZY,
        } | match visibility {
            Visibility::Local => RTLD_LOCAL,
            Visibility::Global => RTLD_GLOBAL,
        };

        let (name, path, backing) = match source {
            UnitSource::Path(path) => (path.display().to_string(), path.to_path_buf(), None),
            UnitSource::Memory { name, bytes } => {
                let (file, path) = super::memfd::materialize(name, bytes)?;
                (name.to_string(), path, Some(file))
            }
        };

        // SAFETY: loading runs the unit's initializers; exec code is trusted.
        let library = unsafe { Library::open(Some(&path), flags) }.map_err(|e| {
            AccelError::InvalidArgument(format!("could not load {}: {}", name, e))
        })?;
        debug!("[Exec] Loaded {} ({:?}, {:?})", name, mode, visibility);

        Ok(Box::new(NativeUnit {
            name,
            library,
            _backing: backing,
        }))
    }
}

#[cfg(target_os = "linux")]
mod memfd {
    use std::ffi::CString;
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

    use super::*;

    /// Copy `bytes` into an anonymous memory file, addressable by path for
    /// as long as the returned file stays open.
    pub(super) fn materialize(name: &str, bytes: &[u8]) -> Result<(File, PathBuf)> {
        let cname = CString::new(name)
            .map_err(|_| AccelError::InvalidArgument(format!("unit name {name:?} contains NUL")))?;
        let fd = memfd_create(cname.as_c_str(), MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(std::io::Error::from)?;
        let mut file = File::from(fd);
        file.write_all(bytes)?;
        let path = PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd()));
        Ok((file, path))
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod memfd {
    use std::fs::File;

    use super::*;

    pub(super) fn materialize(name: &str, _bytes: &[u8]) -> Result<(File, PathBuf)> {
        Err(AccelError::NotSupported(format!(
            "{name}: loading code from memory needs memfd"
        )))
    }
}

impl CodeLoader for NativeLoader {
    #[cfg(unix)]
    fn open(&self, source: UnitSource<'_>, visibility: Visibility) -> Result<Box<dyn CodeUnit>> {
        native::open(self.mode, source, visibility)
    }

    #[cfg(not(unix))]
    fn open(&self, source: UnitSource<'_>, _visibility: Visibility) -> Result<Box<dyn CodeUnit>> {
        Err(AccelError::NotSupported(format!(
            "{}: native code loading is unix-only",
            source.describe()
        )))
    }
}
