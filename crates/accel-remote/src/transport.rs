//! Transport seam between the remote plugin and its peer.

use accel_core::ops::genop;
use accel_core::{AccelError, Arg, Id, PluginFlags, ResourceType, Result};

use crate::protocol::WireFile;

/// What the peer needs to recreate a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub rtype: ResourceType,
    pub files: Vec<WireFile>,
    /// Peer ids of already mirrored dependencies.
    pub deps: Vec<Id>,
}

/// Calls into a peer runtime. All ids are the peer's.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn session_create(&self, hint: PluginFlags) -> Result<Id>;

    fn session_update(&self, session: Id, hint: PluginFlags) -> Result<()>;

    fn session_destroy(&self, session: Id) -> Result<()>;

    fn resource_create(&self, spec: &ResourceSpec) -> Result<Id>;

    fn resource_destroy(&self, resource: Id) -> Result<()>;

    fn resource_register(&self, resource: Id, session: Id) -> Result<()>;

    fn resource_unregister(&self, resource: Id, session: Id) -> Result<()>;

    /// Current contents of a buffer resource's files.
    fn resource_sync(&self, resource: Id) -> Result<Vec<WireFile>>;

    /// Generic operation. `read[0]` is the operation type; outputs are
    /// written back into `write`.
    fn do_op(&self, session: Id, read: &mut [Arg], write: &mut [Arg]) -> Result<()>;

    fn exec(
        &self,
        session: Id,
        library: &str,
        symbol: &str,
        read: &[Arg],
        write: &mut [Arg],
    ) -> Result<()> {
        let mut packed = genop::pack_exec(library, symbol, read);
        self.do_op(session, &mut packed, write)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn session_create(&self, hint: PluginFlags) -> Result<Id> {
        (**self).session_create(hint)
    }

    fn session_update(&self, session: Id, hint: PluginFlags) -> Result<()> {
        (**self).session_update(session, hint)
    }

    fn session_destroy(&self, session: Id) -> Result<()> {
        (**self).session_destroy(session)
    }

    fn resource_create(&self, spec: &ResourceSpec) -> Result<Id> {
        (**self).resource_create(spec)
    }

    fn resource_destroy(&self, resource: Id) -> Result<()> {
        (**self).resource_destroy(resource)
    }

    fn resource_register(&self, resource: Id, session: Id) -> Result<()> {
        (**self).resource_register(resource, session)
    }

    fn resource_unregister(&self, resource: Id, session: Id) -> Result<()> {
        (**self).resource_unregister(resource, session)
    }

    fn resource_sync(&self, resource: Id) -> Result<Vec<WireFile>> {
        (**self).resource_sync(resource)
    }

    fn do_op(&self, session: Id, read: &mut [Arg], write: &mut [Arg]) -> Result<()> {
        (**self).do_op(session, read, write)
    }

    fn exec(
        &self,
        session: Id,
        library: &str,
        symbol: &str,
        read: &[Arg],
        write: &mut [Arg],
    ) -> Result<()> {
        (**self).exec(session, library, symbol, read, write)
    }
}

/// Copy returned outputs into the caller's write arguments.
pub(crate) fn write_back(write: &mut [Arg], outputs: Vec<Arg>) -> Result<()> {
    if outputs.len() != write.len() {
        return Err(AccelError::Protocol(format!(
            "peer returned {} outputs, expected {}",
            outputs.len(),
            write.len()
        )));
    }
    for (slot, out) in write.iter_mut().zip(outputs) {
        *slot = out;
    }
    Ok(())
}
