//! # Remote Plugin
//!
//! Backs `REMOTE`-hinted sessions with a session on a peer runtime and
//! forwards every operation to it through a [`Transport`].
//!
//! ## Resource Mirroring
//!
//! A local resource gets a peer mirror on its first registration with a
//! remote session. Dependencies are mirrored first so the peer can rebuild
//! the aggregate. The mirror is destroyed when the last remote registration
//! goes away.
//!
//! ```text
//! register(res, sess) ──► mirror deps ──► create mirror ──► register on peer
//!                     (count per local resource, shared by all sessions)
//! ```

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use accel_core::ops::genop;
use accel_core::{
    AccelError, Id, OpImpl, OpType, Plugin, PluginContext, PluginFlags, PluginInfo, Resource,
    Result, Session, SessionHooks,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{RemoteConfig, TransportKind};
use crate::device::DeviceTransport;
use crate::protocol::WireFile;
use crate::socket::SocketTransport;
use crate::transport::{ResourceSpec, Transport};

/// A peer copy and the remote registrations holding it.
struct Mirror {
    resource: Resource,
    count: usize,
}

/// Keyed by [`Resource::identity`]; ids are recycled once destroyed.
type Mirrors = HashMap<usize, Mirror>;

pub struct RemotePlugin<T: Transport> {
    transport: Arc<T>,
    mirrors: Mutex<Mirrors>,
}

impl<T: Transport + 'static> RemotePlugin<T> {
    pub const NAME: &'static str = "remote";

    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            mirrors: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn acquire(&self, mirrors: &mut Mirrors, resource: &Resource) -> Result<()> {
        let key = resource.identity();
        if let Some(mirror) = mirrors.get_mut(&key) {
            mirror.count += 1;
            return Ok(());
        }

        let deps = resource.deps();
        for (done, dep) in deps.iter().enumerate() {
            if let Err(e) = self.acquire(mirrors, dep) {
                for mirrored in deps[..done].iter().rev() {
                    self.log_release(mirrors, mirrored);
                }
                return Err(e);
            }
        }

        let created =
            mirror_spec(resource, &deps).and_then(|spec| self.transport.resource_create(&spec));
        let remote = match created {
            Ok(remote) => remote,
            Err(e) => {
                for dep in deps.iter().rev() {
                    self.log_release(mirrors, dep);
                }
                return Err(e);
            }
        };

        resource.set_remote_id(remote);
        mirrors.insert(
            key,
            Mirror {
                resource: resource.clone(),
                count: 1,
            },
        );
        debug!("[Remote] Mirrored resource {} as peer resource {}", resource.id(), remote);
        Ok(())
    }

    fn release(&self, mirrors: &mut Mirrors, resource: &Resource) -> Result<()> {
        let local = resource.id();
        let key = resource.identity();
        let Some(mirror) = mirrors.get_mut(&key) else {
            return Err(AccelError::NotFound(format!("resource {local} is not mirrored")));
        };
        mirror.count -= 1;
        if mirror.count > 0 {
            return Ok(());
        }
        mirrors.remove(&key);

        let mut result = self.transport.resource_destroy(resource.remote_id());
        resource.set_remote_id(0);
        for dep in resource.deps().iter().rev() {
            let released = self.release(mirrors, dep);
            result = result.and(released);
        }
        debug!("[Remote] Dropped mirror of resource {}", local);
        result
    }

    fn log_release(&self, mirrors: &mut Mirrors, resource: &Resource) {
        if let Err(e) = self.release(mirrors, resource) {
            warn!(
                "[Remote] Could not drop mirror of resource {}: {}",
                resource.id(),
                e
            );
        }
    }
}

impl RemotePlugin<Box<dyn Transport>> {
    pub fn from_config(config: &RemoteConfig) -> Self {
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Device => Box::new(DeviceTransport::new(&config.device)),
            TransportKind::Socket => {
                Box::new(SocketTransport::new(config.address.clone(), config.timeout))
            }
        };
        Self::new(transport)
    }

    pub fn from_env() -> Self {
        Self::from_config(&RemoteConfig::from_env())
    }
}

/// Contents the peer needs to recreate `resource`.
fn mirror_spec(resource: &Resource, deps: &[Resource]) -> Result<ResourceSpec> {
    let files = resource
        .files()
        .into_iter()
        .map(|file| -> Result<WireFile> {
            let data = match (file.data(), file.path()) {
                (Some(data), _) => data.to_vec(),
                (None, Some(path)) => fs::read(path)?,
                (None, None) => {
                    return Err(AccelError::InvalidArgument(format!(
                        "file {} of resource {} has no contents",
                        file.name(),
                        resource.id()
                    )))
                }
            };
            Ok(WireFile {
                name: file.name().to_string(),
                data,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ResourceSpec {
        rtype: resource.rtype(),
        files,
        deps: deps.iter().map(Resource::remote_id).collect(),
    })
}

fn remote_session(session: &Session) -> Result<Id> {
    match session.remote_id() {
        0 => Err(AccelError::InvalidArgument(format!(
            "session {} has no peer session",
            session.id()
        ))),
        id => Ok(id),
    }
}

impl<T: Transport + 'static> Plugin for RemotePlugin<T> {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(Self::NAME, env!("CARGO_PKG_VERSION"), PluginFlags::REMOTE)
    }

    fn init(&self, ctx: &PluginContext<'_>) -> Result<()> {
        let mut ops = Vec::with_capacity(OpType::COUNT);

        let transport = Arc::clone(&self.transport);
        ops.push((
            OpType::Exec,
            OpImpl::exec(move |session, library, symbol, read, write| {
                transport.exec(remote_session(session)?, library, symbol, read, write)
            }),
        ));

        let transport = Arc::clone(&self.transport);
        ops.push((
            OpType::ExecWithResource,
            OpImpl::exec_with_resource(move |session, resource, symbol, read, write| {
                let peer = remote_session(session)?;
                let mirror = resource.remote_id();
                if mirror == 0 {
                    return Err(AccelError::InvalidArgument(format!(
                        "resource {} is not registered with a remote session",
                        resource.id()
                    )));
                }
                let mut packed = genop::pack_exec_with_resource(mirror, symbol, read);
                transport.do_op(peer, &mut packed, write)
            }),
        ));

        for op_type in OpType::ALL {
            if matches!(op_type, OpType::Exec | OpType::ExecWithResource) {
                continue;
            }
            let transport = Arc::clone(&self.transport);
            ops.push((
                op_type,
                OpImpl::generic(move |session, read, write| {
                    let mut packed = genop::pack(op_type, read);
                    transport.do_op(remote_session(session)?, &mut packed, write)
                }),
            ));
        }

        ctx.register_ops(ops)?;
        info!(
            "[Remote] Forwarding {} operation types over {}",
            OpType::COUNT,
            self.transport.name()
        );
        Ok(())
    }

    fn fini(&self) -> Result<()> {
        let leftover: Vec<Id> = self
            .mirrors
            .lock()
            .values()
            .map(|mirror| mirror.resource.id())
            .collect();
        if !leftover.is_empty() {
            warn!(
                "[Remote] {} resource mirror(s) still alive at unload: {:?}",
                leftover.len(),
                leftover
            );
        }
        Ok(())
    }

    fn session_hooks(&self) -> Option<&dyn SessionHooks> {
        Some(self)
    }
}

impl<T: Transport + 'static> SessionHooks for RemotePlugin<T> {
    fn session_init(&self, session: &Session, hint: PluginFlags) -> Result<()> {
        let peer = self.transport.session_create(hint)?;
        session.set_remote_id(peer);
        debug!("[Remote] Session {} backed by peer session {}", session.id(), peer);
        Ok(())
    }

    fn session_release(&self, session: &Session) -> Result<()> {
        self.transport.session_destroy(remote_session(session)?)
    }

    fn session_update(&self, session: &Session, hint: PluginFlags) -> Result<()> {
        self.transport.session_update(remote_session(session)?, hint)
    }

    fn resource_register(&self, resource: &Resource, session: &Session) -> Result<()> {
        let peer = remote_session(session)?;
        let mut mirrors = self.mirrors.lock();
        self.acquire(&mut mirrors, resource)?;
        if let Err(e) = self.transport.resource_register(resource.remote_id(), peer) {
            self.log_release(&mut mirrors, resource);
            return Err(e);
        }
        Ok(())
    }

    fn resource_unregister(&self, resource: &Resource, session: &Session) -> Result<()> {
        let peer = remote_session(session)?;
        let mut mirrors = self.mirrors.lock();
        let unregistered = self.transport.resource_unregister(resource.remote_id(), peer);
        let released = self.release(&mut mirrors, resource);
        unregistered.and(released)
    }

    fn resource_sync(&self, resource: &Resource, _session: &Session) -> Result<()> {
        let files = self.transport.resource_sync(resource.remote_id())?;
        let local = resource.files().len();
        if files.len() != local {
            return Err(AccelError::Protocol(format!(
                "peer returned {} files for resource {} with {}",
                files.len(),
                resource.id(),
                local
            )));
        }
        for (index, file) in files.into_iter().enumerate() {
            resource.update_file(index, file.data)?;
        }
        Ok(())
    }
}
