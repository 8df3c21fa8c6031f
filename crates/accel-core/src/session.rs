//! # Sessions
//!
//! A [`Session`] is the caller-visible execution context. It carries a
//! capability hint steering plugin selection, and the resources registered
//! with it.
//!
//! A session created with the `REMOTE` hint is backed by the first loaded
//! remote plugin: its session hooks run on init, update and release, and
//! every resource registration is mirrored through them. Otherwise the
//! session is purely local bookkeeping.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::{Id, IdPool, PluginFlags, ResourceType};
use crate::error::{AccelError, Result};
use crate::plugin::registry::{PluginEntry, PluginRegistry};
use crate::registration::{Registration, RegistrationTable};
use crate::resource::{Persistence, Resource};

/// Capacity of the session id pool.
pub const MAX_SESSIONS: usize = 1024;

struct SessionInner {
    /// Zero once released.
    id: AtomicU32,
    remote_id: AtomicU32,
    hint: AtomicU32,
    /// Plugin whose session hooks back this session.
    plugin: Mutex<Option<Arc<PluginEntry>>>,
    private: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

/// Shared handle to a session. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("remote_id", &self.remote_id())
            .field("hint", &self.hint())
            .finish()
    }
}

impl Session {
    fn new(id: Id, hint: PluginFlags) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: AtomicU32::new(id),
                remote_id: AtomicU32::new(0),
                hint: AtomicU32::new(hint.bits()),
                plugin: Mutex::new(None),
                private: Mutex::new(None),
            }),
        }
    }

    /// Session not tracked by any manager.
    #[cfg(test)]
    pub(crate) fn detached(id: Id, hint: PluginFlags) -> Self {
        Self::new(id, hint)
    }

    /// Session id, `0` after release.
    pub fn id(&self) -> Id {
        self.inner.id.load(Ordering::Acquire)
    }

    /// Id of the peer session for remote-backed sessions, else `0`.
    pub fn remote_id(&self) -> Id {
        self.inner.remote_id.load(Ordering::Acquire)
    }

    pub fn set_remote_id(&self, id: Id) {
        self.inner.remote_id.store(id, Ordering::Release);
    }

    /// Capability hint. Survives release.
    pub fn hint(&self) -> PluginFlags {
        PluginFlags::from_bits(self.inner.hint.load(Ordering::Acquire))
    }

    fn set_hint(&self, hint: PluginFlags) {
        self.inner.hint.store(hint.bits(), Ordering::Release);
    }

    /// Backed by a plugin's session hooks.
    pub fn is_remote(&self) -> bool {
        self.inner.plugin.lock().is_some()
    }

    pub fn plugin(&self) -> Option<Arc<PluginEntry>> {
        self.inner.plugin.lock().clone()
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn set_private<T: Any + Send + Sync>(&self, value: T) {
        *self.inner.private.lock() = Some(Box::new(value));
    }

    /// Run `f` on the private value if it has type `T`.
    pub fn with_private<T: Any + Send + Sync, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut private = self.inner.private.lock();
        private.as_mut()?.downcast_mut::<T>().map(f)
    }

    pub fn has_private(&self) -> bool {
        self.inner.private.lock().is_some()
    }

    pub(crate) fn retire(&self) -> Id {
        self.inner.id.swap(0, Ordering::AcqRel)
    }
}

#[derive(Default)]
struct ManagerState {
    pool: Option<IdPool>,
    live: HashMap<Id, Session>,
}

/// Session lifecycle and per-session resource lookups.
pub struct SessionManager {
    state: RwLock<ManagerState>,
    plugins: Arc<PluginRegistry>,
    links: Arc<RegistrationTable>,
}

impl SessionManager {
    pub fn new(plugins: Arc<PluginRegistry>, links: Arc<RegistrationTable>) -> Self {
        Self {
            state: RwLock::new(ManagerState::default()),
            plugins,
            links,
        }
    }

    pub fn bootstrap(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.pool.is_none() {
            state.pool = Some(IdPool::new(MAX_SESSIONS)?);
            info!("[Session] Manager ready ({} ids)", MAX_SESSIONS);
        }
        Ok(())
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.state.read().pool.is_some()
    }

    fn not_ready() -> AccelError {
        AccelError::PermissionDenied("sessions not bootstrapped".into())
    }

    /// Every live session.
    pub fn live(&self) -> Vec<Session> {
        self.state.read().live.values().cloned().collect()
    }

    pub(crate) fn finish_shutdown(&self) {
        *self.state.write() = ManagerState::default();
    }

    fn put_id(&self, id: Id) -> Result<()> {
        let mut state = self.state.write();
        state.live.remove(&id);
        match state.pool.as_ref() {
            Some(pool) => pool.put(id),
            None => Ok(()),
        }
    }

    /// Open a session with the given hint.
    pub fn init(&self, hint: PluginFlags) -> Result<Session> {
        let id = {
            let state = self.state.read();
            state.pool.as_ref().ok_or_else(Self::not_ready)?.get()?
        };
        let session = Session::new(id, hint);

        if hint.intersects(PluginFlags::REMOTE) {
            let Some(entry) = self.plugins.remote_plugin() else {
                self.put_id(id)?;
                return Err(AccelError::NotSupported(
                    "remote session requested but no remote plugin loaded".into(),
                ));
            };
            let hooked = match entry.plugin().session_hooks() {
                Some(hooks) => hooks.session_init(&session, hint),
                None => Err(AccelError::NotSupported(format!(
                    "plugin {} has no session hooks",
                    entry.info().name
                ))),
            };
            if let Err(e) = hooked {
                self.put_id(id)?;
                return Err(e);
            }
            *session.inner.plugin.lock() = Some(entry);
        }

        self.state.write().live.insert(id, session.clone());
        info!(
            "[Session] New session {} (hint {}, remote id {})",
            id,
            hint,
            session.remote_id()
        );
        Ok(session)
    }

    /// Release a session: unregister its resources, run the plugin hook and
    /// return the id. The hint is kept.
    pub fn release(&self, session: &Session) -> Result<()> {
        if !self.is_bootstrapped() {
            return Err(Self::not_ready());
        }
        let id = session.id();
        if id == 0 {
            return Err(AccelError::InvalidArgument("session already released".into()));
        }

        // Every link goes even when a plugin hook fails; the first error wins.
        let mut result = Ok(());
        for resource in self.links.resources_of(session, None) {
            if let Err(e) = self.unregister_resource(session, &resource) {
                warn!(
                    "[Session] Could not unregister resource {} from session {}: {}",
                    resource.id(),
                    id,
                    e
                );
                result = result.and(Err(e));
            }
        }

        let backing = session.inner.plugin.lock().take();
        if let Some(entry) = backing {
            if let Some(hooks) = entry.plugin().session_hooks() {
                let released = hooks.session_release(session);
                if let Err(e) = &released {
                    warn!(
                        "[Session] Plugin {} failed to release session {}: {}",
                        entry.info().name,
                        id,
                        e
                    );
                }
                result = result.and(released);
            }
        }

        *session.inner.private.lock() = None;
        session.set_remote_id(0);
        self.links.retire_session(session)?;
        self.put_id(id)?;
        info!("[Session] Released session {}", id);
        result
    }

    /// Replace the hint, forwarding it to the backing plugin if any.
    pub fn update(&self, session: &Session, hint: PluginFlags) -> Result<()> {
        if session.id() == 0 {
            return Err(AccelError::InvalidArgument("session released".into()));
        }
        if let Some(entry) = session.plugin() {
            if let Some(hooks) = entry.plugin().session_hooks() {
                hooks.session_update(session, hint)?;
            }
        }
        session.set_hint(hint);
        debug!("[Session] Session {} hint now {}", session.id(), hint);
        Ok(())
    }

    /// Register a resource with a session.
    pub fn register_resource(&self, session: &Session, resource: &Resource) -> Result<()> {
        if !self.is_bootstrapped() {
            return Err(Self::not_ready());
        }
        let reg = Registration::new(resource, session)?;
        if self.links.find(resource, session).is_some() {
            return Err(AccelError::AlreadyExists(format!(
                "resource {} already registered with session {}",
                resource.id(),
                session.id()
            )));
        }

        if resource.persistence() == Some(Persistence::Lazy) {
            resource.persist()?;
        }

        let hooks_entry = session.plugin();
        let hooks = hooks_entry.as_ref().and_then(|e| e.plugin().session_hooks());
        if let Some(hooks) = hooks {
            hooks.resource_register(resource, session)?;
        }

        if let Err(e) = self.links.link(&reg) {
            if let Some(hooks) = hooks {
                if let Err(undo) = hooks.resource_unregister(resource, session) {
                    warn!(
                        "[Session] Could not undo remote registration of resource {}: {}",
                        resource.id(),
                        undo
                    );
                }
            }
            return Err(e);
        }

        debug!(
            "[Session] Registered resource {} with session {}",
            resource.id(),
            session.id()
        );
        Ok(())
    }

    /// Unregister a resource from a session.
    pub fn unregister_resource(&self, session: &Session, resource: &Resource) -> Result<()> {
        if !self.is_bootstrapped() {
            return Err(Self::not_ready());
        }
        if session.id() == 0 || !resource.is_alive() {
            return Err(AccelError::InvalidArgument(
                "released session or destroyed resource".into(),
            ));
        }

        let _reg = self.links.find_and_unlink(resource, session).ok_or_else(|| {
            AccelError::NotFound(format!(
                "resource {} not registered with session {}",
                resource.id(),
                session.id()
            ))
        })?;

        if let Some(entry) = session.plugin() {
            if let Some(hooks) = entry.plugin().session_hooks() {
                hooks.resource_unregister(resource, session)?;
            }
        }

        debug!(
            "[Session] Unregistered resource {} from session {}",
            resource.id(),
            session.id()
        );
        Ok(())
    }

    /// Bring a registered buffer resource up to date, from the remote peer
    /// for remote sessions or from disk otherwise.
    pub fn sync_resource(&self, session: &Session, resource: &Resource) -> Result<()> {
        if self.links.find(resource, session).is_none() {
            return Err(AccelError::NotFound(format!(
                "resource {} not registered with session {}",
                resource.id(),
                session.id()
            )));
        }
        if resource.persistence().is_none() {
            return Err(AccelError::NotSupported(format!(
                "resource {} is path-backed",
                resource.id()
            )));
        }
        match session.plugin() {
            Some(entry) => match entry.plugin().session_hooks() {
                Some(hooks) => hooks.resource_sync(resource, session),
                None => resource.sync(),
            },
            None => resource.sync(),
        }
    }

    pub fn has_resource(&self, session: &Session, resource: &Resource) -> bool {
        self.links.find(resource, session).is_some()
    }

    /// First resource of `rtype` registered with the session.
    pub fn resource_by_type(&self, session: &Session, rtype: ResourceType) -> Result<Resource> {
        self.links
            .resources_of(session, Some(rtype))
            .into_iter()
            .next()
            .ok_or_else(|| {
                AccelError::NotFound(format!("session {} has no {} resource", session.id(), rtype))
            })
    }

    pub fn resource_by_id(&self, session: &Session, id: Id) -> Result<Resource> {
        if id == 0 {
            return Err(AccelError::InvalidArgument("resource id 0".into()));
        }
        self.links
            .resources_of(session, None)
            .into_iter()
            .find(|r| r.id() == id)
            .ok_or_else(|| {
                AccelError::NotFound(format!("resource {} not in session {}", id, session.id()))
            })
    }

    /// All resources of `rtype` registered with the session.
    pub fn resources_by_type(&self, session: &Session, rtype: ResourceType) -> Result<Vec<Resource>> {
        let all = self.links.resources_of(session, Some(rtype));
        if all.is_empty() {
            return Err(AccelError::NotFound(format!(
                "session {} has no {} resources",
                session.id(),
                rtype
            )));
        }
        Ok(all)
    }

    pub fn count(&self) -> usize {
        self.state.read().live.len()
    }
}
