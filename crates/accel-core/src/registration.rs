//! # Resource–Session Registration
//!
//! A [`Registration`] joins one session and one resource. Linked rows live in
//! a single [`RegistrationTable`] keyed by id on both sides:
//!
//! ```text
//!   by_resource: resource id ──► [session, session, ...]
//!   by_session:  session id  ──► [[lib...], [data...], [model...]]
//! ```
//!
//! Linking and unlinking update both indexes and the resource refcount under
//! one lock, so a concurrent `find` sees a row fully linked or not at all. A
//! resource or session is retired (id zeroed) under the same lock, which is
//! what keeps a destroy from racing a registration.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::{Id, ResourceType};
use crate::error::{AccelError, Result};
use crate::resource::Resource;
use crate::session::Session;

/// Link record between a session and a resource. Dropping it deletes it;
/// dropping does not unlink.
#[derive(Debug, Clone)]
pub struct Registration {
    resource: Resource,
    session: Session,
}

impl Registration {
    pub fn new(resource: &Resource, session: &Session) -> Result<Self> {
        if !resource.is_alive() {
            return Err(AccelError::InvalidArgument("resource destroyed".into()));
        }
        if session.id() == 0 {
            return Err(AccelError::InvalidArgument("session released".into()));
        }
        Ok(Self {
            resource: resource.clone(),
            session: session.clone(),
        })
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[derive(Default)]
struct LinkState {
    by_resource: HashMap<Id, Vec<Session>>,
    by_session: HashMap<Id, [Vec<Resource>; ResourceType::COUNT]>,
}

impl LinkState {
    fn position(&self, resource: &Resource, session: &Session) -> Option<usize> {
        self.by_resource
            .get(&resource.id())?
            .iter()
            .position(|s| s.ptr_eq(session))
    }

    fn remove(&mut self, resource: &Resource, session: &Session) -> bool {
        let rid = resource.id();
        let sid = session.id();
        let Some(pos) = self.position(resource, session) else {
            return false;
        };

        if let Some(sessions) = self.by_resource.get_mut(&rid) {
            sessions.remove(pos);
            if sessions.is_empty() {
                self.by_resource.remove(&rid);
            }
        }
        if let Some(slots) = self.by_session.get_mut(&sid) {
            slots[resource.rtype().index()].retain(|r| !r.ptr_eq(resource));
            if slots.iter().all(Vec::is_empty) {
                self.by_session.remove(&sid);
            }
        }
        resource.unlink_ref();
        true
    }
}

/// Every linked (session, resource) pair.
#[derive(Default)]
pub struct RegistrationTable {
    state: Mutex<LinkState>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a registration. A pair can be linked once.
    pub fn link(&self, reg: &Registration) -> Result<()> {
        let mut state = self.state.lock();

        let rid = reg.resource.id();
        let sid = reg.session.id();
        if rid == 0 || sid == 0 {
            return Err(AccelError::InvalidArgument(format!(
                "cannot link session {sid} with resource {rid}"
            )));
        }
        if state.position(&reg.resource, &reg.session).is_some() {
            return Err(AccelError::AlreadyExists(format!(
                "resource {rid} already registered with session {sid}"
            )));
        }

        state
            .by_resource
            .entry(rid)
            .or_default()
            .push(reg.session.clone());
        state.by_session.entry(sid).or_default()[reg.resource.rtype().index()]
            .push(reg.resource.clone());
        reg.resource.link_ref();
        Ok(())
    }

    pub fn unlink(&self, reg: &Registration) -> Result<()> {
        let mut state = self.state.lock();
        if state.remove(&reg.resource, &reg.session) {
            Ok(())
        } else {
            Err(AccelError::NotFound(format!(
                "resource {} not registered with session {}",
                reg.resource.id(),
                reg.session.id()
            )))
        }
    }

    pub fn find(&self, resource: &Resource, session: &Session) -> Option<Registration> {
        let state = self.state.lock();
        state.position(resource, session).map(|_| Registration {
            resource: resource.clone(),
            session: session.clone(),
        })
    }

    /// Atomically find and unlink.
    pub fn find_and_unlink(&self, resource: &Resource, session: &Session) -> Option<Registration> {
        let mut state = self.state.lock();
        state.remove(resource, session).then(|| Registration {
            resource: resource.clone(),
            session: session.clone(),
        })
    }

    /// Sessions linked to `resource`, in link order.
    pub fn sessions_of(&self, resource: &Resource) -> Vec<Session> {
        let state = self.state.lock();
        state
            .by_resource
            .get(&resource.id())
            .cloned()
            .unwrap_or_default()
    }

    /// Resources linked to `session`, by type then link order.
    pub fn resources_of(&self, session: &Session, rtype: Option<ResourceType>) -> Vec<Resource> {
        let state = self.state.lock();
        let Some(slots) = state.by_session.get(&session.id()) else {
            return Vec::new();
        };
        match rtype {
            Some(rtype) => slots[rtype.index()].clone(),
            None => slots.iter().flatten().cloned().collect(),
        }
    }

    /// Per-type count of resources linked to `session`.
    pub fn count(&self, session: &Session, rtype: ResourceType) -> usize {
        let state = self.state.lock();
        state
            .by_session
            .get(&session.id())
            .map(|slots| slots[rtype.index()].len())
            .unwrap_or(0)
    }

    /// Call `f` once per session linked to `resource`.
    ///
    /// Peers are snapshotted first, so `f` may link or unlink. Stops at the
    /// first error and returns it.
    pub fn foreach_session<F>(&self, resource: &Resource, mut f: F) -> Result<()>
    where
        F: FnMut(&Resource, &Session) -> Result<()>,
    {
        for session in self.sessions_of(resource) {
            f(resource, &session)?;
        }
        Ok(())
    }

    /// Call `f` once per resource linked to `session`. Same rules as
    /// [`RegistrationTable::foreach_session`].
    pub fn foreach_resource<F>(&self, session: &Session, mut f: F) -> Result<()>
    where
        F: FnMut(&Resource, &Session) -> Result<()>,
    {
        for resource in self.resources_of(session, None) {
            f(&resource, session)?;
        }
        Ok(())
    }

    /// Zero a resource's id if nothing references it.
    pub(crate) fn retire_resource(&self, resource: &Resource) -> Result<Id> {
        let _state = self.state.lock();
        if !resource.is_alive() {
            return Err(AccelError::InvalidArgument("resource already destroyed".into()));
        }
        if resource.refcount() > 0 {
            return Err(AccelError::Busy(format!(
                "resource {} has {} registration(s)",
                resource.id(),
                resource.refcount()
            )));
        }
        if resource.dependents() > 0 {
            return Err(AccelError::Busy(format!(
                "resource {} is a dependency of {} resource(s)",
                resource.id(),
                resource.dependents()
            )));
        }
        Ok(resource.retire())
    }

    /// Attach `deps` to `primary`, serialized against [`Self::retire_resource`].
    pub(crate) fn set_deps(&self, primary: &Resource, deps: &[Resource]) -> Result<()> {
        let _state = self.state.lock();
        primary.set_deps(deps)
    }

    pub(crate) fn clear_deps(&self, resource: &Resource) {
        let _state = self.state.lock();
        resource.clear_deps();
    }

    /// Zero a session's id if it has no links left.
    pub(crate) fn retire_session(&self, session: &Session) -> Result<Id> {
        let state = self.state.lock();
        let sid = session.id();
        if sid == 0 {
            return Err(AccelError::InvalidArgument("session already released".into()));
        }
        if state.by_session.contains_key(&sid) {
            return Err(AccelError::Busy(format!("session {sid} still has resources")));
        }
        Ok(session.retire())
    }

    /// Total linked rows.
    pub fn len(&self) -> usize {
        self.state.lock().by_resource.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
