//! # Resources
//!
//! A [`Resource`] is a reference-counted unit of code, data or model files a
//! session can use. The count is the number of live registrations (see
//! [`crate::registration`]); a resource is destroyed only when it is zero.
//!
//! ## Creation paths
//!
//! | Constructor | Backing | Disk writes |
//! |-------------|---------|-------------|
//! | [`ResourceManager::from_paths`] | existing files | none, paths are checked only |
//! | [`ResourceManager::from_bufs`] + `Immediate` | memory | at creation |
//! | [`ResourceManager::from_bufs`] + `Lazy` | memory | on first registration |
//! | [`ResourceManager::from_bufs`] + `MemoryOnly` | memory | never |
//!
//! In-memory files are materialized under `<rundir>/resource.<id>/`.

use std::any::Any;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::distributions::{Alphanumeric, DistString};
use tracing::{debug, info, warn};

use crate::domain::{Id, IdPool, ResourceType};
use crate::error::{AccelError, Result};
use crate::registration::RegistrationTable;

/// Capacity of the resource id pool.
pub const MAX_RESOURCES: usize = 2048;

/// Longest file name accepted for a materialized buffer.
pub const MAX_FILE_NAME: usize = 255;

/// Retries when a randomized file name collides.
const RANDOM_NAME_ATTEMPTS: usize = 16;

/// When in-memory buffers reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Immediate,
    /// On first registration with a session.
    Lazy,
    MemoryOnly,
}

/// In-memory file handed to [`ResourceManager::from_bufs`].
#[derive(Debug, Clone)]
pub struct BufferFile {
    pub name: String,
    pub data: Vec<u8>,
    /// Append a random `.XXXXXX` suffix instead of failing on collision.
    pub randomize: bool,
}

impl BufferFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            randomize: false,
        }
    }

    pub fn randomized(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            randomize: true,
            ..Self::new(name, data)
        }
    }
}

/// One file of a resource.
#[derive(Debug, Clone)]
pub struct ResourceFile {
    name: String,
    path: Option<PathBuf>,
    data: Option<Arc<[u8]>>,
    randomize: bool,
}

impl ResourceFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-disk location, once there is one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// In-memory contents, for buffer-backed files.
    pub fn data(&self) -> Option<&Arc<[u8]>> {
        self.data.as_ref()
    }

    fn needs_persist(&self) -> bool {
        self.data.is_some() && self.path.is_none()
    }
}

type Destructor = Box<dyn FnOnce() + Send>;

struct ResourceState {
    files: Vec<ResourceFile>,
    /// `None` for path-backed resources.
    persistence: Option<Persistence>,
    rundir: Option<PathBuf>,
    deps: Vec<Resource>,
    plugin_priv: Option<Box<dyn Any + Send + Sync>>,
    destructor: Option<Destructor>,
}

struct ResourceInner {
    /// Zero once destroyed.
    id: AtomicU32,
    rtype: ResourceType,
    /// Live registrations. Changed only under the registration table lock.
    refcount: AtomicUsize,
    /// Aggregates listing this resource as a dependency. Same lock.
    dependents: AtomicUsize,
    remote_id: AtomicU32,
    run_root: Option<PathBuf>,
    state: Mutex<ResourceState>,
}

/// Shared handle to a resource. Clones refer to the same resource.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id())
            .field("type", &self.rtype())
            .field("refcount", &self.refcount())
            .finish()
    }
}

impl Resource {
    fn new(
        id: Id,
        rtype: ResourceType,
        files: Vec<ResourceFile>,
        persistence: Option<Persistence>,
        run_root: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                id: AtomicU32::new(id),
                rtype,
                refcount: AtomicUsize::new(0),
                dependents: AtomicUsize::new(0),
                remote_id: AtomicU32::new(0),
                run_root,
                state: Mutex::new(ResourceState {
                    files,
                    persistence,
                    rundir: None,
                    deps: Vec::new(),
                    plugin_priv: None,
                    destructor: None,
                }),
            }),
        }
    }

    /// Resource id, `0` after destroy.
    pub fn id(&self) -> Id {
        self.inner.id.load(Ordering::Acquire)
    }

    pub fn rtype(&self) -> ResourceType {
        self.inner.rtype
    }

    pub fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::Acquire)
    }

    /// Number of live aggregates depending on this resource.
    pub fn dependents(&self) -> usize {
        self.inner.dependents.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.id() != 0
    }

    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identity that, unlike the id, is never reused while a handle is held.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Id of the mirror on a remote peer, `0` when there is none.
    pub fn remote_id(&self) -> Id {
        self.inner.remote_id.load(Ordering::Acquire)
    }

    pub fn set_remote_id(&self, id: Id) {
        self.inner.remote_id.store(id, Ordering::Release);
    }

    pub fn persistence(&self) -> Option<Persistence> {
        self.inner.state.lock().persistence
    }

    pub fn files(&self) -> Vec<ResourceFile> {
        self.inner.state.lock().files.clone()
    }

    /// On-disk paths of every file that has one.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner
            .state
            .lock()
            .files
            .iter()
            .filter_map(|f| f.path.clone())
            .collect()
    }

    /// `<rundir>/resource.<id>`, once created.
    pub fn rundir(&self) -> Option<PathBuf> {
        self.inner.state.lock().rundir.clone()
    }

    pub fn deps(&self) -> Vec<Resource> {
        self.inner.state.lock().deps.clone()
    }

    /// Attach an ordered dependency list, replacing any previous one.
    /// Each dependency stays pinned until replaced or this resource is
    /// destroyed. Caller holds the registration lock.
    pub(crate) fn set_deps(&self, deps: &[Resource]) -> Result<()> {
        if let Some(dep) = deps.iter().find(|d| !d.is_alive() || d.ptr_eq(self)) {
            return Err(AccelError::InvalidArgument(format!(
                "resource {} cannot depend on resource {}",
                self.id(),
                dep.id()
            )));
        }
        for dep in deps {
            dep.inner.dependents.fetch_add(1, Ordering::AcqRel);
        }
        let old = std::mem::replace(&mut self.inner.state.lock().deps, deps.to_vec());
        for dep in old {
            dep.unpin();
        }
        Ok(())
    }

    /// Drop the dependency list, unpinning every entry. Caller holds the
    /// registration lock.
    pub(crate) fn clear_deps(&self) {
        let old = std::mem::take(&mut self.inner.state.lock().deps);
        for dep in old {
            dep.unpin();
        }
    }

    fn unpin(&self) {
        let prev = self.inner.dependents.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "resource dependents underflow");
    }

    pub fn set_plugin_priv<T: Any + Send + Sync>(&self, value: T) {
        self.inner.state.lock().plugin_priv = Some(Box::new(value));
    }

    /// Run `f` on the plugin-private value if it has type `T`.
    pub fn with_plugin_priv<T: Any + Send + Sync, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.inner.state.lock();
        state.plugin_priv.as_mut()?.downcast_mut::<T>().map(f)
    }

    pub fn clear_plugin_priv(&self) {
        self.inner.state.lock().plugin_priv = None;
    }

    /// Callback run once when the resource is destroyed.
    pub fn set_destructor(&self, destructor: impl FnOnce() + Send + 'static) {
        self.inner.state.lock().destructor = Some(Box::new(destructor));
    }

    /// Write in-memory files that have no disk copy yet.
    ///
    /// Named files fail with `AlreadyExists` on collision; randomized ones
    /// retry with a fresh suffix. A failure removes whatever this call wrote.
    pub fn persist(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        // Read under the state lock so a concurrent destroy cannot slip in
        // before the run directory is created.
        let id = self.id();
        if id == 0 {
            return Err(AccelError::InvalidArgument("resource already destroyed".into()));
        }
        if !state.files.iter().any(ResourceFile::needs_persist) {
            return Ok(());
        }

        let created_dir = state.rundir.is_none();
        let dir = match &state.rundir {
            Some(dir) => dir.clone(),
            None => {
                let root = self.inner.run_root.as_ref().ok_or_else(|| {
                    AccelError::NotSupported(format!("resource {id} has no run directory"))
                })?;
                let dir = root.join(format!("resource.{id}"));
                fs::create_dir_all(&dir)?;
                dir
            }
        };

        let mut written: Vec<(usize, PathBuf)> = Vec::new();
        for (index, file) in state.files.iter().enumerate() {
            let Some(data) = file.data.as_ref().filter(|_| file.needs_persist()) else {
                continue;
            };
            match write_file(&dir, &file.name, file.randomize, data) {
                Ok(path) => written.push((index, path)),
                Err(e) => {
                    for (_, path) in &written {
                        let _ = fs::remove_file(path);
                    }
                    if created_dir {
                        let _ = fs::remove_dir(&dir);
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            "[Resource] Persisted {} file(s) of resource {} under {}",
            written.len(),
            id,
            dir.display()
        );
        for (index, path) in written {
            state.files[index].path = Some(path);
        }
        state.rundir = Some(dir);
        Ok(())
    }

    /// Reload buffer contents from their disk copies.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.persistence.is_none() {
            return Err(AccelError::NotSupported(format!(
                "resource {} is path-backed",
                self.id()
            )));
        }
        for file in state.files.iter_mut() {
            if let Some(path) = &file.path {
                file.data = Some(Arc::from(fs::read(path)?));
            }
        }
        Ok(())
    }

    /// Replace the contents of file `index`, keeping any disk copy in step.
    pub fn update_file(&self, index: usize, data: Vec<u8>) -> Result<()> {
        let mut state = self.inner.state.lock();
        let file = state.files.get_mut(index).ok_or_else(|| {
            AccelError::InvalidArgument(format!("resource {} has no file {index}", self.id()))
        })?;
        if let Some(path) = &file.path {
            fs::write(path, &data)?;
        }
        file.data = Some(Arc::from(data));
        Ok(())
    }

    pub(crate) fn link_ref(&self) {
        self.inner.refcount.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unlink_ref(&self) {
        let prev = self.inner.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "resource refcount underflow");
    }

    /// Zero the id. Caller holds the registration lock.
    pub(crate) fn retire(&self) -> Id {
        self.inner.id.swap(0, Ordering::AcqRel)
    }

    /// Remove the run directory and run the destructor.
    fn teardown(&self, id: Id) {
        let (rundir, destructor) = {
            let mut state = self.inner.state.lock();
            state.plugin_priv = None;
            let rundir = state.rundir.take();
            if let Some(dir) = &rundir {
                for file in state.files.iter_mut() {
                    if file.path.as_ref().is_some_and(|p| p.starts_with(dir)) {
                        file.path = None;
                    }
                }
            }
            (rundir, state.destructor.take())
        };

        if let Some(dir) = rundir {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(
                    "[Resource] Could not remove {} of resource {}: {}",
                    dir.display(),
                    id,
                    e
                );
            }
        }
        if let Some(destructor) = destructor {
            destructor();
        }
    }
}

fn write_file(dir: &Path, name: &str, randomize: bool, data: &[u8]) -> Result<PathBuf> {
    let attempts = if randomize { RANDOM_NAME_ATTEMPTS } else { 1 };
    for _ in 0..attempts {
        let file_name = if randomize {
            let suffix = Alphanumeric.sample_string(&mut rand::thread_rng(), 6);
            format!("{name}.{suffix}")
        } else {
            name.to_string()
        };
        let path = dir.join(file_name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                write_or_remove(&path, file, data)?;
                return Ok(path);
            }
            Err(e) if randomize && e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AccelError::AlreadyExists(format!("{} exists", path.display())));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AccelError::AlreadyExists(format!(
        "no free random name for {name} in {}",
        dir.display()
    )))
}

/// Fill a freshly created file, removing it again if the write fails.
fn write_or_remove(path: &Path, mut out: impl Write, data: &[u8]) -> Result<()> {
    if let Err(e) = out.write_all(data) {
        drop(out);
        let _ = fs::remove_file(path);
        return Err(e.into());
    }
    Ok(())
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(AccelError::InvalidArgument(format!("invalid file name '{name}'")));
    }
    if name.len() > MAX_FILE_NAME {
        return Err(AccelError::NameTooLong(format!("{} bytes", name.len())));
    }
    Ok(())
}

/// Ids of a dependency list, for wire transmission.
pub fn deps_to_ids(deps: &[Resource]) -> Vec<Id> {
    deps.iter().map(Resource::id).collect()
}

#[derive(Default)]
struct ManagerState {
    pool: Option<IdPool>,
    run_root: Option<PathBuf>,
    /// Creation order per type.
    by_type: [Vec<Resource>; ResourceType::COUNT],
}

/// Owns every live resource.
pub struct ResourceManager {
    state: RwLock<ManagerState>,
    links: Arc<RegistrationTable>,
}

impl ResourceManager {
    pub fn new(links: Arc<RegistrationTable>) -> Self {
        Self {
            state: RwLock::new(ManagerState::default()),
            links,
        }
    }

    /// Enable resource creation, materializing buffers under `run_root`.
    pub fn bootstrap(&self, run_root: PathBuf) -> Result<()> {
        let mut state = self.state.write();
        if state.pool.is_some() {
            return Ok(());
        }
        state.pool = Some(IdPool::new(MAX_RESOURCES)?);
        state.run_root = Some(run_root);
        info!("[Resource] Manager ready ({} ids)", MAX_RESOURCES);
        Ok(())
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.state.read().pool.is_some()
    }

    /// Every live resource.
    pub fn live(&self) -> Vec<Resource> {
        let state = self.state.read();
        state.by_type.iter().flatten().cloned().collect()
    }

    pub(crate) fn finish_shutdown(&self) {
        let mut state = self.state.write();
        *state = ManagerState::default();
    }

    fn not_ready() -> AccelError {
        AccelError::PermissionDenied("resources not bootstrapped".into())
    }

    fn insert(
        &self,
        rtype: ResourceType,
        files: Vec<ResourceFile>,
        persistence: Option<Persistence>,
    ) -> Result<Resource> {
        let mut state = self.state.write();
        let pool = state.pool.as_ref().ok_or_else(Self::not_ready)?;
        let id = pool.get()?;
        let run_root = state.run_root.clone();

        let resource = Resource::new(id, rtype, files, persistence, run_root);
        if persistence == Some(Persistence::Immediate) {
            if let Err(e) = resource.persist() {
                resource.retire();
                if let Some(pool) = state.pool.as_ref() {
                    pool.put(id)?;
                }
                return Err(e);
            }
        }

        state.by_type[rtype.index()].push(resource.clone());
        info!("[Resource] Created {} resource {}", rtype, id);
        Ok(resource)
    }

    /// Resource over existing files. Paths are checked, not copied.
    pub fn from_paths(&self, rtype: ResourceType, paths: &[PathBuf]) -> Result<Resource> {
        if !self.is_bootstrapped() {
            return Err(Self::not_ready());
        }
        if paths.is_empty() {
            return Err(AccelError::InvalidArgument("no paths given".into()));
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.exists() {
                return Err(AccelError::NotFound(format!("{}", path.display())));
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push(ResourceFile {
                name,
                path: Some(path.clone()),
                data: None,
                randomize: false,
            });
        }
        self.insert(rtype, files, None)
    }

    pub fn from_path(&self, rtype: ResourceType, path: impl Into<PathBuf>) -> Result<Resource> {
        self.from_paths(rtype, &[path.into()])
    }

    /// Resource over in-memory buffers.
    pub fn from_bufs(
        &self,
        rtype: ResourceType,
        bufs: Vec<BufferFile>,
        persistence: Persistence,
    ) -> Result<Resource> {
        if !self.is_bootstrapped() {
            return Err(Self::not_ready());
        }
        if bufs.is_empty() {
            return Err(AccelError::InvalidArgument("no buffers given".into()));
        }
        for buf in &bufs {
            validate_file_name(&buf.name)?;
        }

        let files = bufs
            .into_iter()
            .map(|buf| ResourceFile {
                name: buf.name,
                path: None,
                data: Some(Arc::from(buf.data)),
                randomize: buf.randomize,
            })
            .collect();
        self.insert(rtype, files, Some(persistence))
    }

    pub fn from_buf(
        &self,
        rtype: ResourceType,
        buf: BufferFile,
        persistence: Persistence,
    ) -> Result<Resource> {
        self.from_bufs(rtype, vec![buf], persistence)
    }

    /// Primary resource plus ordered dependencies.
    pub fn aggregate(&self, primary: &Resource, deps: &[Resource]) -> Result<()> {
        if !self.is_bootstrapped() {
            return Err(Self::not_ready());
        }
        self.get_by_id(primary.id())?;
        self.links.set_deps(primary, deps)
    }

    /// Resolve wire ids back to live resources.
    pub fn deps_from_ids(&self, ids: &[Id]) -> Result<Vec<Resource>> {
        ids.iter().map(|id| self.get_by_id(*id)).collect()
    }

    /// Destroy an unreferenced resource.
    pub fn destroy(&self, resource: &Resource) -> Result<()> {
        if !self.is_bootstrapped() {
            return Err(Self::not_ready());
        }

        let id = self.links.retire_resource(resource)?;
        self.links.clear_deps(resource);

        {
            let mut state = self.state.write();
            state.by_type[resource.rtype().index()].retain(|r| !r.ptr_eq(resource));
            if let Some(pool) = state.pool.as_ref() {
                pool.put(id)?;
            }
        }

        resource.teardown(id);
        info!("[Resource] Destroyed resource {}", id);
        Ok(())
    }

    pub fn get_by_id(&self, id: Id) -> Result<Resource> {
        if id == 0 {
            return Err(AccelError::InvalidArgument("resource id 0".into()));
        }
        let state = self.state.read();
        if state.pool.is_none() {
            return Err(Self::not_ready());
        }
        state
            .by_type
            .iter()
            .flatten()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| AccelError::NotFound(format!("resource {id}")))
    }

    /// First live resource of `rtype`, in creation order.
    pub fn get_by_type(&self, rtype: ResourceType) -> Result<Resource> {
        let state = self.state.read();
        if state.pool.is_none() {
            return Err(Self::not_ready());
        }
        state.by_type[rtype.index()]
            .first()
            .cloned()
            .ok_or_else(|| AccelError::NotFound(format!("no {rtype} resource")))
    }

    pub fn get_all_by_type(&self, rtype: ResourceType) -> Result<Vec<Resource>> {
        let state = self.state.read();
        if state.pool.is_none() {
            return Err(Self::not_ready());
        }
        let all = state.by_type[rtype.index()].clone();
        if all.is_empty() {
            return Err(AccelError::NotFound(format!("no {rtype} resources")));
        }
        Ok(all)
    }

    pub fn count(&self) -> usize {
        self.state.read().by_type.iter().map(Vec::len).sum()
    }
}
