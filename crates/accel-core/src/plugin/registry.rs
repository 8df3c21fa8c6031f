//! # Plugin Registry
//!
//! Holds every linked plugin plus a per-operation-type index of
//! implementations, in registration order.
//!
//! ## Selection
//!
//! | Session hint | Picked implementation |
//! |--------------|-----------------------|
//! | empty | first registered |
//! | non-empty | first whose plugin flags intersect the hint, else first registered |
//!
//! ## Locking
//!
//! One `RwLock` guards plugins and the operation index together. Plugin
//! `init`/`fini` run with the lock released so they can call back into the
//! registry. Lock order is registry state, then a plugin's op list.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libloading::Library;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{Plugin, PluginContext, PluginInfo};
use crate::domain::{check_compatible, OpType, PluginFlags};
use crate::error::{AccelError, Result};
use crate::ops::OpImpl;

/// A linked plugin.
pub struct PluginEntry {
    id: u32,
    info: PluginInfo,
    path: Option<PathBuf>,
    op_types: Mutex<Vec<OpType>>,
    plugin: Arc<dyn Plugin>,
    // Dropped after `plugin`: the plugin's code lives in here.
    library: Option<Library>,
}

impl PluginEntry {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn flags(&self) -> PluginFlags {
        self.info.flags
    }

    /// Library path for loaded plugins.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// Operation types this plugin implements.
    pub fn op_types(&self) -> Vec<OpType> {
        self.op_types.lock().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("path", &self.path)
            .finish()
    }
}

/// One implementation of one operation type.
pub struct Operation {
    op_type: OpType,
    imp: OpImpl,
    owner: Arc<PluginEntry>,
}

impl Operation {
    pub fn op_type(&self) -> OpType {
        self.op_type
    }

    pub fn imp(&self) -> &OpImpl {
        &self.imp
    }

    pub fn owner(&self) -> &Arc<PluginEntry> {
        &self.owner
    }

    pub fn flags(&self) -> PluginFlags {
        self.owner.flags()
    }
}

/// First candidate whose flags intersect `hint`, else the first candidate.
pub fn select_by_hint<T>(
    candidates: &[T],
    hint: PluginFlags,
    flags_of: impl Fn(&T) -> PluginFlags,
) -> Option<&T> {
    let first = candidates.first()?;
    if hint.is_empty() {
        return Some(first);
    }
    Some(
        candidates
            .iter()
            .find(|c| flags_of(c).intersects(hint))
            .unwrap_or(first),
    )
}

fn same_plugin(a: &Arc<dyn Plugin>, b: &Arc<dyn Plugin>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct RegistryState {
    initialized: bool,
    next_id: u32,
    plugins: Vec<Arc<PluginEntry>>,
    /// Indexed by `OpType::index`.
    ops: Vec<Vec<Arc<Operation>>>,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            initialized: false,
            next_id: 1,
            plugins: Vec::new(),
            ops: vec![Vec::new(); OpType::COUNT],
        }
    }

    fn is_linked(&self, entry: &Arc<PluginEntry>) -> bool {
        self.plugins.iter().any(|e| Arc::ptr_eq(e, entry))
    }
}

/// Registry of plugins and their operations.
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
    ignore_version: AtomicBool,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::new()),
            ignore_version: AtomicBool::new(false),
        }
    }

    /// Accept registrations from now on.
    pub fn bootstrap(&self, ignore_version: bool) {
        self.ignore_version.store(ignore_version, Ordering::Release);
        let mut state = self.state.write();
        if !state.initialized {
            state.initialized = true;
            info!(
                "[Registry] Ready (version check {})",
                if ignore_version { "off" } else { "on" }
            );
        }
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.state.read().initialized
    }

    pub fn set_ignore_version(&self, ignore: bool) {
        self.ignore_version.store(ignore, Ordering::Release);
    }

    /// Link an in-process plugin and run its `init`.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<Arc<PluginEntry>> {
        self.register_with(plugin, None, None)
    }

    pub(crate) fn register_with(
        &self,
        plugin: Arc<dyn Plugin>,
        path: Option<PathBuf>,
        library: Option<Library>,
    ) -> Result<Arc<PluginEntry>> {
        let info = plugin.info();
        // Built up front so an early return drops plugin before library.
        let mut entry = PluginEntry {
            id: 0,
            info,
            path,
            op_types: Mutex::new(Vec::new()),
            plugin,
            library,
        };

        if entry.info.name.is_empty()
            || entry.info.version.is_empty()
            || entry.info.runtime_version.is_empty()
        {
            return Err(AccelError::InvalidArgument(
                "plugin info needs name, version and runtime version".into(),
            ));
        }

        let entry = {
            let mut state = self.state.write();
            if !state.initialized {
                return Err(AccelError::BackendNotReady("plugin registry not bootstrapped".into()));
            }
            if state.plugins.iter().any(|e| same_plugin(&e.plugin, &entry.plugin)) {
                return Err(AccelError::AlreadyExists(format!(
                    "plugin {} already registered",
                    entry.info.name
                )));
            }
            check_compatible(
                &entry.info.runtime_version,
                crate::RUNTIME_VERSION,
                self.ignore_version.load(Ordering::Acquire),
            )
            .map_err(|e| {
                error!("[Registry] Plugin {} rejected: {}", entry.info.name, e);
                e
            })?;

            entry.id = state.next_id;
            state.next_id += 1;
            let entry = Arc::new(entry);
            state.plugins.push(entry.clone());
            entry
        };

        let ctx = PluginContext::new(self, &entry);
        if let Err(e) = entry.plugin.init(&ctx) {
            self.detach(&entry);
            warn!("[Registry] Plugin {} failed to initialize: {}", entry.info.name, e);
            return Err(e);
        }

        info!(
            "[Registry] Registered plugin {} {} ({}), ops: {:?}",
            entry.info.name,
            entry.info.version,
            entry.info.flags,
            entry.op_types()
        );
        Ok(entry)
    }

    /// Remove the plugin's operations and unlink it. False if not linked.
    fn detach(&self, entry: &Arc<PluginEntry>) -> bool {
        let mut state = self.state.write();
        let Some(pos) = state.plugins.iter().position(|e| Arc::ptr_eq(e, entry)) else {
            return false;
        };
        state.plugins.remove(pos);
        let mut types = entry.op_types.lock();
        for op_type in types.drain(..) {
            state.ops[op_type.index()].retain(|op| !Arc::ptr_eq(&op.owner, entry));
        }
        true
    }

    /// Unregister a plugin by the handle it was registered with.
    pub fn unregister(&self, plugin: &Arc<dyn Plugin>) -> Result<()> {
        let entry = self
            .state
            .read()
            .plugins
            .iter()
            .find(|e| same_plugin(&e.plugin, plugin))
            .cloned()
            .ok_or_else(|| AccelError::NotFound("plugin not registered".into()))?;
        self.unregister_entry(&entry)
    }

    /// Remove the entry's operations, unlink it, then run `fini`.
    pub fn unregister_entry(&self, entry: &Arc<PluginEntry>) -> Result<()> {
        if !self.detach(entry) {
            return Err(AccelError::NotFound(format!(
                "plugin {} not registered",
                entry.info.name
            )));
        }
        let result = entry.plugin.fini();
        match &result {
            Ok(()) => info!("[Registry] Unregistered plugin {}", entry.info.name),
            Err(e) => warn!("[Registry] Plugin {} fini failed: {}", entry.info.name, e),
        }
        result
    }

    /// Attach an implementation of `op_type` to a linked plugin.
    pub fn register_op(&self, owner: &Arc<PluginEntry>, op_type: OpType, imp: OpImpl) -> Result<()> {
        if !imp.accepts(op_type) {
            return Err(AccelError::InvalidArgument(format!(
                "{} implementation cannot serve {}",
                imp.kind(),
                op_type
            )));
        }

        let mut state = self.state.write();
        if !state.is_linked(owner) {
            return Err(AccelError::InvalidArgument(format!(
                "plugin {} is not registered",
                owner.info.name
            )));
        }
        let mut types = owner.op_types.lock();
        if types.contains(&op_type) {
            return Err(AccelError::AlreadyExists(format!(
                "plugin {} already implements {}",
                owner.info.name, op_type
            )));
        }
        types.push(op_type);
        state.ops[op_type.index()].push(Arc::new(Operation {
            op_type,
            imp,
            owner: owner.clone(),
        }));
        debug!("[Registry] {} implements {}", owner.info.name, op_type);
        Ok(())
    }

    /// Attach several implementations, stopping at the first failure.
    pub fn register_ops(&self, owner: &Arc<PluginEntry>, ops: Vec<(OpType, OpImpl)>) -> Result<()> {
        for (op_type, imp) in ops {
            self.register_op(owner, op_type, imp)?;
        }
        Ok(())
    }

    /// Implementation of `op_type` preferred for `hint`.
    pub fn get_op(&self, op_type: OpType, hint: PluginFlags) -> Option<Arc<Operation>> {
        let state = self.state.read();
        select_by_hint(&state.ops[op_type.index()], hint, |op| op.flags()).cloned()
    }

    /// Whether any plugin implements `op_type`.
    pub fn get_available(&self, op_type: OpType) -> bool {
        !self.state.read().ops[op_type.index()].is_empty()
    }

    /// Every implementation of `op_type`, in registration order.
    pub fn implementations(&self, op_type: OpType) -> Vec<Arc<Operation>> {
        self.state.read().ops[op_type.index()].clone()
    }

    /// First linked plugin flagged `REMOTE` that provides session hooks.
    pub fn remote_plugin(&self) -> Option<Arc<PluginEntry>> {
        self.state
            .read()
            .plugins
            .iter()
            .find(|e| {
                e.flags().intersects(PluginFlags::REMOTE) && e.plugin.session_hooks().is_some()
            })
            .cloned()
    }

    pub fn entries(&self) -> Vec<Arc<PluginEntry>> {
        self.state.read().plugins.clone()
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.state.read().plugins.iter().map(|e| e.info.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<PluginEntry>> {
        self.state
            .read()
            .plugins
            .iter()
            .find(|e| e.info.name == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister every plugin in registration order and stop accepting new
    /// ones. Returns the first `fini` error after all plugins are gone.
    pub fn shutdown(&self) -> Result<()> {
        let entries = self.entries();
        let mut first_err = None;
        for entry in &entries {
            if let Err(e) = self.unregister_entry(entry) {
                error!("[Registry] Could not unregister {}: {}", entry.info.name, e);
                first_err.get_or_insert(e);
            }
        }
        self.state.write().initialized = false;
        info!("[Registry] Shut down ({} plugins)", entries.len());
        first_err.map_or(Ok(()), Err)
    }
}
