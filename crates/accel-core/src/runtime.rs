//! # Runtime
//!
//! Owns the plugin registry, the session and resource managers, the
//! registration table and the per-boot run directory.
//!
//! ## Bootstrap
//!
//! ```text
//! rundir <base>/<uuid> ─► managers ─► registry ─► load configured plugins
//! ```
//!
//! ## Shutdown
//!
//! ```text
//! destroy resources ─► release sessions ─► unregister plugins ─► remove rundir
//! ```
//!
//! Each step runs even when an earlier one reported errors; the first error
//! is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{AccelError, Result};
use crate::plugin::PluginRegistry;
use crate::prof::ProfRegion;
use crate::registration::RegistrationTable;
use crate::resource::{Resource, ResourceManager};
use crate::session::SessionManager;

/// Runtime instance.
pub struct Runtime {
    config: RuntimeConfig,
    plugins: Arc<PluginRegistry>,
    links: Arc<RegistrationTable>,
    sessions: SessionManager,
    resources: ResourceManager,
    /// Set while bootstrapped. Also serializes bootstrap and shutdown.
    rundir: Mutex<Option<PathBuf>>,
    prof_genop: ProfRegion,
    prof_exec: ProfRegion,
    prof_dispatch: ProfRegion,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let plugins = Arc::new(PluginRegistry::new());
        let links = Arc::new(RegistrationTable::new());
        let sessions = SessionManager::new(plugins.clone(), links.clone());
        let resources = ResourceManager::new(links.clone());
        let profiling = config.profiling_enabled;
        Self {
            config,
            plugins,
            links,
            sessions,
            resources,
            rundir: Mutex::new(None),
            prof_genop: ProfRegion::new("genop", profiling),
            prof_exec: ProfRegion::new("exec", profiling),
            prof_dispatch: ProfRegion::new("dispatch", profiling),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn registrations(&self) -> &Arc<RegistrationTable> {
        &self.links
    }

    pub fn prof_genop(&self) -> &ProfRegion {
        &self.prof_genop
    }

    pub fn prof_exec(&self) -> &ProfRegion {
        &self.prof_exec
    }

    /// Plugin selection.
    pub fn prof_dispatch(&self) -> &ProfRegion {
        &self.prof_dispatch
    }

    /// Log every region's totals at debug level.
    pub fn prof_report(&self) {
        self.prof_genop.report();
        self.prof_exec.report();
        self.prof_dispatch.report();
    }

    /// Per-boot directory, while bootstrapped.
    pub fn rundir(&self) -> Option<PathBuf> {
        self.rundir.lock().clone()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.rundir.lock().is_some()
    }

    /// Bring the runtime up. Calling it again is a no-op. On failure every
    /// completed step is undone.
    pub fn bootstrap(&self) -> Result<()> {
        let mut rundir = self.rundir.lock();
        if rundir.is_some() {
            return Ok(());
        }

        let dir = self.config.rundir_base.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir).map_err(|e| {
            error!("[Runtime] Could not create run directory {}: {}", dir.display(), e);
            AccelError::from(e)
        })?;

        let staged = self
            .sessions
            .bootstrap()
            .and_then(|_| self.resources.bootstrap(dir.clone()))
            .map(|_| self.plugins.bootstrap(self.config.version_ignore))
            .and_then(|_| self.plugins.load_list(&self.config.plugins));

        if let Err(e) = staged {
            error!("[Runtime] Bootstrap failed: {}", e);
            if let Err(undo) = self.teardown(&dir) {
                warn!("[Runtime] Partial bootstrap not fully undone: {}", undo);
            }
            return Err(e);
        }

        info!(
            "[Runtime] Bootstrapped v{} (rundir {}, {} plugins)",
            crate::RUNTIME_VERSION,
            dir.display(),
            self.plugins.len()
        );
        *rundir = Some(dir);
        Ok(())
    }

    /// Tear everything down. A no-op when not bootstrapped.
    pub fn shutdown(&self) -> Result<()> {
        let mut rundir = self.rundir.lock();
        let Some(dir) = rundir.take() else {
            return Ok(());
        };
        let result = self.teardown(&dir);
        info!("[Runtime] Shut down");
        result
    }

    fn teardown(&self, dir: &Path) -> Result<()> {
        let mut first_err: Option<AccelError> = None;
        let mut note = |what: &str, e: AccelError| {
            warn!("[Runtime] {}: {}", what, e);
            first_err.get_or_insert(e);
        };

        if self.resources.is_bootstrapped() {
            // Aggregates go before the dependencies they pin
            let mut pending = self.resources.live();
            while !pending.is_empty() {
                let before = pending.len();
                let mut pinned = Vec::new();
                for resource in pending {
                    match self.release_resource(&resource) {
                        Ok(()) => {}
                        Err(AccelError::Busy(_)) if resource.dependents() > 0 => {
                            pinned.push(resource)
                        }
                        Err(e) => note("Could not release resource", e),
                    }
                }
                if pinned.len() == before {
                    for resource in &pinned {
                        note(
                            "Could not release resource",
                            AccelError::Busy(format!("resource {} is still pinned", resource.id())),
                        );
                    }
                    break;
                }
                pending = pinned;
            }
        }
        if self.sessions.is_bootstrapped() {
            for session in self.sessions.live() {
                if let Err(e) = self.sessions.release(&session) {
                    note("Could not release session", e);
                }
            }
        }
        if self.plugins.is_bootstrapped() {
            if let Err(e) = self.plugins.shutdown() {
                note("Plugin shutdown reported", e);
            }
        }
        if let Err(e) = std::fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                note("Could not remove run directory", e.into());
            }
        }

        self.sessions.finish_shutdown();
        self.resources.finish_shutdown();
        self.prof_report();

        first_err.map_or(Ok(()), Err)
    }

    /// Unregister `resource` from every session holding it, then destroy it.
    pub fn release_resource(&self, resource: &Resource) -> Result<()> {
        if resource.dependents() > 0 {
            return Err(AccelError::Busy(format!(
                "resource {} is a dependency of {} resource(s)",
                resource.id(),
                resource.dependents()
            )));
        }
        self.links
            .foreach_session(resource, |res, sess| self.sessions.unregister_resource(sess, res))?;
        self.resources.destroy(resource)
    }
}
