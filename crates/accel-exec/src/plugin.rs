//! The `exec` plugin.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use accel_core::resource::ResourceFile;
use accel_core::{
    AccelError, Arg, OpImpl, OpType, Plugin, PluginContext, PluginFlags, PluginInfo, Resource,
    ResourceType, Result, Session,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ExecConfig;
use crate::loader::{CodeLoader, CodeUnit, NativeLoader, UnitSource, Visibility};

/// Units opened for one Lib resource, cached on the resource between calls.
struct LoadedUnits {
    // Unloaded before its dependencies.
    primary: Box<dyn CodeUnit>,
    _deps: Vec<Box<dyn CodeUnit>>,
}

struct ExecInner {
    config: ExecConfig,
    loader: Arc<dyn CodeLoader>,
    /// Units opened by path, kept while unloading is disabled.
    by_path: Mutex<HashMap<PathBuf, Arc<dyn CodeUnit>>>,
}

impl ExecInner {
    fn exec(
        &self,
        session: &Session,
        library: &str,
        symbol: &str,
        read: &mut [Arg],
        write: &mut [Arg],
    ) -> Result<()> {
        if library.is_empty() || symbol.is_empty() {
            return Err(AccelError::InvalidArgument("exec needs a library and a symbol".into()));
        }
        debug!("[Exec] Session {} exec {}:{}", session.id(), library, symbol);

        let path = PathBuf::from(library);
        let cached = self.by_path.lock().get(&path).cloned();
        let unit = match cached {
            Some(unit) => unit,
            None => {
                let unit: Arc<dyn CodeUnit> =
                    Arc::from(self.loader.open(UnitSource::Path(&path), Visibility::Global)?);
                if !self.config.dlclose_enabled {
                    self.by_path.lock().insert(path, unit.clone());
                }
                unit
            }
        };
        unit.call(symbol, read, write)
    }

    fn exec_with_resource(
        &self,
        session: &Session,
        resource: &Resource,
        symbol: &str,
        read: &mut [Arg],
        write: &mut [Arg],
    ) -> Result<()> {
        if resource.rtype() != ResourceType::Lib {
            return Err(AccelError::InvalidArgument(format!(
                "resource {} is {}, not lib",
                resource.id(),
                resource.rtype()
            )));
        }
        debug!(
            "[Exec] Session {} exec {} from resource {}",
            session.id(),
            symbol,
            resource.id()
        );

        let cached = resource.with_plugin_priv(|units: &mut Arc<LoadedUnits>| units.clone());
        let units = match cached {
            Some(units) => units,
            None => {
                let units = Arc::new(self.load_resource(resource)?);
                if !self.config.dlclose_enabled {
                    resource.set_plugin_priv(units.clone());
                }
                units
            }
        };
        units.primary.call(symbol, read, write)
    }

    /// Dependencies first with global visibility, then the resource's own
    /// files; the first file is the one symbols are resolved in. A failure
    /// drops only the units opened so far.
    fn load_resource(&self, resource: &Resource) -> Result<LoadedUnits> {
        let files = resource.files();
        let (primary, extra) = files.split_first().ok_or_else(|| {
            AccelError::InvalidArgument(format!("resource {} has no files", resource.id()))
        })?;

        let mut deps = Vec::new();
        for dep in resource.deps() {
            for file in dep.files() {
                deps.push(self.open_file(&file, Visibility::Global)?);
            }
        }
        for file in extra {
            deps.push(self.open_file(file, Visibility::Global)?);
        }
        let primary = self.open_file(primary, Visibility::Local)?;

        info!(
            "[Exec] Loaded resource {} ({} with {} dependencies)",
            resource.id(),
            primary.name(),
            deps.len()
        );
        Ok(LoadedUnits {
            primary,
            _deps: deps,
        })
    }

    fn open_file(&self, file: &ResourceFile, visibility: Visibility) -> Result<Box<dyn CodeUnit>> {
        match (file.path(), file.data()) {
            (Some(path), _) => self.loader.open(UnitSource::Path(path), visibility),
            (None, Some(bytes)) => self.loader.open(
                UnitSource::Memory {
                    name: file.name(),
                    bytes: &bytes[..],
                },
                visibility,
            ),
            (None, None) => Err(AccelError::InvalidArgument(format!(
                "file {} has neither path nor contents",
                file.name()
            ))),
        }
    }
}

/// Runs user functions from shared objects.
pub struct ExecPlugin {
    inner: Arc<ExecInner>,
}

impl ExecPlugin {
    pub const NAME: &'static str = "exec";

    pub fn new(config: ExecConfig) -> Self {
        let loader = Arc::new(NativeLoader::new(config.dlopen_mode));
        Self::with_loader(config, loader)
    }

    pub fn from_env() -> Self {
        Self::new(ExecConfig::from_env())
    }

    /// Use `loader` instead of the platform dynamic linker.
    pub fn with_loader(config: ExecConfig, loader: Arc<dyn CodeLoader>) -> Self {
        Self {
            inner: Arc::new(ExecInner {
                config,
                loader,
                by_path: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.inner.config
    }

    /// Units currently kept open by path.
    pub fn cached_units(&self) -> usize {
        self.inner.by_path.lock().len()
    }
}

impl Plugin for ExecPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(Self::NAME, env!("CARGO_PKG_VERSION"), PluginFlags::CPU)
    }

    fn init(&self, ctx: &PluginContext<'_>) -> Result<()> {
        let exec = self.inner.clone();
        let with_resource = self.inner.clone();
        ctx.register_ops(vec![
            (
                OpType::Noop,
                OpImpl::noop(|session| {
                    debug!("[Exec] Calling no-op for session {}", session.id());
                    Ok(())
                }),
            ),
            (
                OpType::Exec,
                OpImpl::exec(move |session, library, symbol, read, write| {
                    exec.exec(session, library, symbol, read, write)
                }),
            ),
            (
                OpType::ExecWithResource,
                OpImpl::exec_with_resource(move |session, resource, symbol, read, write| {
                    with_resource.exec_with_resource(session, resource, symbol, read, write)
                }),
            ),
        ])
    }

    fn fini(&self) -> Result<()> {
        let dropped = {
            let mut by_path = self.inner.by_path.lock();
            std::mem::take(&mut *by_path)
        };
        if !dropped.is_empty() {
            info!("[Exec] Unloading {} cached units", dropped.len());
        }
        Ok(())
    }
}
