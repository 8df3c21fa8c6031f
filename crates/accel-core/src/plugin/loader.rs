//! Loading plugins from shared libraries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::{info, warn};

use super::{Plugin, PluginEntry, PluginEntryFn, PluginRegistry, PLUGIN_ENTRY_SYMBOL};
use crate::error::{AccelError, Result};

impl PluginRegistry {
    /// Open the library at `path`, resolve its entry point and register the
    /// plugin it returns. The library stays open until the plugin is gone.
    pub fn load(&self, path: &Path) -> Result<Arc<PluginEntry>> {
        if !self.is_bootstrapped() {
            return Err(AccelError::BackendNotReady("plugin registry not bootstrapped".into()));
        }
        if self.entries().iter().any(|e| e.path() == Some(path)) {
            return Err(AccelError::AlreadyExists(format!(
                "plugin library {} already loaded",
                path.display()
            )));
        }

        // SAFETY: loading runs the library's initializers; plugin libraries
        // are trusted configuration.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            warn!("[Loader] Could not open {}: {}", path.display(), e);
            AccelError::NotFound(format!("{}: {}", path.display(), e))
        })?;

        let entry_fn: PluginEntryFn = {
            // SAFETY: the symbol's type is fixed by `declare_plugin!`.
            let symbol: Symbol<PluginEntryFn> =
                unsafe { library.get(PLUGIN_ENTRY_SYMBOL) }.map_err(|e| {
                    AccelError::LibBad(format!("{}: no plugin entry point: {}", path.display(), e))
                })?;
            *symbol
        };

        let plugin: Arc<dyn Plugin> = Arc::from(entry_fn());
        let entry = self.register_with(plugin, Some(path.to_path_buf()), Some(library))?;
        info!(
            "[Loader] Loaded {} from {}",
            entry.info().name,
            path.display()
        );
        Ok(entry)
    }

    /// Load each library in order, stopping at the first failure.
    pub fn load_list(&self, paths: &[PathBuf]) -> Result<Vec<Arc<PluginEntry>>> {
        paths.iter().map(|p| self.load(p)).collect()
    }
}
