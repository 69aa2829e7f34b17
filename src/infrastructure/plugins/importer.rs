//! Module importers - Turn a plugin file into a [`PluginModule`]

use async_trait::async_trait;
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use crate::application::errors::HostError;
use crate::plugins::trait_def::{PluginEntryFn, PluginModule, PLUGIN_ENTRY_SYMBOL};

/// Imports (evaluates) plugin files
#[async_trait]
pub trait ModuleImporter: Send + Sync {
    /// File extension recognized as a plugin, without the dot
    fn extension(&self) -> &str;

    /// Import the module at `path`. `nonce` is fresh on every call so that
    /// repeated imports of the same path never hit a module cache.
    async fn import(&self, path: &Path, nonce: &str) -> Result<PluginModule, HostError>;
}

/// Loads plugins from native shared libraries.
///
/// The dynamic loader caches images by path, so each import first copies the
/// library to `<scratch>/<stem>-<nonce>.<ext>` and opens the copy.
/// Libraries are never closed: handler futures from an older version may
/// still be running code that lives in them.
pub struct NativeImporter {
    scratch_dir: PathBuf,
    libraries: Mutex<Vec<Arc<Library>>>,
}

impl NativeImporter {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            libraries: Mutex::new(Vec::new()),
        }
    }

    pub fn loaded_libraries(&self) -> usize {
        self.libraries.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn open(path: &Path) -> Result<(Library, PluginModule), HostError> {
        let library = unsafe {
            Library::new(path)
                .map_err(|e| HostError::load(path, format!("Failed to load library: {}", e)))?
        };

        let module = unsafe {
            let entry: Symbol<PluginEntryFn> = library.get(PLUGIN_ENTRY_SYMBOL)
                .map_err(|e| HostError::load(path, format!("Failed to find entry symbol: {}", e)))?;
            let module_ptr = entry();
            if module_ptr.is_null() {
                return Err(HostError::load(path, "Plugin entry returned null"));
            }
            *Box::from_raw(module_ptr)
        };

        Ok((library, module))
    }
}

#[async_trait]
impl ModuleImporter for NativeImporter {
    fn extension(&self) -> &str {
        std::env::consts::DLL_EXTENSION
    }

    async fn import(&self, path: &Path, nonce: &str) -> Result<PluginModule, HostError> {
        let stem = path.file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HostError::load(path, "Invalid file name"))?;

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let staged = self.scratch_dir.join(format!("{}-{}.{}", stem, nonce, self.extension()));
        tokio::fs::copy(path, &staged).await
            .map_err(|e| HostError::load(path, format!("Failed to stage library: {}", e)))?;

        let opened = {
            let staged = staged.clone();
            tokio::task::spawn_blocking(move || Self::open(&staged)).await
                .map_err(|e| HostError::load(path, format!("Loader task failed: {}", e)))?
        };

        // The mapped image stays valid after unlinking on unix; elsewhere the
        // copy is left behind in the scratch directory.
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            tracing::debug!("Could not remove staged library {}: {}", staged.display(), e);
        }

        let (library, module) = opened?;
        self.libraries.lock()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?
            .push(Arc::new(library));
        Ok(module)
    }
}

/// Produces a fresh module on every import
pub type ModuleFactory = Arc<dyn Fn() -> Result<PluginModule, String> + Send + Sync>;

/// Importer for plugins compiled into the host.
///
/// Plugin files on disk act as markers: the file stem selects a registered
/// factory, which is called anew on every import.
pub struct StaticImporter {
    extension: String,
    factories: RwLock<HashMap<String, ModuleFactory>>,
    imports: AtomicUsize,
}

impl StaticImporter {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            factories: RwLock::new(HashMap::new()),
            imports: AtomicUsize::new(0),
        }
    }

    /// Register (or replace) the factory for a file stem
    pub fn register<F>(&self, stem: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<PluginModule, String> + Send + Sync + 'static,
    {
        if let Ok(mut factories) = self.factories.write() {
            factories.insert(stem.into(), Arc::new(factory));
        }
    }

    pub fn register_module<F>(&self, stem: impl Into<String>, build: F)
    where
        F: Fn() -> PluginModule + Send + Sync + 'static,
    {
        self.register(stem, move || Ok(build()));
    }

    /// Number of imports performed so far
    pub fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }
}

impl Default for StaticImporter {
    fn default() -> Self {
        Self::new("plugin")
    }
}

#[async_trait]
impl ModuleImporter for StaticImporter {
    fn extension(&self) -> &str {
        &self.extension
    }

    async fn import(&self, path: &Path, nonce: &str) -> Result<PluginModule, HostError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        let stem = path.file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HostError::load(path, "Invalid file name"))?;

        let factory = self.factories.read()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?
            .get(stem)
            .cloned()
            .ok_or_else(|| HostError::load(path, format!("No module registered for '{}'", stem)))?;

        tracing::debug!("Importing {} (nonce {})", stem, nonce);
        factory().map_err(|reason| HostError::load(path, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_importer_calls_factory_per_import() {
        let importer = StaticImporter::default();
        importer.register_module("echo", || PluginModule::new());

        importer.import(Path::new("/p/echo.plugin"), "n1").await.unwrap();
        importer.import(Path::new("/p/echo.plugin"), "n2").await.unwrap();

        assert_eq!(importer.import_count(), 2);
    }

    #[tokio::test]
    async fn test_static_importer_reports_unknown_and_failing_modules() {
        let importer = StaticImporter::default();
        importer.register("broken", || Err("syntax error at line 3".to_string()));

        let unknown = importer.import(Path::new("/p/ghost.plugin"), "n").await;
        assert!(matches!(unknown, Err(HostError::Load { .. })));

        let broken = importer.import(Path::new("/p/broken.plugin"), "n").await;
        match broken {
            Err(HostError::Load { reason, .. }) => assert!(reason.contains("syntax error")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_native_importer_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(format!("fake.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&file, b"not a shared object").unwrap();
        let importer = NativeImporter::new(dir.path().join("scratch"));

        let result = importer.import(&file, "abc").await;

        assert!(matches!(result, Err(HostError::Load { .. })));
        assert_eq!(importer.loaded_libraries(), 0);
    }
}
