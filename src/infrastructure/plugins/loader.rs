//! Plugin loader - Discovers plugin files and brings them in and out of the registry

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use crate::application::errors::{HostError, PluginError};
use crate::application::messaging::buttons::ButtonRegistry;
use crate::application::metrics::MetricsStore;
use crate::application::scheduling::clock::Clock;
use crate::application::scheduling::supervisor::TaskSupervisor;
use crate::infrastructure::config::Config;
use crate::plugins::trait_def::{CleanupHook, PluginContext};
use super::importer::ModuleImporter;
use super::registry::{PluginRecord, PluginRegistry};

/// A plugin file that did not make it into the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadIssue {
    pub file: PathBuf,
    pub reason: String,
}

/// Result of a batch load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    /// Files without a default handler
    pub skipped: Vec<LoadIssue>,
    /// Files that failed to import or initialize
    pub failed: Vec<LoadIssue>,
}

/// Plugin loader
pub struct PluginLoader {
    plugin_dir: PathBuf,
    disabled_dir: PathBuf,
    importer: Arc<dyn ModuleImporter>,
    registry: Arc<PluginRegistry>,
    metrics: Arc<MetricsStore>,
    supervisor: Arc<TaskSupervisor>,
    buttons: Arc<ButtonRegistry>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    initialized: AtomicBool,
    /// Serializes batch loads
    load_lock: tokio::sync::Mutex<()>,
}

impl PluginLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        importer: Arc<dyn ModuleImporter>,
        registry: Arc<PluginRegistry>,
        metrics: Arc<MetricsStore>,
        supervisor: Arc<TaskSupervisor>,
        buttons: Arc<ButtonRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            plugin_dir: config.plugins.directory.clone(),
            disabled_dir: config.disabled_directory(),
            importer,
            registry,
            metrics,
            supervisor,
            buttons,
            config,
            clock,
            initialized: AtomicBool::new(false),
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Whether a batch load has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Plugin files in the plugins directory: plain files with the importer's
    /// extension whose name does not start with a dot. Subdirectories,
    /// `disabled/` included, are not searched.
    pub async fn discover(&self) -> Result<Vec<PathBuf>, HostError> {
        let mut files = Vec::new();

        if !self.plugin_dir.exists() {
            tracing::warn!("Plugin directory does not exist: {}", self.plugin_dir.display());
            return Ok(files);
        }

        let mut entries = tokio::fs::read_dir(&self.plugin_dir).await
            .map_err(|e| HostError::load(&self.plugin_dir, format!("Failed to read plugin directory: {}", e)))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Failed to stat {}: {}", path.display(), e);
                    continue;
                }
            }
            if self.is_plugin_file(&path) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    fn is_plugin_file(&self, path: &Path) -> bool {
        let hidden = path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        let matches_ext = path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e == self.importer.extension())
            .unwrap_or(false);
        !hidden && matches_ext
    }

    /// Stable plugin name: the file stem
    pub fn plugin_name(path: &Path) -> Option<String> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn file_for(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.{}", name, self.importer.extension()))
    }

    /// Load every plugin in the directory.
    ///
    /// With `force`, everything currently loaded is unloaded first. Without
    /// it, a second call returns the current registry contents untouched.
    pub async fn load_all(&self, force: bool) -> Result<LoadSummary, HostError> {
        let _guard = self.load_lock.lock().await;

        if !force && self.is_initialized() {
            return Ok(LoadSummary {
                loaded: self.registry.names(),
                ..Default::default()
            });
        }

        if force {
            self.unload_everything().await;
        }

        let mut summary = LoadSummary::default();
        for path in self.discover().await? {
            if let Some(name) = Self::plugin_name(&path).filter(|n| self.registry.contains(n)) {
                summary.loaded.push(name);
                continue;
            }

            match self.load_file(&path).await {
                Ok(name) => summary.loaded.push(name),
                Err(HostError::MissingHandler(file)) => {
                    tracing::warn!("Skipping {}: no default handler", file.display());
                    summary.skipped.push(LoadIssue {
                        file,
                        reason: "no default handler".to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to load plugin from {}: {}", path.display(), e);
                    summary.failed.push(LoadIssue {
                        file: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            "Plugins loaded: {} ok, {} skipped, {} failed",
            summary.loaded.len(),
            summary.skipped.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Import one file and register everything it exports
    pub async fn load_file(&self, path: &Path) -> Result<String, HostError> {
        let name = Self::plugin_name(path)
            .ok_or_else(|| HostError::load(path, "Invalid file name"))?;
        if self.registry.contains(&name) {
            return Err(HostError::AlreadyLoaded(name));
        }

        let instance = uuid::Uuid::new_v4();
        let module = self.importer.import(path, &instance.simple().to_string()).await?;
        let handler = module.handler.clone()
            .ok_or_else(|| HostError::MissingHandler(path.to_path_buf()))?;

        if let Some(init) = &module.init {
            let ctx = PluginContext {
                plugin_name: name.clone(),
                source: path.to_path_buf(),
                config: self.config.clone(),
            };
            let outcome = tokio::spawn(init(ctx)).await
                .unwrap_or_else(|e| Err(PluginError::from(e)));
            if let Err(e) = outcome {
                return Err(HostError::load(path, format!("init failed: {}", e)));
            }
        }

        let record = PluginRecord {
            name: name.clone(),
            instance,
            metadata: module.metadata.clone(),
            handler,
            command_handlers: module.command_handlers.clone(),
            source: path.to_path_buf(),
            loaded_at: self.clock.now(),
            enabled: true,
            has_scheduled_tasks: false,
            cleanup: module.cleanup.clone(),
        };
        if let Err(e) = self.registry.insert(record) {
            // The module was initialized, so it still gets its cleanup
            run_cleanup(&name, module.cleanup.clone()).await;
            return Err(e);
        }
        self.metrics.init(&name, instance);
        self.buttons.register(&name, module.button_handlers.clone());

        if !module.scheduled_tasks.is_empty() {
            let registration = self.supervisor.register_tasks(&name, &module.scheduled_tasks);
            if !registration.registered.is_empty() {
                self.registry.set_has_scheduled_tasks(&name, true)?;
            }
        }

        tracing::info!(
            "Loaded plugin: {} v{}",
            module.metadata.name.as_deref().unwrap_or(&name),
            module.metadata.version.as_deref().unwrap_or("0.0.0")
        );
        Ok(name)
    }

    /// Remove a plugin and everything registered on its behalf
    pub async fn unload(&self, name: &str) -> Result<PluginRecord, HostError> {
        let record = self.registry.remove(name, self.supervisor.as_ref())?;
        self.buttons.unregister_plugin(name);
        self.metrics.remove(name);
        run_cleanup(&record.name, record.cleanup.clone()).await;
        Ok(record)
    }

    /// Cancel all tasks, clear the registry, buttons and metrics
    pub async fn unload_everything(&self) {
        self.supervisor.cancel_all();
        let records = self.registry.clear();
        self.buttons.clear();
        self.metrics.clear();
        for record in records {
            run_cleanup(&record.name, record.cleanup).await;
        }
    }

    /// Unload `name` (if loaded) and import its file again
    pub async fn reload(&self, name: &str) -> Result<String, HostError> {
        let source = match self.registry.get(name) {
            Some(record) => {
                self.unload(name).await?;
                record.source
            }
            None => self.file_for(&self.plugin_dir, name),
        };

        if !source.exists() {
            return Err(HostError::NotFound(format!("plugin file {}", source.display())));
        }
        self.load_file(&source).await
    }

    /// Enable a loaded plugin, or promote its file out of `disabled/` and load it
    pub async fn enable(&self, name: &str) -> Result<(), HostError> {
        if self.registry.contains(name) {
            if !self.registry.set_enabled(name, true)? {
                tracing::info!("Enabled plugin: {}", name);
            }
            return Ok(());
        }

        let parked = self.file_for(&self.disabled_dir, name);
        let target = self.file_for(&self.plugin_dir, name);
        if parked.exists() {
            if target.exists() {
                tracing::warn!("Not moving {}: {} already exists", parked.display(), target.display());
                return Err(HostError::AlreadyLoaded(name.to_string()));
            }
            tokio::fs::rename(&parked, &target).await?;
            tracing::info!("Moved {} out of {}", name, self.disabled_dir.display());
        } else if !target.exists() {
            return Err(HostError::NotFound(name.to_string()));
        }

        self.load_file(&target).await.map(|_| ())
    }

    pub fn disable(&self, name: &str) -> Result<(), HostError> {
        if self.registry.set_enabled(name, false)? {
            tracing::info!("Disabled plugin: {}", name);
        }
        Ok(())
    }
}

async fn run_cleanup(name: &str, cleanup: Option<CleanupHook>) {
    let Some(cleanup) = cleanup else { return };
    let outcome = tokio::spawn(cleanup()).await
        .unwrap_or_else(|e| Err(PluginError::from(e)));
    if let Err(e) = outcome {
        tracing::warn!("Cleanup of {} failed: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::scheduling::clock::SystemClock;
    use crate::application::scheduling::cron::CronEvaluator;
    use crate::application::scheduling::supervisor::TaskKey;
    use crate::infrastructure::adapters::memory::MemoryTransport;
    use crate::infrastructure::plugins::importer::StaticImporter;
    use crate::infrastructure::plugins::registry::tests::record;
    use crate::plugins::trait_def::{event_handler, task_handler, PluginMetadata, PluginModule, TaskDescriptor};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        dir: PathBuf,
        importer: Arc<StaticImporter>,
        registry: Arc<PluginRegistry>,
        metrics: Arc<MetricsStore>,
        supervisor: Arc<TaskSupervisor>,
        buttons: Arc<ButtonRegistry>,
        loader: PluginLoader,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let mut config = Config::default();
        config.plugins.directory = dir.clone();
        let config = Arc::new(config);

        let importer = Arc::new(StaticImporter::default());
        let registry = Arc::new(PluginRegistry::new());
        let metrics = Arc::new(MetricsStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let supervisor = TaskSupervisor::new(
            registry.clone(),
            metrics.clone(),
            CronEvaluator::from_name("Africa/Lagos").unwrap(),
            clock.clone(),
            Arc::new(MemoryTransport::new()),
            config.clone(),
        );
        let buttons = Arc::new(ButtonRegistry::new());
        let loader = PluginLoader::new(
            config,
            importer.clone(),
            registry.clone(),
            metrics.clone(),
            supervisor.clone(),
            buttons.clone(),
            clock,
        );
        Fixture { _dir: tmp, dir, importer, registry, metrics, supervisor, buttons, loader }
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"").unwrap();
    }

    fn basic_module() -> PluginModule {
        PluginModule::new().with_handler(event_handler(|_, _, _| async { Ok(()) }))
    }

    #[tokio::test]
    async fn test_empty_directory_loads_nothing() {
        let fx = fixture();
        let summary = fx.loader.load_all(false).await.unwrap();
        assert_eq!(summary, LoadSummary::default());
        assert!(fx.loader.is_initialized());
    }

    #[tokio::test]
    async fn test_discover_applies_file_selection_rule() {
        let fx = fixture();
        touch(&fx.dir.join("economy.plugin"));
        touch(&fx.dir.join(".hidden.plugin"));
        touch(&fx.dir.join("notes.txt"));
        std::fs::create_dir(fx.dir.join("disabled")).unwrap();
        touch(&fx.dir.join("disabled").join("games.plugin"));
        std::fs::create_dir(fx.dir.join("folder.plugin")).unwrap();

        let files = fx.loader.discover().await.unwrap();
        assert_eq!(files, vec![fx.dir.join("economy.plugin")]);
    }

    #[tokio::test]
    async fn test_load_all_classifies_outcomes() {
        let fx = fixture();
        fx.importer.register_module("good", basic_module);
        fx.importer.register_module("headless", || PluginModule::new().with_metadata(PluginMetadata::new("Headless")));
        fx.importer.register("broken", || Err("unexpected token".to_string()));
        for stem in ["good", "headless", "broken"] {
            touch(&fx.dir.join(format!("{}.plugin", stem)));
        }

        let summary = fx.loader.load_all(false).await.unwrap();

        assert_eq!(summary.loaded, vec!["good".to_string()]);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.skipped[0].file.ends_with("headless.plugin"));
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].reason.contains("unexpected token"));
        assert!(fx.registry.get("good").unwrap().enabled);
        assert!(fx.metrics.get("good").is_some());
    }

    #[tokio::test]
    async fn test_load_all_without_force_runs_once() {
        let fx = fixture();
        fx.importer.register_module("good", basic_module);
        touch(&fx.dir.join("good.plugin"));

        fx.loader.load_all(false).await.unwrap();
        let second = fx.loader.load_all(false).await.unwrap();

        assert_eq!(second.loaded, vec!["good".to_string()]);
        assert_eq!(fx.importer.import_count(), 1);
    }

    #[tokio::test]
    async fn test_force_reload_resets_state_and_reimports() {
        let fx = fixture();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        fx.importer.register_module("good", move || {
            let counter = counter.clone();
            basic_module()
                .with_task(TaskDescriptor::new("tick", "* * * * *", task_handler(|_, _| async { Ok(()) })))
                .with_cleanup(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
        });
        touch(&fx.dir.join("good.plugin"));
        fx.loader.load_all(false).await.unwrap();
        let instance = fx.registry.get("good").unwrap().instance;
        fx.metrics.record_dispatch("good", instance, 5, false, Some("x"), chrono::Utc::now());

        let summary = fx.loader.load_all(true).await.unwrap();

        assert_eq!(summary.loaded, vec!["good".to_string()]);
        assert_eq!(fx.importer.import_count(), 2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(fx.metrics.get("good").unwrap().executions, 0);
        assert_eq!(fx.supervisor.get(&TaskKey::new("good", "tick")).unwrap().fires, 0);
    }

    #[tokio::test]
    async fn test_load_file_registers_buttons_and_tasks() {
        let fx = fixture();
        fx.importer.register_module("betting", || {
            basic_module()
                .with_button_handler("bet", event_handler(|_, _, _| async { Ok(()) }))
                .with_task(TaskDescriptor::new("settle", "0 * * * *", task_handler(|_, _| async { Ok(()) })))
                .with_task(TaskDescriptor::new("broken", "nonsense", task_handler(|_, _| async { Ok(()) })))
        });
        let path = fx.dir.join("betting.plugin");
        touch(&path);

        assert_eq!(fx.loader.load_file(&path).await.unwrap(), "betting");

        let record = fx.registry.get("betting").unwrap();
        assert!(record.has_scheduled_tasks);
        assert_eq!(record.source, path);
        assert!(fx.buttons.resolve("bet:42").is_some());
        assert_eq!(fx.supervisor.status().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_keeps_plugin_out() {
        let fx = fixture();
        fx.importer.register_module("db", || basic_module().with_init(|_| async { Err(PluginError::from("no database")) }));
        let path = fx.dir.join("db.plugin");
        touch(&path);

        let err = fx.loader.load_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("no database"));
        assert!(!fx.registry.contains("db"));
    }

    #[tokio::test]
    async fn test_unload_cancels_tasks_and_buttons() {
        let fx = fixture();
        fx.importer.register_module("betting", || {
            basic_module()
                .with_button_handler("bet", event_handler(|_, _, _| async { Ok(()) }))
                .with_task(TaskDescriptor::new("settle", "0 * * * *", task_handler(|_, _| async { Ok(()) })))
        });
        touch(&fx.dir.join("betting.plugin"));
        fx.loader.load_all(false).await.unwrap();

        fx.loader.unload("betting").await.unwrap();

        assert!(fx.supervisor.status().is_empty());
        assert!(fx.buttons.is_empty());
        assert!(fx.metrics.get("betting").is_none());
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_module() {
        let fx = fixture();
        let version = Arc::new(AtomicUsize::new(1));
        let v = version.clone();
        fx.importer.register_module("greeter", move || {
            let n = v.load(Ordering::SeqCst);
            basic_module().with_metadata(PluginMetadata::new("Greeter").with_version(format!("{}.0.0", n)))
        });
        touch(&fx.dir.join("greeter.plugin"));
        fx.loader.load_all(false).await.unwrap();

        version.store(2, Ordering::SeqCst);
        fx.loader.reload("greeter").await.unwrap();

        let record = fx.registry.get("greeter").unwrap();
        assert_eq!(record.metadata.version.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn test_reload_failure_leaves_plugin_absent() {
        let fx = fixture();
        fx.importer.register_module("greeter", basic_module);
        touch(&fx.dir.join("greeter.plugin"));
        fx.loader.load_all(false).await.unwrap();

        fx.importer.register("greeter", || Err("compile error".to_string()));
        assert!(fx.loader.reload("greeter").await.is_err());
        assert!(!fx.registry.contains("greeter"));
    }

    #[tokio::test]
    async fn test_enable_promotes_file_from_disabled_dir() {
        let fx = fixture();
        fx.importer.register_module("games", basic_module);
        std::fs::create_dir(fx.dir.join("disabled")).unwrap();
        touch(&fx.dir.join("disabled").join("games.plugin"));

        fx.loader.enable("games").await.unwrap();

        assert!(fx.dir.join("games.plugin").exists());
        assert!(!fx.dir.join("disabled").join("games.plugin").exists());
        assert!(fx.registry.is_enabled("games"));
    }

    #[tokio::test]
    async fn test_enable_refuses_to_overwrite_active_file() {
        let fx = fixture();
        fx.importer.register_module("games", basic_module);
        std::fs::create_dir(fx.dir.join("disabled")).unwrap();
        std::fs::write(fx.dir.join("disabled").join("games.plugin"), b"parked").unwrap();
        std::fs::write(fx.dir.join("games.plugin"), b"active").unwrap();

        let result = fx.loader.enable("games").await;

        assert!(matches!(result, Err(HostError::AlreadyLoaded(_))));
        assert_eq!(std::fs::read(fx.dir.join("games.plugin")).unwrap(), b"active");
        assert!(fx.dir.join("disabled").join("games.plugin").exists());
        assert!(!fx.registry.contains("games"));
    }

    #[tokio::test]
    async fn test_rejected_descriptors_do_not_count_as_scheduled_tasks() {
        let fx = fixture();
        fx.importer.register_module("clock", || {
            basic_module()
                .with_task(TaskDescriptor::new("broken", "nonsense", task_handler(|_, _| async { Ok(()) })))
                .with_task(TaskDescriptor { name: Some("nameless".to_string()), ..Default::default() })
        });
        let path = fx.dir.join("clock.plugin");
        touch(&path);

        fx.loader.load_file(&path).await.unwrap();

        assert!(!fx.registry.get("clock").unwrap().has_scheduled_tasks);
        assert!(fx.supervisor.status().is_empty());
    }

    #[tokio::test]
    async fn test_lost_insert_race_runs_cleanup() {
        let fx = fixture();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        let registry = fx.registry.clone();
        fx.importer.register_module("poller", move || {
            let counter = counter.clone();
            let registry = registry.clone();
            basic_module()
                .with_button_handler("poll", event_handler(|_, _, _| async { Ok(()) }))
                .with_init(move |_| {
                    // Another load of the same name wins while this one initializes
                    let registry = registry.clone();
                    async move {
                        let _ = registry.insert(record("poller"));
                        Ok(())
                    }
                })
                .with_cleanup(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
        });
        let path = fx.dir.join("poller.plugin");
        touch(&path);

        let result = fx.loader.load_file(&path).await;

        assert!(matches!(result, Err(HostError::AlreadyLoaded(_))));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(fx.buttons.resolve("poll:1").is_none());
        assert!(fx.metrics.get("poller").is_none());
    }

    #[tokio::test]
    async fn test_in_flight_sample_from_previous_load_is_dropped() {
        let fx = fixture();
        fx.importer.register_module("greeter", basic_module);
        touch(&fx.dir.join("greeter.plugin"));
        fx.loader.load_all(false).await.unwrap();
        let old = fx.registry.get("greeter").unwrap().instance;

        fx.loader.reload("greeter").await.unwrap();
        let late = fx.metrics.record_dispatch("greeter", old, 5, false, Some("late"), chrono::Utc::now());

        assert!(late.is_none());
        assert_ne!(fx.registry.get("greeter").unwrap().instance, old);
        assert_eq!(fx.metrics.get("greeter").unwrap().executions, 0);
    }

    #[tokio::test]
    async fn test_enable_unknown_plugin_is_not_found() {
        let fx = fixture();
        assert!(matches!(fx.loader.enable("ghost").await, Err(HostError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_disable_keeps_file_in_place() {
        let fx = fixture();
        fx.importer.register_module("games", basic_module);
        touch(&fx.dir.join("games.plugin"));
        fx.loader.load_all(false).await.unwrap();

        fx.loader.disable("games").unwrap();

        assert!(!fx.registry.is_enabled("games"));
        assert!(fx.dir.join("games.plugin").exists());
    }
}
