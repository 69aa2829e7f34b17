//! Plugin manager - handles plugin lifecycle, dispatch and supervision

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use crate::application::errors::{HostError, PluginError};
use crate::application::messaging::{ButtonRegistry, DispatchSettings, DispatchSummary, MessageDispatcher};
use crate::application::metrics::{MetricsStore, PluginMetrics};
use crate::application::scheduling::{Clock, CronEvaluator, FireOutcome, SystemClock, TaskKey, TaskStatus, TaskSupervisor};
use crate::application::services::{CommandService, HealthMonitor, HealthReport};
use crate::domain::entities::{CommandDescriptor, Event};
use crate::domain::traits::Transport;
use crate::infrastructure::adapters::memory::MemoryTransport;
use crate::infrastructure::config::Config;
use crate::infrastructure::plugins::importer::{ModuleImporter, NativeImporter};
use crate::infrastructure::plugins::loader::{LoadSummary, PluginLoader};
use crate::infrastructure::plugins::registry::PluginRegistry;

/// Operator view of one loaded plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginStats {
    pub name: String,
    pub display_name: String,
    pub version: Option<String>,
    pub category: Option<String>,
    pub enabled: bool,
    pub loaded_at: DateTime<Utc>,
    pub has_scheduled_tasks: bool,
    pub commands: Vec<String>,
    pub metrics: PluginMetrics,
    pub error_rate: f64,
    pub average_execution_ms: f64,
}

/// Builder for [`PluginManager`]
pub struct PluginManagerBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    importer: Option<Arc<dyn ModuleImporter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PluginManagerBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn importer(mut self, importer: Arc<dyn ModuleImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Arc<PluginManager>, HostError> {
        self.config.validate()?;
        let evaluator = CronEvaluator::from_name(&self.config.scheduler.timezone)?;
        let config = Arc::new(self.config);

        let transport = self.transport.unwrap_or_else(|| Arc::new(MemoryTransport::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let importer = self.importer.unwrap_or_else(|| {
            let scratch = config.plugins.scratch_directory.clone()
                .unwrap_or_else(|| std::env::temp_dir().join("plugin-host-scratch"));
            Arc::new(NativeImporter::new(scratch))
        });

        let registry = Arc::new(PluginRegistry::new());
        let metrics = Arc::new(MetricsStore::new());
        let buttons = Arc::new(ButtonRegistry::new());
        let supervisor = TaskSupervisor::new(
            registry.clone(),
            metrics.clone(),
            evaluator,
            clock.clone(),
            transport.clone(),
            config.clone(),
        );
        let loader = Arc::new(PluginLoader::new(
            config.clone(),
            importer,
            registry.clone(),
            metrics.clone(),
            supervisor.clone(),
            buttons.clone(),
            clock.clone(),
        ));
        let dispatcher = MessageDispatcher::new(
            registry.clone(),
            metrics.clone(),
            loader.clone(),
            buttons,
            clock.clone(),
            DispatchSettings::from_config(&config),
        );
        let health = HealthMonitor::new(
            registry.clone(),
            metrics.clone(),
            supervisor.clone(),
            clock,
            config.health.clone(),
        );

        Ok(Arc::new(PluginManager {
            commands: CommandService::new(registry.clone()),
            config,
            transport,
            registry,
            metrics,
            supervisor,
            loader,
            dispatcher,
            health,
            monitors: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }))
    }
}

/// Owns every host component and exposes the lifecycle and inspection API
pub struct PluginManager {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    registry: Arc<PluginRegistry>,
    metrics: Arc<MetricsStore>,
    supervisor: Arc<TaskSupervisor>,
    loader: Arc<PluginLoader>,
    dispatcher: MessageDispatcher,
    health: HealthMonitor,
    commands: CommandService,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl PluginManager {
    pub fn builder(config: Config) -> PluginManagerBuilder {
        PluginManagerBuilder {
            config,
            transport: None,
            importer: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), HostError> {
        if self.is_shut_down() {
            Err(HostError::ShutDown)
        } else {
            Ok(())
        }
    }

    // Lifecycle

    pub async fn load_all(&self, force: bool) -> Result<LoadSummary, HostError> {
        self.ensure_running()?;
        self.loader.load_all(force).await
    }

    /// Unload one plugin (cancelling its tasks) and load its file again.
    /// Its metrics start from zero.
    pub async fn reload(&self, name: &str) -> Result<String, HostError> {
        self.ensure_running()?;
        info!("Reloading plugin: {}", name);
        self.loader.reload(name).await
    }

    pub async fn reload_all(&self) -> Result<LoadSummary, HostError> {
        self.ensure_running()?;
        info!("Reloading all plugins");
        self.loader.load_all(true).await
    }

    pub async fn enable(&self, name: &str) -> Result<(), HostError> {
        self.ensure_running()?;
        self.loader.enable(name).await
    }

    pub fn disable(&self, name: &str) -> Result<(), HostError> {
        self.ensure_running()?;
        self.loader.disable(name)
    }

    /// Fire a scheduled task now, outside its cron schedule
    pub async fn trigger_scheduled_task(&self, key: &TaskKey) -> Result<FireOutcome, HostError> {
        self.ensure_running()?;
        match self.supervisor.fire(key).await {
            FireOutcome::NotFound | FireOutcome::SkippedPluginUnknown => {
                Err(HostError::NotFound(format!("scheduled task {}", key)))
            }
            outcome => Ok(outcome),
        }
    }

    // Events

    /// Fan an event out to every enabled plugin through the host's transport
    pub async fn dispatch(&self, event: Event) -> DispatchSummary {
        self.dispatch_with(Arc::new(event), self.transport.clone()).await
    }

    pub async fn dispatch_with(&self, event: Arc<Event>, transport: Arc<dyn Transport>) -> DispatchSummary {
        self.dispatcher.dispatch(event, transport, self.config.clone()).await
    }

    /// Run the command handler matching a command event
    pub async fn execute_command(&self, event: Event) -> Result<Option<(String, Result<(), PluginError>)>, HostError> {
        self.ensure_running()?;
        self.commands.execute(Arc::new(event), self.transport.clone(), self.config.clone()).await
    }

    // Inspection

    pub fn commands(&self) -> Vec<(String, CommandDescriptor)> {
        self.commands.commands()
    }

    pub fn find_command(&self, name: &str) -> Option<(String, CommandDescriptor)> {
        self.commands.find(name)
    }

    pub fn plugin_stats(&self) -> Vec<PluginStats> {
        let snapshot = self.metrics.snapshot();
        self.registry.list()
            .into_iter()
            .map(|record| {
                let metrics = snapshot.get(&record.name).cloned().unwrap_or_default();
                PluginStats {
                    display_name: record.metadata.name.clone().unwrap_or_else(|| record.name.clone()),
                    version: record.metadata.version.clone(),
                    category: record.metadata.category.clone(),
                    enabled: record.enabled,
                    loaded_at: record.loaded_at,
                    has_scheduled_tasks: record.has_scheduled_tasks,
                    commands: record.metadata.commands.iter().map(|c| c.name.clone()).collect(),
                    error_rate: metrics.error_rate(),
                    average_execution_ms: metrics.average_execution_ms(),
                    metrics,
                    name: record.name,
                }
            })
            .collect()
    }

    pub fn plugin_metrics(&self, name: &str) -> Option<PluginMetrics> {
        self.metrics.get(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.registry.is_enabled(name)
    }

    pub fn scheduled_task_status(&self) -> Vec<TaskStatus> {
        self.supervisor.status()
    }

    /// Latest health report, if a check has run
    pub fn health(&self) -> Option<HealthReport> {
        self.health.latest()
    }

    pub fn check_health(&self) -> HealthReport {
        self.health.check()
    }

    /// Reload everything when the latest report has too many critical issues.
    /// Returns whether a reload happened.
    pub async fn run_cascade_check(&self) -> Result<bool, HostError> {
        self.ensure_running()?;
        if !self.health.needs_forced_reload() {
            return Ok(false);
        }
        let critical = self.health.latest().map(|r| r.critical_issue_count).unwrap_or_default();
        warn!("{} critical health issues, forcing a full plugin reload", critical);
        self.reload_all().await?;
        Ok(true)
    }

    /// Start the periodic health check and the critical-issue cascade.
    /// The first tick of each loop comes one full interval after start.
    pub fn start(self: &Arc<Self>) -> Result<(), HostError> {
        self.ensure_running()?;
        let mut monitors = self.monitors.lock()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;
        if !monitors.is_empty() {
            return Ok(());
        }

        let settings = self.health.settings();
        let health_every = Duration::from_secs(settings.interval_secs);
        let cascade_every = Duration::from_secs(settings.cascade_interval_secs);

        monitors.push(spawn_periodic(Arc::downgrade(self), health_every, |manager| async move {
            manager.check_health();
        }));
        monitors.push(spawn_periodic(Arc::downgrade(self), cascade_every, |manager| async move {
            if let Err(e) = manager.run_cascade_check().await {
                error!("Forced reload failed: {}", e);
            }
        }));

        info!(
            "Health monitor started (check every {}s, cascade every {}s)",
            health_every.as_secs(),
            cascade_every.as_secs()
        );
        Ok(())
    }

    /// Stop monitors and scheduled tasks, give in-flight handlers the grace
    /// period, then unload every plugin. Calling it again does nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down plugin host");

        self.dispatcher.close();
        if let Ok(mut monitors) = self.monitors.lock() {
            for monitor in monitors.drain(..) {
                monitor.abort();
            }
        }
        self.supervisor.cancel_all();

        let in_flight = self.dispatcher.in_flight();
        if !in_flight.wait_idle(self.config.shutdown_grace()).await {
            warn!(
                "{} handler invocations still running after {}s grace",
                in_flight.current(),
                self.config.shutdown_grace_secs
            );
        }

        self.loader.unload_everything().await;
        info!("Plugin host stopped");
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if let Ok(mut monitors) = self.monitors.lock() {
            for monitor in monitors.drain(..) {
                monitor.abort();
            }
        }
    }
}

fn spawn_periodic<F, Fut>(manager: Weak<PluginManager>, every: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(Arc<PluginManager>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(manager) = manager.upgrade() else { break };
            if manager.is_shut_down() {
                break;
            }
            tick(manager).await;
        }
    })
}
