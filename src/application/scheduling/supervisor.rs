//! Scheduled task supervisor.
//!
//! Each registered task gets a cron driver: a tokio task that sleeps until the
//! next firing instant and then spawns a fire. Fires of the same task never
//! overlap (a firing that arrives while the previous one is running is
//! dropped). Consecutive failures are counted and a task whose streak exceeds
//! the quarantine threshold has its driver stopped until the owning plugin is
//! reloaded.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use crate::application::errors::{HostError, PluginError};
use crate::application::metrics::MetricsStore;
use crate::domain::traits::Transport;
use crate::infrastructure::config::Config;
use crate::infrastructure::plugins::registry::{PluginRegistry, TaskCanceller};
use crate::plugins::trait_def::{TaskDescriptor, TaskHandler};
use super::clock::Clock;
use super::cron::{CronEvaluator, CronSchedule};

/// Identifies a task as `plugin:task`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    pub plugin: String,
    pub task: String,
}

impl TaskKey {
    pub fn new(plugin: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            task: task.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.task)
    }
}

impl FromStr for TaskKey {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((plugin, task)) if !plugin.is_empty() && !task.is_empty() => Ok(TaskKey::new(plugin, task)),
            _ => Err(HostError::NotFound(format!("task key '{}' (expected plugin:task)", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Scheduled,
    Running,
    Quarantined,
    Cancelled,
}

/// What happened to a single fire request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    Failed(PluginError),
    /// Failed and crossed the quarantine threshold
    Quarantined(PluginError),
    /// Previous fire still running
    SkippedOverlap,
    SkippedPluginDisabled,
    SkippedPluginUnknown,
    SkippedQuarantined,
    NotFound,
}

/// Read-only view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub key: TaskKey,
    pub cron: String,
    pub description: Option<String>,
    pub state: TaskState,
    pub registered_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_fired: Option<DateTime<Utc>>,
    pub error_streak: u32,
    pub fires: u64,
    pub armed: bool,
}

impl TaskStatus {
    /// Last successful run, or registration time when it never succeeded
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_run.unwrap_or(self.registered_at)
    }
}

/// Tasks per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub scheduled: usize,
    pub running: usize,
    pub quarantined: usize,
}

/// Outcome of registering a plugin's descriptors
#[derive(Debug, Default)]
pub struct TaskRegistration {
    pub registered: Vec<TaskKey>,
    pub skipped: Vec<HostError>,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub quarantine_threshold: u32,
    pub stuck_threshold: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            quarantine_threshold: config.scheduler.quarantine_threshold,
            stuck_threshold: Duration::seconds(config.scheduler.stuck_threshold_secs as i64),
        }
    }
}

struct TaskEntry {
    /// Distinguishes a re-registered task from the one an in-flight fire started on
    generation: u64,
    schedule: CronSchedule,
    description: Option<String>,
    handler: TaskHandler,
    registered_at: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    last_fired: Option<DateTime<Utc>>,
    error_streak: u32,
    fires: u64,
    state: TaskState,
    driver: Option<JoinHandle<()>>,
}

impl TaskEntry {
    fn stop_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }

    fn status(&self, key: &TaskKey) -> TaskStatus {
        TaskStatus {
            key: key.clone(),
            cron: self.schedule.expression().to_string(),
            description: self.description.clone(),
            state: self.state,
            registered_at: self.registered_at,
            last_run: self.last_run,
            last_fired: self.last_fired,
            error_streak: self.error_streak,
            fires: self.fires,
            armed: self.driver.is_some(),
        }
    }
}

struct Tasks {
    entries: HashMap<TaskKey, TaskEntry>,
    next_generation: u64,
}

/// Registers, fires and polices scheduled tasks
pub struct TaskSupervisor {
    tasks: Mutex<Tasks>,
    registry: Arc<PluginRegistry>,
    metrics: Arc<MetricsStore>,
    evaluator: CronEvaluator,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    settings: SupervisorSettings,
    this: Weak<TaskSupervisor>,
}

impl TaskSupervisor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        metrics: Arc<MetricsStore>,
        evaluator: CronEvaluator,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        let settings = SupervisorSettings::from_config(&config);
        Arc::new_cyclic(|this| Self {
            tasks: Mutex::new(Tasks {
                entries: HashMap::new(),
                next_generation: 0,
            }),
            registry,
            metrics,
            evaluator,
            clock,
            transport,
            config,
            settings,
            this: this.clone(),
        })
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Tasks> {
        // A panic while holding this lock cannot leave an entry half-written,
        // so a poisoned guard is still usable.
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register every valid descriptor of a plugin and start its cron driver.
    /// Invalid descriptors are skipped with a warning.
    pub fn register_tasks(&self, plugin: &str, descriptors: &[TaskDescriptor]) -> TaskRegistration {
        let mut report = TaskRegistration::default();

        for (index, descriptor) in descriptors.iter().enumerate() {
            match self.validate(plugin, index, descriptor) {
                Ok((key, schedule, handler)) => {
                    if self.insert_task(key.clone(), schedule, descriptor.description.clone(), handler) {
                        tracing::info!("Scheduled task {} registered ({})", key, descriptor.schedule.as_deref().unwrap_or_default());
                        report.registered.push(key);
                    } else {
                        let err = HostError::TaskRegistration {
                            plugin: plugin.to_string(),
                            task: key.task,
                            reason: "duplicate task name".to_string(),
                        };
                        tracing::warn!("{}", err);
                        report.skipped.push(err);
                    }
                }
                Err(err) => {
                    tracing::warn!("{}", err);
                    report.skipped.push(err);
                }
            }
        }

        report
    }

    fn validate(
        &self,
        plugin: &str,
        index: usize,
        descriptor: &TaskDescriptor,
    ) -> Result<(TaskKey, CronSchedule, TaskHandler), HostError> {
        let label = descriptor.name.clone().unwrap_or_else(|| format!("#{}", index));
        let invalid = |reason: String| HostError::TaskRegistration {
            plugin: plugin.to_string(),
            task: label.clone(),
            reason,
        };

        let name = descriptor.name.as_deref().filter(|n| !n.trim().is_empty())
            .ok_or_else(|| invalid("missing name".to_string()))?;
        let expr = descriptor.schedule.as_deref().filter(|s| !s.trim().is_empty())
            .ok_or_else(|| invalid("missing schedule".to_string()))?;
        let handler = descriptor.handler.clone()
            .ok_or_else(|| invalid("missing handler".to_string()))?;
        let schedule = self.evaluator.parse(expr).map_err(|e| invalid(e.to_string()))?;

        Ok((TaskKey::new(plugin, name), schedule, handler))
    }

    fn insert_task(&self, key: TaskKey, schedule: CronSchedule, description: Option<String>, handler: TaskHandler) -> bool {
        let mut tasks = self.lock();
        if tasks.entries.contains_key(&key) {
            return false;
        }
        tasks.next_generation += 1;
        let generation = tasks.next_generation;
        let driver = self.spawn_driver(key.clone(), schedule.clone());
        tasks.entries.insert(key, TaskEntry {
            generation,
            schedule,
            description,
            handler,
            registered_at: self.clock.now(),
            last_run: None,
            last_fired: None,
            error_streak: 0,
            fires: 0,
            state: TaskState::Scheduled,
            driver,
        });
        true
    }

    fn spawn_driver(&self, key: TaskKey, schedule: CronSchedule) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Cannot arm scheduled task {}: no async runtime ({})", key, e);
                return None;
            }
        };
        let this = self.this.clone();
        let clock = self.clock.clone();

        Some(runtime.spawn(async move {
            let mut cursor = clock.now();
            loop {
                let Some(next) = schedule.next_after(cursor) else {
                    tracing::warn!("Scheduled task {} has no future occurrence", key);
                    break;
                };
                let wait = (next - clock.now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                cursor = next.max(clock.now());

                let Some(supervisor) = this.upgrade() else { break };
                let key = key.clone();
                tokio::spawn(async move {
                    supervisor.fire(&key).await;
                });
            }
        }))
    }

    /// Run a task once. Used by cron drivers and by manual triggers; both
    /// honor the plugin's enabled flag and the task's quarantine.
    pub async fn fire(&self, key: &TaskKey) -> FireOutcome {
        if !self.registry.contains(&key.plugin) {
            tracing::info!("Skipping scheduled task {}: plugin not loaded", key);
            return FireOutcome::SkippedPluginUnknown;
        }
        if !self.registry.is_enabled(&key.plugin) {
            tracing::info!("Skipping scheduled task {}: plugin disabled", key);
            return FireOutcome::SkippedPluginDisabled;
        }

        let now = self.clock.now();
        let (generation, handler) = {
            let mut tasks = self.lock();
            let Some(entry) = tasks.entries.get_mut(key) else {
                return FireOutcome::NotFound;
            };
            match entry.state {
                TaskState::Running => {
                    tracing::warn!("Dropping firing of {}: previous run still in progress", key);
                    return FireOutcome::SkippedOverlap;
                }
                TaskState::Quarantined => return FireOutcome::SkippedQuarantined,
                TaskState::Cancelled => return FireOutcome::NotFound,
                TaskState::Scheduled => {}
            }
            entry.state = TaskState::Running;
            entry.last_fired = Some(now);
            entry.fires += 1;
            (entry.generation, entry.handler.clone())
        };

        let started = std::time::Instant::now();
        let result = match tokio::spawn(handler(self.transport.clone(), self.config.clone())).await {
            Ok(result) => result,
            Err(join_err) => Err(PluginError::from(join_err)),
        };
        tracing::debug!("Scheduled task {} finished in {:?}", key, started.elapsed());

        if result.is_err() {
            self.metrics.record_scheduled_error(&key.plugin);
        }

        let mut tasks = self.lock();
        let Some(entry) = tasks.entries.get_mut(key).filter(|e| e.generation == generation) else {
            // Cancelled or re-registered while running
            return match result {
                Ok(()) => FireOutcome::Completed,
                Err(e) => FireOutcome::Failed(e),
            };
        };

        match result {
            Ok(()) => {
                entry.last_run = Some(self.clock.now());
                entry.error_streak = 0;
                entry.state = TaskState::Scheduled;
                FireOutcome::Completed
            }
            Err(e) => {
                entry.error_streak += 1;
                if entry.error_streak > self.settings.quarantine_threshold {
                    entry.stop_driver();
                    entry.state = TaskState::Quarantined;
                    tracing::warn!(
                        "Scheduled task {} quarantined after {} consecutive failures: {}",
                        key, entry.error_streak, e
                    );
                    FireOutcome::Quarantined(e)
                } else {
                    entry.state = TaskState::Scheduled;
                    tracing::warn!("Scheduled task {} failed (streak {}): {}", key, entry.error_streak, e);
                    FireOutcome::Failed(e)
                }
            }
        }
    }

    /// Stop every task owned by `plugin` and drop it from the table
    pub fn cancel_tasks_of(&self, plugin: &str) -> usize {
        let mut tasks = self.lock();
        let keys: Vec<TaskKey> = tasks.entries.keys().filter(|k| k.plugin == plugin).cloned().collect();
        for key in &keys {
            if let Some(mut entry) = tasks.entries.remove(key) {
                entry.stop_driver();
                entry.state = TaskState::Cancelled;
                tracing::debug!("Scheduled task {} cancelled", key);
            }
        }
        keys.len()
    }

    pub fn cancel_all(&self) -> usize {
        let mut tasks = self.lock();
        let count = tasks.entries.len();
        for (_, mut entry) in tasks.entries.drain() {
            entry.stop_driver();
            entry.state = TaskState::Cancelled;
        }
        if count > 0 {
            tracing::info!("Cancelled {} scheduled tasks", count);
        }
        count
    }

    /// Re-arm a task that keeps failing without a recent successful run.
    /// Returns whether a restart happened.
    pub fn restart_stuck(&self, key: &TaskKey) -> bool {
        let now = self.clock.now();
        let mut tasks = self.lock();
        let Some(entry) = tasks.entries.get_mut(key) else {
            return false;
        };
        if entry.state == TaskState::Quarantined || entry.error_streak == 0 {
            return false;
        }
        let idle = now - entry.last_run.unwrap_or(entry.registered_at);
        if idle <= self.settings.stuck_threshold {
            return false;
        }

        entry.stop_driver();
        entry.driver = self.spawn_driver(key.clone(), entry.schedule.clone());
        entry.error_streak = 0;
        tracing::warn!("Restarted stuck scheduled task {} (idle for {} min)", key, idle.num_minutes());
        true
    }

    pub fn status(&self) -> Vec<TaskStatus> {
        let tasks = self.lock();
        let mut statuses: Vec<TaskStatus> = tasks.entries.iter().map(|(k, e)| e.status(k)).collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    pub fn get(&self, key: &TaskKey) -> Option<TaskStatus> {
        self.lock().entries.get(key).map(|e| e.status(key))
    }

    pub fn counts(&self) -> TaskCounts {
        let tasks = self.lock();
        let mut counts = TaskCounts {
            total: tasks.entries.len(),
            ..Default::default()
        };
        for entry in tasks.entries.values() {
            match entry.state {
                TaskState::Scheduled => counts.scheduled += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Quarantined => counts.quarantined += 1,
                TaskState::Cancelled => {}
            }
        }
        counts
    }
}

impl TaskCanceller for TaskSupervisor {
    fn cancel_plugin_tasks(&self, plugin: &str) -> Result<usize, HostError> {
        Ok(self.cancel_tasks_of(plugin))
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for entry in tasks.entries.values_mut() {
                entry.stop_driver();
            }
        }
    }
}
