//! Health monitor - Periodic evaluation of plugin metrics and scheduled tasks

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use crate::application::metrics::MetricsStore;
use crate::application::scheduling::clock::Clock;
use crate::application::scheduling::supervisor::{TaskCounts, TaskKey, TaskSupervisor};
use crate::infrastructure::config::HealthConfig;
use crate::infrastructure::plugins::registry::PluginRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    HighErrorRate,
    SlowPlugin,
    FailingTask,
}

/// A single finding of a health check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthIssue {
    /// Plugin name or `plugin:task`
    pub subject: String,
    pub kind: IssueKind,
    pub message: String,
    pub critical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// No critical issue was found
    pub healthy: bool,
    pub issues: Vec<HealthIssue>,
    pub critical_issue_count: usize,
    pub scheduled_task_counts: TaskCounts,
    /// Tasks restarted by this check
    pub restarted: Vec<TaskKey>,
    pub last_check_at: DateTime<Utc>,
}

/// Reads metrics and task state, restarts stuck tasks and keeps the latest report
pub struct HealthMonitor {
    registry: Arc<PluginRegistry>,
    metrics: Arc<MetricsStore>,
    supervisor: Arc<TaskSupervisor>,
    clock: Arc<dyn Clock>,
    settings: HealthConfig,
    latest: Mutex<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        metrics: Arc<MetricsStore>,
        supervisor: Arc<TaskSupervisor>,
        clock: Arc<dyn Clock>,
        settings: HealthConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            supervisor,
            clock,
            settings,
            latest: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &HealthConfig {
        &self.settings
    }

    /// Run one health check and store its report
    pub fn check(&self) -> HealthReport {
        let snapshot = self.metrics.snapshot();
        let mut issues = Vec::new();

        for name in self.registry.names() {
            let Some(m) = snapshot.get(&name) else { continue };
            let rate = m.error_rate();
            if m.executions > 0 && rate > self.settings.error_rate_threshold {
                issues.push(HealthIssue {
                    subject: name.clone(),
                    kind: IssueKind::HighErrorRate,
                    message: format!("error rate {:.1}% ({} of {})", rate * 100.0, m.errors, m.executions),
                    critical: true,
                });
            }
            let avg = m.average_execution_ms();
            if avg > self.settings.slow_average_ms as f64 {
                issues.push(HealthIssue {
                    subject: name,
                    kind: IssueKind::SlowPlugin,
                    message: format!("average execution time {:.0} ms", avg),
                    critical: false,
                });
            }
        }

        let mut restarted = Vec::new();
        for task in self.supervisor.status() {
            if task.error_streak > self.settings.critical_streak {
                issues.push(HealthIssue {
                    subject: task.key.to_string(),
                    kind: IssueKind::FailingTask,
                    message: format!("{} consecutive failures", task.error_streak),
                    critical: true,
                });
            }
            if self.supervisor.restart_stuck(&task.key) {
                restarted.push(task.key);
            }
        }

        let critical_issue_count = issues.iter().filter(|i| i.critical).count();
        let report = HealthReport {
            healthy: critical_issue_count == 0,
            issues,
            critical_issue_count,
            scheduled_task_counts: self.supervisor.counts(),
            restarted,
            last_check_at: self.clock.now(),
        };

        if report.healthy {
            tracing::debug!("Health check passed ({} issues)", report.issues.len());
        } else {
            tracing::warn!(
                "Health check found {} critical issues: {}",
                critical_issue_count,
                report.issues.iter().filter(|i| i.critical).map(|i| i.subject.as_str()).collect::<Vec<_>>().join(", ")
            );
        }

        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(report.clone());
        }
        report
    }

    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.lock().ok()?.clone()
    }

    /// Whether the latest report calls for a forced full reload
    pub fn needs_forced_reload(&self) -> bool {
        self.latest()
            .map(|r| r.critical_issue_count > self.settings.cascade_critical_count)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::PluginError;
    use crate::application::scheduling::clock::ManualClock;
    use crate::application::scheduling::cron::CronEvaluator;
    use crate::application::scheduling::supervisor::{FireOutcome, TaskState};
    use crate::infrastructure::adapters::memory::MemoryTransport;
    use crate::infrastructure::config::Config;
    use crate::infrastructure::plugins::registry::tests::record;
    use crate::plugins::trait_def::{task_handler, TaskDescriptor};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        clock: Arc<ManualClock>,
        registry: Arc<PluginRegistry>,
        metrics: Arc<MetricsStore>,
        supervisor: Arc<TaskSupervisor>,
        monitor: HealthMonitor,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 16, 8, 0, 0).unwrap()));
        let registry = Arc::new(PluginRegistry::new());
        let metrics = Arc::new(MetricsStore::new());
        let config = Arc::new(Config::default());
        let supervisor = TaskSupervisor::new(
            registry.clone(),
            metrics.clone(),
            CronEvaluator::from_name("Africa/Lagos").unwrap(),
            clock.clone(),
            Arc::new(MemoryTransport::new()),
            config.clone(),
        );
        let monitor = HealthMonitor::new(
            registry.clone(),
            metrics.clone(),
            supervisor.clone(),
            clock.clone(),
            config.health.clone(),
        );
        Fixture { clock, registry, metrics, supervisor, monitor }
    }

    fn record_runs(fx: &Fixture, plugin: &str, ok: u64, failed: u64, ms: u64) {
        let instance = fx.registry.get(plugin).unwrap().instance;
        fx.metrics.init(plugin, instance);
        for i in 0..ok + failed {
            let success = i < ok;
            fx.metrics.record_dispatch(plugin, instance, ms, success, (!success).then_some("boom"), Utc::now());
        }
    }

    #[test]
    fn test_healthy_when_nothing_loaded() {
        let fx = fixture();
        let report = fx.monitor.check();
        assert!(report.healthy);
        assert!(report.issues.is_empty());
        assert_eq!(fx.monitor.latest(), Some(report));
        assert!(!fx.monitor.needs_forced_reload());
    }

    #[test]
    fn test_error_rate_is_critical_and_slowness_is_not() {
        let fx = fixture();
        fx.registry.insert(record("flaky")).unwrap();
        fx.registry.insert(record("sloth")).unwrap();
        fx.registry.insert(record("fine")).unwrap();
        record_runs(&fx, "flaky", 3, 1, 10);
        record_runs(&fx, "sloth", 2, 0, 6_000);
        record_runs(&fx, "fine", 5, 1, 10);

        let report = fx.monitor.check();

        assert!(!report.healthy);
        assert_eq!(report.critical_issue_count, 1);
        let kinds: Vec<_> = report.issues.iter().map(|i| (i.subject.as_str(), i.kind, i.critical)).collect();
        assert!(kinds.contains(&("flaky", IssueKind::HighErrorRate, true)));
        assert!(kinds.contains(&("sloth", IssueKind::SlowPlugin, false)));
        assert!(!kinds.iter().any(|(s, _, _)| *s == "fine"));
    }

    #[tokio::test]
    async fn test_failing_task_streak_is_critical() {
        let fx = fixture();
        fx.registry.insert(record("news")).unwrap();
        fx.supervisor.register_tasks(
            "news",
            &[TaskDescriptor::new("fetch", "0 * * * *", task_handler(|_, _| async { Err(PluginError::from("feed down")) }))],
        );
        let key = TaskKey::new("news", "fetch");
        for _ in 0..4 {
            assert!(matches!(fx.supervisor.fire(&key).await, FireOutcome::Failed(_)));
        }

        let report = fx.monitor.check();

        assert_eq!(report.critical_issue_count, 1);
        assert_eq!(report.issues[0].subject, "news:fetch");
        assert_eq!(report.issues[0].kind, IssueKind::FailingTask);
        assert_eq!(report.scheduled_task_counts.total, 1);
    }

    #[tokio::test]
    async fn test_stuck_task_is_restarted() {
        let fx = fixture();
        fx.registry.insert(record("news")).unwrap();
        let fail = Arc::new(AtomicBool::new(true));
        let flag = fail.clone();
        fx.supervisor.register_tasks(
            "news",
            &[TaskDescriptor::new("fetch", "0 * * * *", task_handler(move |_, _| {
                let flag = flag.clone();
                async move {
                    if flag.load(Ordering::SeqCst) {
                        Err(PluginError::from("timeout"))
                    } else {
                        Ok(())
                    }
                }
            }))],
        );
        let key = TaskKey::new("news", "fetch");
        fx.supervisor.fire(&key).await;
        fx.clock.advance(chrono::Duration::hours(3));

        let report = fx.monitor.check();

        assert_eq!(report.restarted, vec![key.clone()]);
        let status = fx.supervisor.get(&key).unwrap();
        assert_eq!(status.error_streak, 0);
        assert_eq!(status.state, TaskState::Scheduled);
    }

    #[tokio::test]
    async fn test_forced_reload_needs_more_than_cascade_count() {
        let fx = fixture();
        for name in ["a", "b", "c"] {
            fx.registry.insert(record(name)).unwrap();
            record_runs(&fx, name, 0, 2, 1);
        }
        fx.monitor.check();
        assert!(fx.monitor.needs_forced_reload());

        fx.registry.remove("c", fx.supervisor.as_ref()).unwrap();
        fx.monitor.check();
        assert!(!fx.monitor.needs_forced_reload());
    }
}
