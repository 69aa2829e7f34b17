//! Message dispatcher - Fans every inbound event out to all enabled plugins

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use uuid::Uuid;
use crate::application::errors::PluginError;
use crate::application::metrics::MetricsStore;
use crate::application::scheduling::clock::Clock;
use crate::domain::entities::Event;
use crate::domain::traits::Transport;
use crate::infrastructure::config::Config;
use crate::infrastructure::plugins::loader::PluginLoader;
use crate::infrastructure::plugins::registry::PluginRegistry;
use crate::plugins::trait_def::{EventHandler, PluginResult};
use super::buttons::ButtonRegistry;

/// What a single dispatch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Plugins whose handler was invoked
    pub invoked: Vec<String>,
    pub failed: Vec<String>,
    pub slow: Vec<String>,
    /// Plugins switched off by this dispatch
    pub disabled: Vec<String>,
    /// Plugin owning the button handler that ran, if any
    pub button_handled_by: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub slow_threshold: Duration,
    pub disable_threshold: u64,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            slow_threshold: Duration::from_millis(config.dispatch.slow_threshold_ms),
            disable_threshold: config.dispatch.disable_threshold,
        }
    }
}

/// Count of handler invocations that have started and not finished
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until nothing is in flight or `grace` elapses. Returns whether
    /// everything finished.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.current() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

enum Job {
    Plugin { name: String, instance: Uuid },
    Button { plugin: String, button_id: String },
}

/// Concurrent fan-out over the plugin registry
pub struct MessageDispatcher {
    registry: Arc<PluginRegistry>,
    metrics: Arc<MetricsStore>,
    loader: Arc<PluginLoader>,
    buttons: Arc<ButtonRegistry>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
    in_flight: Arc<InFlight>,
    closed: AtomicBool,
}

impl MessageDispatcher {
    pub fn new(
        registry: Arc<PluginRegistry>,
        metrics: Arc<MetricsStore>,
        loader: Arc<PluginLoader>,
        buttons: Arc<ButtonRegistry>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            metrics,
            loader,
            buttons,
            clock,
            settings,
            in_flight: Arc::new(InFlight::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Stop accepting events
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Invoke every enabled plugin's handler with the event and wait for all
    /// of them. Handler failures (errors or panics) are recorded and never
    /// reach the caller.
    pub async fn dispatch(&self, event: Arc<Event>, transport: Arc<dyn Transport>, config: Arc<Config>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if self.closed.load(Ordering::SeqCst) {
            return summary;
        }

        if !self.loader.is_initialized() {
            if let Err(e) = self.loader.load_all(false).await {
                tracing::error!("Lazy plugin load failed: {}", e);
            }
        }

        let mut jobs = JoinSet::new();
        for record in self.registry.enabled() {
            summary.invoked.push(record.name.clone());
            let guard = self.in_flight.enter();
            let run = invoke(record.handler, event.clone(), transport.clone(), config.clone());
            let job = Job::Plugin { name: record.name, instance: record.instance };
            jobs.spawn(async move {
                let (elapsed, result) = run.await;
                drop(guard);
                (job, elapsed, result)
            });
        }

        if let Some(button_id) = event.button_id() {
            if let Some((plugin, handler)) = self.buttons.resolve(button_id) {
                if self.registry.is_enabled(&plugin) {
                    let guard = self.in_flight.enter();
                    let run = invoke(handler, event.clone(), transport.clone(), config.clone());
                    let button_id = button_id.to_string();
                    jobs.spawn(async move {
                        let (elapsed, result) = run.await;
                        drop(guard);
                        (Job::Button { plugin, button_id }, elapsed, result)
                    });
                }
            } else {
                tracing::debug!("No button handler for '{}'", button_id);
            }
        }

        while let Some(joined) = jobs.join_next().await {
            let (job, elapsed, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!("Dispatch task lost: {}", e);
                    continue;
                }
            };
            match job {
                Job::Plugin { name, instance } => self.settle(&name, instance, elapsed, result, &mut summary),
                Job::Button { plugin, button_id } => {
                    if let Err(e) = result {
                        tracing::warn!("Button handler '{}' of {} failed: {}", button_id, plugin, e);
                    }
                    summary.button_handled_by = Some(plugin);
                }
            }
        }

        summary.invoked.sort();
        summary
    }

    fn settle(&self, name: &str, instance: Uuid, elapsed: Duration, result: PluginResult, summary: &mut DispatchSummary) {
        let duration_ms = elapsed.as_millis() as u64;
        if elapsed > self.settings.slow_threshold {
            tracing::warn!("Slow plugin {}: handler took {} ms", name, duration_ms);
            summary.slow.push(name.to_string());
        }

        let err = result.err();
        let metrics = self.metrics.record_dispatch(
            name,
            instance,
            duration_ms,
            err.is_none(),
            err.as_ref().map(|e| e.to_string()).as_deref(),
            self.clock.now(),
        );

        let Some(err) = err else { return };
        tracing::warn!("Plugin {} failed: {}", name, err);
        summary.failed.push(name.to_string());

        // Reloaded while running: the counters belong to the new instance
        let Some(metrics) = metrics else { return };
        if metrics.errors > self.settings.disable_threshold && self.registry.is_enabled(name) {
            if self.registry.set_enabled(name, false).is_ok() {
                tracing::warn!(
                    "Plugin {} auto-disabled after {} errors in {} executions",
                    name, metrics.errors, metrics.executions
                );
                summary.disabled.push(name.to_string());
            }
        }
    }
}

/// Run a handler on its own task so a panic becomes an error
async fn invoke(handler: EventHandler, event: Arc<Event>, transport: Arc<dyn Transport>, config: Arc<Config>) -> (Duration, PluginResult) {
    let started = Instant::now();
    let result = match tokio::spawn(handler(event, transport, config)).await {
        Ok(result) => result,
        Err(e) => Err(PluginError::from(e)),
    };
    (started.elapsed(), result)
}
