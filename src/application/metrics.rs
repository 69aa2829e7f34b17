//! Per-plugin execution counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Longest error summary kept in `last_error`
const MAX_ERROR_SUMMARY: usize = 200;

/// Counters for one plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PluginMetrics {
    pub executions: u64,
    pub errors: u64,
    pub total_execution_time_ms: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduled_task_errors: u64,
}

impl PluginMetrics {
    /// `errors / executions`, or 0 before the first execution
    pub fn error_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.errors as f64 / self.executions as f64
        }
    }

    pub fn average_execution_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_execution_time_ms as f64 / self.executions as f64
        }
    }
}

/// Record of one loaded plugin instance
#[derive(Debug, Clone)]
struct Slot {
    instance: Uuid,
    metrics: PluginMetrics,
}

/// Metrics keyed by plugin name.
///
/// Every update of a single record happens under the store lock, so a
/// snapshot never observes a half-applied update. Samples carry the id of
/// the instance that produced them; samples from an instance that has since
/// been unloaded or replaced are dropped.
#[derive(Debug, Default)]
pub struct MetricsStore {
    inner: Mutex<HashMap<String, Slot>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh record for a newly loaded plugin instance
    pub fn init(&self, plugin: &str, instance: Uuid) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert(plugin.to_string(), Slot { instance, metrics: PluginMetrics::default() });
        }
    }

    pub fn remove(&self, plugin: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(plugin);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clear();
        }
    }

    /// Record one dispatch invocation and return the updated counters.
    /// `None` when `instance` is no longer the loaded one.
    pub fn record_dispatch(
        &self,
        plugin: &str,
        instance: Uuid,
        duration_ms: u64,
        ok: bool,
        err_summary: Option<&str>,
        at: DateTime<Utc>,
    ) -> Option<PluginMetrics> {
        let Ok(mut inner) = self.inner.lock() else {
            tracing::error!("Metrics store lock poisoned; dropping sample for {}", plugin);
            return None;
        };
        let Some(slot) = inner.get_mut(plugin).filter(|slot| slot.instance == instance) else {
            tracing::debug!("Dropping sample for {}: instance no longer loaded", plugin);
            return None;
        };
        let entry = &mut slot.metrics;
        entry.executions += 1;
        entry.total_execution_time_ms = entry.total_execution_time_ms.saturating_add(duration_ms);
        entry.last_execution_at = Some(at);
        if !ok {
            entry.errors += 1;
            entry.last_error = Some(summarize(err_summary.unwrap_or("unknown error")));
        }
        Some(entry.clone())
    }

    /// Count a failed scheduled run against the plugin's current record, if any
    pub fn record_scheduled_error(&self, plugin: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(slot) = inner.get_mut(plugin) {
                slot.metrics.scheduled_task_errors += 1;
            }
        }
    }

    pub fn get(&self, plugin: &str) -> Option<PluginMetrics> {
        self.inner.lock().ok()?.get(plugin).map(|slot| slot.metrics.clone())
    }

    /// Point-in-time copy of every record
    pub fn snapshot(&self) -> HashMap<String, PluginMetrics> {
        self.inner
            .lock()
            .map(|inner| {
                inner.iter()
                    .map(|(name, slot)| (name.clone(), slot.metrics.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn summarize(err: &str) -> String {
    let line = err.lines().next().unwrap_or_default();
    line.chars().take(MAX_ERROR_SUMMARY).collect()
}
