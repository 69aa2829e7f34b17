//! Plugin registry - In-memory table of loaded plugins

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;
use crate::application::errors::HostError;
use crate::plugins::trait_def::{CleanupHook, EventHandler, PluginMetadata};

/// Cancels the scheduled tasks owned by a plugin
pub trait TaskCanceller: Send + Sync {
    /// Returns how many tasks were cancelled
    fn cancel_plugin_tasks(&self, plugin: &str) -> Result<usize, HostError>;
}

/// One loaded plugin
#[derive(Clone)]
pub struct PluginRecord {
    /// Stable identifier derived from the source file name
    pub name: String,
    /// Distinguishes this load from earlier loads of the same name
    pub instance: Uuid,
    pub metadata: PluginMetadata,
    pub handler: EventHandler,
    pub command_handlers: HashMap<String, EventHandler>,
    pub source: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub enabled: bool,
    pub has_scheduled_tasks: bool,
    pub cleanup: Option<CleanupHook>,
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("metadata", &self.metadata)
            .field("source", &self.source)
            .field("loaded_at", &self.loaded_at)
            .field("enabled", &self.enabled)
            .field("has_scheduled_tasks", &self.has_scheduled_tasks)
            .finish()
    }
}

/// Registry of loaded plugins.
///
/// Accessors clone records out; the lock is never held by callers.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, PluginRecord>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: PluginRecord) -> Result<(), HostError> {
        let mut plugins = self.plugins.write()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;

        if plugins.contains_key(&record.name) {
            return Err(HostError::AlreadyLoaded(record.name));
        }

        plugins.insert(record.name.clone(), record);
        Ok(())
    }

    /// Remove a plugin: disable it, cancel its tasks, then drop the record.
    /// A cancellation failure is logged and removal continues.
    pub fn remove(&self, name: &str, tasks: &dyn TaskCanceller) -> Result<PluginRecord, HostError> {
        self.set_enabled(name, false)?;

        if let Err(e) = tasks.cancel_plugin_tasks(name) {
            tracing::error!("Failed to cancel scheduled tasks of {}: {}", name, e);
        }

        let mut plugins = self.plugins.write()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;
        let record = plugins.remove(name).ok_or_else(|| HostError::NotFound(name.to_string()))?;
        tracing::info!("Unloaded plugin: {}", name);
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Option<PluginRecord> {
        self.plugins.read()
            .ok()?
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<PluginRecord> {
        let mut records: Vec<PluginRecord> = self.plugins.read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Records with `enabled == true`
    pub fn enabled(&self) -> Vec<PluginRecord> {
        self.plugins.read()
            .map(|p| p.values().filter(|r| r.enabled).cloned().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Returns the previous flag
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, HostError> {
        let mut plugins = self.plugins.write()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;
        let record = plugins.get_mut(name).ok_or_else(|| HostError::NotFound(name.to_string()))?;
        let previous = record.enabled;
        record.enabled = enabled;
        Ok(previous)
    }

    pub fn set_has_scheduled_tasks(&self, name: &str, has_tasks: bool) -> Result<(), HostError> {
        let mut plugins = self.plugins.write()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;
        let record = plugins.get_mut(name).ok_or_else(|| HostError::NotFound(name.to_string()))?;
        record.has_scheduled_tasks = has_tasks;
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.plugins.read()
            .ok()
            .and_then(|p| p.get(name).map(|r| r.enabled))
            .unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.read()
            .ok()
            .map(|p| p.contains_key(name))
            .unwrap_or(false)
    }

    /// Drop every record, returning them for cleanup
    pub fn clear(&self) -> Vec<PluginRecord> {
        self.plugins.write()
            .map(|mut p| p.drain().map(|(_, r)| r).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.plugins.read()
            .ok()
            .map(|p| p.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
