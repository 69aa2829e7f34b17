//! Application layer errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by lifecycle operations of the host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to load plugin {file}: {reason}")]
    Load { file: PathBuf, reason: String },

    #[error("Plugin {0} does not export a default handler")]
    MissingHandler(PathBuf),

    #[error("Invalid scheduled task '{task}' in plugin '{plugin}': {reason}")]
    TaskRegistration {
        plugin: String,
        task: String,
        reason: String,
    },

    #[error("Cron error: {0}")]
    Cron(#[from] CronError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Plugin '{0}' already loaded")]
    AlreadyLoaded(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plugin host is shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostError {
    pub fn load(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HostError::Load {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by plugin handlers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<String> for PluginError {
    fn from(msg: String) -> Self {
        PluginError::Failed(msg)
    }
}

impl From<&str> for PluginError {
    fn from(msg: &str) -> Self {
        PluginError::Failed(msg.to_string())
    }
}

impl From<tokio::task::JoinError> for PluginError {
    fn from(e: tokio::task::JoinError) -> Self {
        if !e.is_panic() {
            return PluginError::Failed("handler task was cancelled".to_string());
        }
        let payload = e.into_panic();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        PluginError::Panicked(msg)
    }
}

impl From<TransportError> for PluginError {
    fn from(e: TransportError) -> Self {
        PluginError::Transport(e.to_string())
    }
}

/// Messaging transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
}

/// Cron expression errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("Invalid IANA timezone: {0}")]
    InvalidTimezone(String),

    #[error("No future occurrence for expression: {0}")]
    NoOccurrence(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
