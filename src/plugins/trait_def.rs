//! Plugin module contract
//!
//! A plugin is a module that exposes a default event handler plus optional
//! metadata, command and button handlers, scheduled tasks and init/cleanup
//! hooks. Native plugins build a [`PluginModule`] and export it with
//! [`declare_plugin!`](crate::declare_plugin).

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use crate::application::errors::PluginError;
use crate::domain::entities::{CommandDescriptor, Event};
use crate::domain::traits::Transport;
use crate::infrastructure::config::Config;

/// Result every plugin callable resolves to
pub type PluginResult = Result<(), PluginError>;

pub type HandlerFuture = BoxFuture<'static, PluginResult>;

/// Callable invoked with `(event, transport, config)`.
/// Used for the default handler, command handlers and button handlers.
pub type EventHandler = Arc<dyn Fn(Arc<Event>, Arc<dyn Transport>, Arc<Config>) -> HandlerFuture + Send + Sync>;

/// Callable invoked when a scheduled task fires
pub type TaskHandler = Arc<dyn Fn(Arc<dyn Transport>, Arc<Config>) -> HandlerFuture + Send + Sync>;

pub type InitHook = Arc<dyn Fn(PluginContext) -> HandlerFuture + Send + Sync>;

pub type CleanupHook = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

/// Name of the symbol native plugins export
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"chatbot_plugin_entry";

/// Signature of the exported entry symbol
pub type PluginEntryFn = unsafe extern "C" fn() -> *mut PluginModule;

/// Wrap an async closure as an [`EventHandler`]
pub fn event_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Arc<Event>, Arc<dyn Transport>, Arc<Config>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult> + Send + 'static,
{
    Arc::new(move |event, transport, config| Box::pin(f(event, transport, config)))
}

/// Wrap an async closure as a [`TaskHandler`]
pub fn task_handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(Arc<dyn Transport>, Arc<Config>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult> + Send + 'static,
{
    Arc::new(move |transport, config| Box::pin(f(transport, config)))
}

/// Context handed to a plugin's init hook
#[derive(Clone)]
pub struct PluginContext {
    pub plugin_name: String,
    pub source: PathBuf,
    pub config: Arc<Config>,
}

/// Metadata a plugin declares about itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Display name
    pub name: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandDescriptor>,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_command(mut self, command: CommandDescriptor) -> Self {
        self.commands.push(command);
        self
    }
}

/// A scheduled task as declared by a plugin. Fields are optional because
/// plugins may ship incomplete descriptors; the supervisor skips those.
#[derive(Clone, Default)]
pub struct TaskDescriptor {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub handler: Option<TaskHandler>,
    pub description: Option<String>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, handler: TaskHandler) -> Self {
        Self {
            name: Some(name.into()),
            schedule: Some(schedule.into()),
            handler: Some(handler),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl std::fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("has_handler", &self.handler.is_some())
            .field("description", &self.description)
            .finish()
    }
}

/// Everything a plugin module exports
#[derive(Clone, Default)]
pub struct PluginModule {
    pub metadata: PluginMetadata,
    pub handler: Option<EventHandler>,
    pub command_handlers: HashMap<String, EventHandler>,
    pub button_handlers: HashMap<String, EventHandler>,
    pub scheduled_tasks: Vec<TaskDescriptor>,
    pub init: Option<InitHook>,
    pub cleanup: Option<CleanupHook>,
}

impl PluginModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: PluginMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_handler(mut self, handler: EventHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_command_handler(mut self, name: impl Into<String>, handler: EventHandler) -> Self {
        self.command_handlers.insert(name.into(), handler);
        self
    }

    pub fn with_button_handler(mut self, id: impl Into<String>, handler: EventHandler) -> Self {
        self.button_handlers.insert(id.into(), handler);
        self
    }

    pub fn with_task(mut self, task: TaskDescriptor) -> Self {
        self.scheduled_tasks.push(task);
        self
    }

    pub fn with_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult> + Send + 'static,
    {
        self.init = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn with_cleanup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult> + Send + 'static,
    {
        self.cleanup = Some(Arc::new(move || Box::pin(f())));
        self
    }
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("metadata", &self.metadata)
            .field("has_handler", &self.handler.is_some())
            .field("commands", &self.command_handlers.keys().collect::<Vec<_>>())
            .field("buttons", &self.button_handlers.keys().collect::<Vec<_>>())
            .field("scheduled_tasks", &self.scheduled_tasks)
            .finish()
    }
}

/// Export a plugin module from a `cdylib`.
///
/// ```ignore
/// fn build() -> PluginModule { PluginModule::new().with_handler(...) }
/// plugin_host::declare_plugin!(build);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:path) => {
        #[no_mangle]
        pub extern "C" fn chatbot_plugin_entry() -> *mut $crate::plugins::PluginModule {
            let module: $crate::plugins::PluginModule = $constructor();
            Box::into_raw(Box::new(module))
        }
    };
}
