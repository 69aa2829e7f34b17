//! Plugin system for the host
//! 
//! Defines the module contract plugins export and the manager that drives
//! their lifecycle.

pub mod manager;
pub mod trait_def;

pub use manager::{PluginManager, PluginManagerBuilder, PluginStats};
pub use trait_def::{
    event_handler, task_handler, CleanupHook, EventHandler, InitHook, PluginContext, PluginMetadata,
    PluginModule, PluginResult, TaskDescriptor, TaskHandler,
};
