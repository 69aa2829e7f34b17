//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Plugins: Discovery, import and the plugin registry
//! - Adapters: Transport implementations (console, in-memory)

pub mod adapters;
pub mod config;
pub mod plugins;
