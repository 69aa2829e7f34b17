//! Plugin host and supervisor for an event-driven chatbot.
//!
//! Plugins are discovered from a directory, loaded through a
//! [`ModuleImporter`](infrastructure::plugins::ModuleImporter), fed every
//! inbound [`Event`](domain::entities::Event) concurrently and have their
//! scheduled tasks run under cron. [`PluginManager`] ties the pieces together.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;

pub use application::errors::{HostError, PluginError, TransportError};
pub use infrastructure::config::Config;
pub use plugins::PluginManager;
