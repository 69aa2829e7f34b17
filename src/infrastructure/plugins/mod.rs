//! Plugin discovery, import and bookkeeping
//! 
//! Plugins are files in the plugins directory. An importer turns each file
//! into a `PluginModule`; the loader registers what it exports.

pub mod importer;
pub mod loader;
pub mod registry;

pub use importer::{ModuleImporter, NativeImporter, StaticImporter};
pub use loader::{LoadIssue, LoadSummary, PluginLoader};
pub use registry::{PluginRecord, PluginRegistry, TaskCanceller};
