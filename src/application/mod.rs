//! Application layer - Use cases of the plugin host
//! 
//! This layer contains:
//! - Errors: Host, plugin and transport errors
//! - Metrics: Per-plugin execution counters
//! - Scheduling: Clock, cron evaluation, task supervisor
//! - Messaging: Event fan-out, button routing, parsing
//! - Services: Command lookup, health monitor

pub mod errors;
pub mod messaging;
pub mod metrics;
pub mod scheduling;
pub mod services;
