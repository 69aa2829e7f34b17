//! Application services - Command lookup and health evaluation

pub mod command_service;
pub mod health_service;

pub use command_service::CommandService;
pub use health_service::{HealthIssue, HealthMonitor, HealthReport, IssueKind};
