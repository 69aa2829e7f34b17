//! Scheduling - Clocks, cron evaluation and the task supervisor

pub mod clock;
pub mod cron;
pub mod supervisor;

pub use self::clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use self::cron::{CronEvaluator, CronSchedule};
pub use self::supervisor::{FireOutcome, TaskCounts, TaskKey, TaskState, TaskStatus, TaskSupervisor};
