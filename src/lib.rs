//! Tasky - due-task notifications for a desktop task manager
//!
//! Tasky polls a task source for tasks past their due time, alerts each one
//! exactly once until it is reset, and delivers that alert through an
//! ordered chain of independent best-effort channels so that no single
//! failing channel can silence it.

pub mod domain;
pub mod error;
pub mod notify;
pub mod scheduler;
pub mod source;

pub use domain::{Task, TaskId};
pub use error::{Result, TaskyError};
pub use notify::NotificationManager;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerState, SchedulerStatus};
pub use source::TaskSource;
