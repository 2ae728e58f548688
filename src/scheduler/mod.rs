//! Due-task scheduler.
//!
//! This module provides:
//! - **PollLoop**: repeatedly asks a [`TaskSource`](crate::source::TaskSource)
//!   for due tasks and hands new ones to the
//!   [`NotificationManager`](crate::notify::NotificationManager).
//! - **Scheduler**: start/stop/restart/status around exactly one poll loop,
//!   each run on its own thread with its own single-threaded runtime.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasky::notify::{NotificationManager, DeliveryConfig, RingConfig};
//! use tasky::scheduler::{Scheduler, SchedulerConfig};
//! use tasky::source::SqliteTaskSource;
//!
//! let manager = Arc::new(NotificationManager::platform(DeliveryConfig::default(), RingConfig::default()));
//! let scheduler = Scheduler::new(manager, SchedulerConfig::default());
//! scheduler.start(Arc::new(SqliteTaskSource::open(path)?))?;
//! // ...
//! scheduler.stop();
//! ```

mod lifecycle;
mod poll;

pub use lifecycle::{Scheduler, SchedulerConfig, SchedulerState, SchedulerStatus, StopOutcome};
pub use poll::{PollConfig, PollLoop, PollOutcome, PollStats};
