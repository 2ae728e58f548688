//! Poll loop: the single occupant of a scheduler's concurrency domain.
//!
//! Each iteration:
//! 1. Asks the [`TaskSource`] for everything currently due
//! 2. Delivers each task the tracker has not seen yet, one at a time
//! 3. Suspends for the poll interval (or the error retry interval after a
//!    failed iteration), waking early on cancellation

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::Task;
use crate::error::{Result, TaskyError};
use crate::notify::NotificationManager;
use crate::source::TaskSource;

/// Poll timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between successful iterations.
    pub interval: Duration,
    /// Wait after an iteration failed.
    pub error_retry: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            error_retry: Duration::from_secs(60),
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_error_retry(mut self, error_retry: Duration) -> Self {
        self.error_retry = error_retry;
        self
    }
}

/// Running totals for one poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Iterations that ran to completion.
    pub iterations: u64,
    /// Iterations that failed or panicked.
    pub failures: u64,
    /// Delivery chain invocations.
    pub deliveries: u64,
    /// Invocations where not even the console channel worked.
    pub undelivered: u64,
    pub last_poll_at: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Tasks the source reported due.
    pub due: usize,
    /// Tasks handed to the delivery chain.
    pub delivered: usize,
    /// Tasks skipped because they were already notified.
    pub skipped: usize,
}

/// The due-task polling loop.
pub struct PollLoop {
    source: Arc<dyn TaskSource>,
    manager: Arc<NotificationManager>,
    config: PollConfig,
    stats: Arc<Mutex<PollStats>>,
}

impl PollLoop {
    pub fn new(source: Arc<dyn TaskSource>, manager: Arc<NotificationManager>, config: PollConfig) -> Self {
        Self {
            source,
            manager,
            config,
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Shared handle to the live stats, readable from other threads.
    pub fn stats_handle(&self) -> Arc<Mutex<PollStats>> {
        self.stats.clone()
    }

    pub fn stats(&self) -> PollStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Run a single iteration to completion.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        self.iteration(&CancellationToken::new()).await
    }

    /// Poll until `cancel` fires. Errors and panics inside an iteration are
    /// logged and retried after `error_retry`; they never end the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.config.interval.as_secs(), "poll loop started");

        while !cancel.is_cancelled() {
            let outcome = AssertUnwindSafe(self.iteration(&cancel)).catch_unwind().await;

            let wait = match outcome {
                Ok(Ok(outcome)) => {
                    if outcome.delivered > 0 {
                        info!(due = outcome.due, delivered = outcome.delivered, "poll iteration delivered alerts");
                    } else {
                        debug!(due = outcome.due, skipped = outcome.skipped, "poll iteration complete");
                    }
                    self.config.interval
                }
                Ok(Err(e)) => {
                    error!(error = %e, "poll iteration failed");
                    self.record_failure(e.to_string());
                    self.config.error_retry
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "poll iteration panicked");
                    self.record_failure(format!("panic: {}", message));
                    self.config.error_retry
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("poll loop stopped");
    }

    async fn iteration(&self, cancel: &CancellationToken) -> Result<PollOutcome> {
        let tasks = tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::default()),
            tasks = self.fetch_due() => tasks?,
        };

        let mut outcome = PollOutcome {
            due: tasks.len(),
            ..PollOutcome::default()
        };

        for task in &tasks {
            if cancel.is_cancelled() {
                debug!("cancelled mid-batch");
                break;
            }
            match self.manager.notify_if_new(task).await {
                None => outcome.skipped += 1,
                Some(delivered) => {
                    outcome.delivered += 1;
                    self.record_delivery(delivered);
                    if !delivered {
                        warn!(task_id = %task.id, "alert did not reach any channel");
                    }
                }
            }
        }

        self.record_iteration();
        Ok(outcome)
    }

    /// Query the source off the async thread; a panicking source is an error.
    async fn fetch_due(&self) -> Result<Vec<Task>> {
        let source = self.source.clone();
        match tokio::task::spawn_blocking(move || source.list_due_tasks()).await {
            Ok(result) => result,
            Err(e) => Err(TaskyError::Source(format!("task source panicked: {}", e))),
        }
    }

    fn record_iteration(&self) {
        let mut stats = self.lock_stats();
        stats.iterations += 1;
        stats.last_poll_at = Some(Local::now());
    }

    fn record_delivery(&self, delivered: bool) {
        let mut stats = self.lock_stats();
        stats.deliveries += 1;
        if !delivered {
            stats.undelivered += 1;
        }
    }

    fn record_failure(&self, message: String) {
        let mut stats = self.lock_stats();
        stats.failures += 1;
        stats.last_poll_at = Some(Local::now());
        stats.last_error = Some(message);
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, PollStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
