//! Scheduler lifecycle: owns at most one poll loop at a time.
//!
//! ```text
//!   Idle --start--> Running --stop--> Stopping --(joined or timed out)--> Idle
//! ```
//!
//! Each `start` creates a fresh concurrency domain: a dedicated OS thread
//! hosting a single-threaded Tokio runtime whose only job is the
//! [`PollLoop`]. `stop` cancels the loop and waits a bounded time for the
//! thread to report that it is done; after a timeout the state is forced
//! to Idle and the orphaned domain exits on its own once it observes
//! cancellation. `live_domains` counts domains that are still executing,
//! orphans included.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TaskyError};
use crate::notify::NotificationManager;
use crate::scheduler::poll::{PollConfig, PollLoop, PollStats};
use crate::source::TaskSource;

/// Grace period the domain's runtime gives its leftover tasks on exit.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
}

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll: PollConfig,
    /// Upper bound on how long `stop` waits for the domain to exit.
    pub stop_timeout: Duration,
    /// Pause between stop and start during `restart`.
    pub restart_settle: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            stop_timeout: Duration::from_millis(2000),
            restart_settle: Duration::from_millis(100),
        }
    }
}

impl SchedulerConfig {
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_restart_settle(mut self, settle: Duration) -> Self {
        self.restart_settle = settle;
        self
    }
}

/// How a `stop` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The domain exited within the timeout.
    Stopped,
    /// The domain did not exit in time and was left to finish on its own.
    TimedOut,
}

/// Diagnostic snapshot. Taking one has no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub is_running: bool,
    /// The current domain's thread has not finished.
    pub domain_alive: bool,
    /// Domains still executing, including orphans from timed-out stops.
    pub live_domains: usize,
    /// Number of domains created so far.
    pub generation: u64,
    pub started_at: Option<DateTime<Local>>,
    pub notified_tasks: usize,
    /// Stats of the current domain, or of the last one if idle.
    pub poll: PollStats,
}

/// One concurrency domain.
struct Domain {
    generation: u64,
    cancel: CancellationToken,
    done: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
    started_at: DateTime<Local>,
    stats: Arc<Mutex<PollStats>>,
}

impl Domain {
    fn stats(&self) -> PollStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Decrements the live count and signals completion however the thread ends.
struct DomainExit {
    live: Arc<AtomicUsize>,
    done: mpsc::Sender<()>,
}

impl Drop for DomainExit {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        let _ = self.done.send(());
    }
}

struct Inner {
    state: SchedulerState,
    domain: Option<Domain>,
    generation: u64,
    last_stats: PollStats,
}

/// Owns the poll loop's lifetime. Safe to call from any thread.
pub struct Scheduler {
    manager: Arc<NotificationManager>,
    config: SchedulerConfig,
    inner: Mutex<Inner>,
    live_domains: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(manager: Arc<NotificationManager>, config: SchedulerConfig) -> Self {
        Self {
            manager,
            config,
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                domain: None,
                generation: 0,
                last_stats: PollStats::default(),
            }),
            live_domains: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn manager(&self) -> &Arc<NotificationManager> {
        &self.manager
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Start polling `source` on a new concurrency domain.
    ///
    /// Returns `Ok(false)` without doing anything if already running, and
    /// an error if a stop is still in progress.
    pub fn start(&self, source: Arc<dyn TaskSource>) -> Result<bool> {
        let mut inner = self.lock();
        match inner.state {
            SchedulerState::Running => {
                debug!(generation = inner.generation, "scheduler already running");
                return Ok(false);
            }
            SchedulerState::Stopping => {
                warn!("start requested while scheduler is stopping");
                return Err(TaskyError::InvalidState("scheduler is stopping".to_string()));
            }
            SchedulerState::Idle => {}
        }

        if let Some(stale) = inner.domain.take() {
            warn!(generation = stale.generation, "cancelling leftover domain before start");
            stale.cancel.cancel();
            inner.last_stats = stale.stats();
        }

        let generation = inner.generation + 1;
        let domain = self.spawn_domain(generation, source)?;
        info!(generation, "scheduler started");

        inner.generation = generation;
        inner.domain = Some(domain);
        inner.state = SchedulerState::Running;
        Ok(true)
    }

    /// Cancel the poll loop and wait up to `stop_timeout` for it to exit.
    ///
    /// The scheduler is Idle afterwards unless another caller started a
    /// newer domain while this one was waiting; that domain is left alone.
    pub fn stop(&self) -> StopOutcome {
        let domain = {
            let mut inner = self.lock();
            if inner.state != SchedulerState::Running {
                return StopOutcome::NotRunning;
            }
            inner.state = SchedulerState::Stopping;
            inner.domain.take()
        };
        let Some(Domain {
            generation,
            cancel,
            done,
            thread: handle,
            stats,
            ..
        }) = domain
        else {
            self.lock().state = SchedulerState::Idle;
            return StopOutcome::NotRunning;
        };

        info!(generation, "stopping scheduler");
        cancel.cancel();

        let outcome = match done.recv_timeout(self.config.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!(generation, "poll thread panicked");
                }
                StopOutcome::Stopped
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    generation,
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "poll loop did not stop in time, leaving it to exit on its own"
                );
                StopOutcome::TimedOut
            }
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(generation, current = inner.generation, "newer domain took over during stop");
            return outcome;
        }
        inner.last_stats = stats.lock().unwrap_or_else(|p| p.into_inner()).clone();
        inner.state = SchedulerState::Idle;
        info!(generation, outcome = ?outcome, "scheduler idle");
        outcome
    }

    /// Stop, settle, then start again. If the stop left anything behind the
    /// state is forced to Idle first, so two loops are never both current.
    pub fn restart(&self, source: Arc<dyn TaskSource>) -> Result<bool> {
        let outcome = self.stop();
        debug!(outcome = ?outcome, "restart: stopped");

        thread::sleep(self.config.restart_settle);

        if self.state() != SchedulerState::Idle {
            self.force_idle();
        }
        self.start(source)
    }

    /// Cancel whatever domain is current and mark the scheduler Idle without
    /// waiting. Cancellation is cooperative, so a loop stuck inside an
    /// iteration keeps running until it next checks.
    pub fn force_idle(&self) {
        let mut inner = self.lock();
        if let Some(domain) = inner.domain.take() {
            warn!(generation = domain.generation, "forcing scheduler idle");
            domain.cancel.cancel();
            inner.last_stats = domain.stats();
        }
        inner.state = SchedulerState::Idle;
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = self.lock();
        let domain = inner.domain.as_ref();
        SchedulerStatus {
            state: inner.state,
            is_running: inner.state == SchedulerState::Running,
            domain_alive: domain.is_some_and(|d| !d.thread.is_finished()),
            live_domains: self.live_domains.load(Ordering::SeqCst),
            generation: inner.generation,
            started_at: domain.map(|d| d.started_at),
            notified_tasks: self.manager.tracker().len(),
            poll: domain.map(Domain::stats).unwrap_or_else(|| inner.last_stats.clone()),
        }
    }

    fn spawn_domain(&self, generation: u64, source: Arc<dyn TaskSource>) -> Result<Domain> {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = mpsc::channel();
        let poll = PollLoop::new(source, self.manager.clone(), self.config.poll.clone());
        let stats = poll.stats_handle();

        self.live_domains.fetch_add(1, Ordering::SeqCst);
        let exit = DomainExit {
            live: self.live_domains.clone(),
            done: done_tx,
        };

        let token = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("tasky-poll-{}", generation))
            .spawn(move || {
                let _exit = exit;
                run_domain(generation, poll, token);
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                // The closure, and with it `exit`, was dropped: the count is restored.
                error!(generation, error = %e, "failed to spawn poll thread");
                return Err(e.into());
            }
        };

        Ok(Domain {
            generation,
            cancel,
            done: done_rx,
            thread,
            started_at: Local::now(),
            stats,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(domain) = self.lock().domain.take() {
            domain.cancel.cancel();
        }
    }
}

/// Body of a domain thread.
fn run_domain(generation: u64, poll: PollLoop, cancel: CancellationToken) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
    let runtime = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            error!(generation, error = %e, "failed to build poll runtime");
            return;
        }
    };

    debug!(generation, "poll domain running");
    runtime.block_on(poll.run(cancel));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    debug!(generation, "poll domain exited");
}
