//! Ring effect: a bounded, cancellable repeating pulse for one due task.
//!
//! Each [`RingEffect`] runs as its own Tokio task and never waits on the
//! delivery chain. It stops when cancelled or after `max_cycles` pulses,
//! whichever comes first, so the total ringing time is capped at
//! `max_cycles * cycle_spacing` no matter how often `start()` is called.
//!
//! [`RingRegistry`] maps task ids to live rings so an edit can silence one
//! task without touching the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Task, TaskId};
use crate::notify::channels::{ChannelError, ChannelResult, HostWindow, Sounder, ToneSpec};
use crate::notify::console::ConsoleNotifier;

/// Ring timing and tone pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Hard ceiling on pulses per ring.
    pub max_cycles: u32,
    /// Time between the start of consecutive pulses.
    pub cycle_spacing_ms: u64,
    /// How long `stop()` waits for the ring task to exit.
    pub join_timeout_ms: u64,
    /// Tones played per pulse.
    pub pattern: Vec<ToneSpec>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            max_cycles: 30,
            cycle_spacing_ms: 2000,
            join_timeout_ms: 1000,
            pattern: vec![
                ToneSpec::new(440, 150),
                ToneSpec::new(880, 150),
                ToneSpec::new(440, 150),
            ],
        }
    }
}

impl RingConfig {
    pub fn with_max_cycles(mut self, cycles: u32) -> Self {
        self.max_cycles = cycles;
        self
    }

    pub fn with_cycle_spacing(mut self, spacing: Duration) -> Self {
        self.cycle_spacing_ms = spacing.as_millis() as u64;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_pattern(mut self, pattern: Vec<ToneSpec>) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn cycle_spacing(&self) -> Duration {
        Duration::from_millis(self.cycle_spacing_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Upper bound on how long one ring can last.
    pub fn ceiling(&self) -> Duration {
        self.cycle_spacing() * self.max_cycles
    }
}

/// Where a ring pulse goes.
#[derive(Clone)]
pub struct RingOutputs {
    pub sounder: Arc<dyn Sounder>,
    pub console: Arc<ConsoleNotifier>,
    pub window: Option<Weak<dyn HostWindow>>,
}

/// How a single pulse was rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    Pattern,
    SystemAlert,
    Text,
    Silent,
}

/// One task's ring. Single use: once finished or cancelled it cannot be
/// restarted; the registry creates a fresh one instead.
pub struct RingEffect {
    task: Task,
    config: RingConfig,
    outputs: RingOutputs,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<u32>>>,
}

impl RingEffect {
    pub fn new(task: Task, config: RingConfig, outputs: RingOutputs) -> Self {
        Self {
            task,
            config,
            outputs,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Spawn the ring task. Must be called inside a Tokio runtime.
    ///
    /// Returns `false` if this ring was already started or cancelled.
    pub fn start(&self) -> bool {
        let mut handle = self.handle_slot();
        if handle.is_some() || self.cancel.is_cancelled() {
            return false;
        }

        *handle = Some(tokio::spawn(run_ring(
            self.task.clone(),
            self.config.clone(),
            self.outputs.clone(),
            self.cancel.clone(),
        )));
        debug!(task_id = %self.task.id, "ring started");
        true
    }

    /// Started, not cancelled, and not yet finished.
    pub fn is_active(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.handle_slot()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the ring to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the ring has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Signal the ring to stop and wait up to the join timeout for it.
    ///
    /// Returns the number of pulses played, or `None` if the ring never ran
    /// or did not exit in time (it is aborted in that case).
    pub async fn stop(&self) -> Option<u32> {
        self.cancel.cancel();
        let mut handle = self.handle_slot().take()?;

        match tokio::time::timeout(self.config.join_timeout(), &mut handle).await {
            Ok(Ok(cycles)) => Some(cycles),
            Ok(Err(e)) => {
                if !e.is_cancelled() {
                    warn!(task_id = %self.task.id, error = %e, "ring task failed");
                }
                None
            }
            Err(_) => {
                warn!(
                    task_id = %self.task.id,
                    timeout_ms = self.config.join_timeout_ms,
                    "ring did not stop in time, aborting"
                );
                handle.abort();
                None
            }
        }
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<JoinHandle<u32>>> {
        self.handle.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn run_ring(task: Task, config: RingConfig, outputs: RingOutputs, cancel: CancellationToken) -> u32 {
    let deadline = Instant::now() + config.ceiling();
    let mut ticker = tokio::time::interval(config.cycle_spacing().max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cycles = 0;
    while cycles < config.max_cycles {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if Instant::now() >= deadline {
            break;
        }

        let pulse = {
            let task = task.clone();
            let pattern = config.pattern.clone();
            let outputs = outputs.clone();
            tokio::task::spawn_blocking(move || pulse_once(&task, cycles, &pattern, &outputs))
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = pulse => match result {
                Ok(kind) => debug!(task_id = %task.id, cycle = cycles, pulse = ?kind, "ring pulse"),
                Err(e) => warn!(task_id = %task.id, cycle = cycles, error = %e, "ring pulse panicked"),
            },
        }
        cycles += 1;
    }

    debug!(task_id = %task.id, cycles, "ring finished");
    cycles
}

/// One pulse: optional window flash, then pattern, system alert, or text.
fn pulse_once(task: &Task, cycle: u32, pattern: &[ToneSpec], outputs: &RingOutputs) -> PulseKind {
    if let Some(window) = outputs.window.as_ref().and_then(Weak::upgrade) {
        if window.is_alive() {
            if let Err(e) = window.flash(task.id) {
                debug!(task_id = %task.id, cycle, error = %e, "window flash failed");
            }
        }
    }

    match play_pattern(outputs.sounder.as_ref(), pattern) {
        Ok(()) => return PulseKind::Pattern,
        Err(e) => debug!(task_id = %task.id, error = %e, "ring pattern unavailable"),
    }

    match outputs.sounder.system_alert() {
        Ok(()) => return PulseKind::SystemAlert,
        Err(e) => debug!(task_id = %task.id, error = %e, "ring system alert unavailable"),
    }

    match outputs.console.ring_indicator(task, cycle) {
        Ok(()) => PulseKind::Text,
        Err(_) => PulseKind::Silent,
    }
}

fn play_pattern(sounder: &dyn Sounder, pattern: &[ToneSpec]) -> ChannelResult {
    if pattern.is_empty() {
        return Err(ChannelError::Unavailable("empty ring pattern".to_string()));
    }
    for tone in pattern {
        sounder.tone(*tone)?;
    }
    Ok(())
}

/// Live rings keyed by task id.
#[derive(Default)]
pub struct RingRegistry {
    rings: Mutex<HashMap<TaskId, Arc<RingEffect>>>,
}

impl RingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ringing for `task`, reusing an already active ring for the
    /// same id. Must be called inside a Tokio runtime.
    pub fn start(&self, task: &Task, config: &RingConfig, outputs: RingOutputs) -> Arc<RingEffect> {
        let mut rings = self.map();
        rings.retain(|_, ring| ring.is_active());
        let ring = rings
            .entry(task.id)
            .or_insert_with(|| Arc::new(RingEffect::new(task.clone(), config.clone(), outputs)))
            .clone();
        // Start under the lock: an unstarted ring reads as inactive to `retain`.
        ring.start();
        ring
    }

    pub fn is_ringing(&self, task_id: TaskId) -> bool {
        self.map().get(&task_id).is_some_and(|r| r.is_active())
    }

    /// Ids with an active ring, sorted.
    pub fn active(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .map()
            .iter()
            .filter(|(_, r)| r.is_active())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Remove and signal one ring without waiting. Returns whether one existed.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let removed = self.map().remove(&task_id);
        match removed {
            Some(ring) => {
                ring.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove and signal every ring. Returns how many were registered.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Arc<RingEffect>> = self.map().drain().map(|(_, r)| r).collect();
        for ring in &drained {
            ring.cancel();
        }
        drained.len()
    }

    /// Remove one ring and wait (bounded) for it to stop.
    pub async fn stop(&self, task_id: TaskId) -> Option<u32> {
        let removed = self.map().remove(&task_id);
        match removed {
            Some(ring) => ring.stop().await,
            None => None,
        }
    }

    /// Stop `ring`, removing its registry entry only if it is still the
    /// registered ring for `task_id` (a newer ring may have replaced it).
    pub async fn stop_if_current(&self, task_id: TaskId, ring: &Arc<RingEffect>) -> Option<u32> {
        {
            let mut rings = self.map();
            if rings.get(&task_id).is_some_and(|current| Arc::ptr_eq(current, ring)) {
                rings.remove(&task_id);
            }
        }
        ring.stop().await
    }

    fn map(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<RingEffect>>> {
        self.rings.lock().unwrap_or_else(|p| p.into_inner())
    }
}
