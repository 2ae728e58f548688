//! Delivery chain: every way of telling the user a task is due.
//!
//! Steps run in a fixed order and each one is isolated. A failing, missing
//! or panicking channel is logged and the chain moves on. The console
//! step always runs, so a delivery only counts as failed when even that
//! could not write.
//!
//! 1. start the ring effect
//! 2. one-shot alert tone (system sound, then manual tone, then text)
//! 3. in-app popup on the host window, if it is still alive
//! 4. platform toast, only if the popup did not render
//! 5. toolkit-independent modal, only if neither popup nor toast did
//! 6. console notice
//! 7. schedule the ring to stop after `ring_duration`

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Task, TaskId};
use crate::notify::channels::{
    ChannelError, ChannelKind, ChannelResult, HostWindow, ModalAlert, PopupContent, Sounder, ToastRequest, Toaster,
    ToneSpec,
};
use crate::notify::console::ConsoleNotifier;
use crate::notify::ring::{RingConfig, RingEffect, RingOutputs, RingRegistry};
use crate::notify::system::{CommandSounder, CommandToaster, RfdModal};

/// The one-shot alert tone used when the system sound is unavailable.
pub const ALERT_TONE: ToneSpec = ToneSpec::new(800, 500);

/// Delivery timings and labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// How long the ring runs before the chain stops it.
    pub ring_duration_secs: u64,
    pub toast_duration_secs: u64,
    pub popup_auto_close_secs: u64,
    pub app_name: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ring_duration_secs: 10,
            toast_duration_secs: 15,
            popup_auto_close_secs: 25,
            app_name: "Tasky".to_string(),
        }
    }
}

impl DeliveryConfig {
    pub fn with_ring_duration(mut self, duration: Duration) -> Self {
        self.ring_duration_secs = duration.as_secs();
        self
    }

    pub fn with_toast_duration(mut self, duration: Duration) -> Self {
        self.toast_duration_secs = duration.as_secs();
        self
    }

    pub fn with_popup_auto_close(mut self, duration: Duration) -> Self {
        self.popup_auto_close_secs = duration.as_secs();
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn ring_duration(&self) -> Duration {
        Duration::from_secs(self.ring_duration_secs)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_secs(self.toast_duration_secs)
    }

    pub fn popup_auto_close(&self) -> Duration {
        Duration::from_secs(self.popup_auto_close_secs)
    }
}

/// The channel implementations a chain delivers through.
#[derive(Clone)]
pub struct ChannelSet {
    pub sounder: Arc<dyn Sounder>,
    pub toaster: Option<Arc<dyn Toaster>>,
    pub modal: Option<Arc<dyn ModalAlert>>,
    pub console: Arc<ConsoleNotifier>,
}

impl ChannelSet {
    /// Platform helpers for sound and toasts, `rfd` for the modal, stdout.
    pub fn platform() -> Self {
        Self {
            sounder: Arc::new(CommandSounder::new()),
            toaster: Some(Arc::new(CommandToaster::new())),
            modal: Some(Arc::new(RfdModal::new())),
            console: Arc::new(ConsoleNotifier::stdout()),
        }
    }

    /// Only the given sounder and console; no toast, no modal.
    pub fn minimal(sounder: Arc<dyn Sounder>, console: Arc<ConsoleNotifier>) -> Self {
        Self {
            sounder,
            toaster: None,
            modal: None,
            console,
        }
    }

    pub fn with_sounder(mut self, sounder: Arc<dyn Sounder>) -> Self {
        self.sounder = sounder;
        self
    }

    pub fn with_toaster(mut self, toaster: Arc<dyn Toaster>) -> Self {
        self.toaster = Some(toaster);
        self
    }

    pub fn with_modal(mut self, modal: Arc<dyn ModalAlert>) -> Self {
        self.modal = Some(modal);
        self
    }

    pub fn with_console(mut self, console: Arc<ConsoleNotifier>) -> Self {
        self.console = console;
        self
    }
}

/// What happened at one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Delivered,
    /// The primary mechanism failed but a fallback worked.
    Fallback(String),
    Skipped(String),
    Disabled,
    Failed(String),
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Delivered | StepOutcome::Fallback(_))
    }
}

/// Per-step record of one delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub task_id: TaskId,
    pub ring_started: bool,
    pub steps: Vec<(ChannelKind, StepOutcome)>,
}

impl DeliveryReport {
    fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            ring_started: false,
            steps: Vec::new(),
        }
    }

    fn record(&mut self, kind: ChannelKind, outcome: StepOutcome) {
        self.steps.push((kind, outcome));
    }

    pub fn outcome(&self, kind: ChannelKind) -> Option<&StepOutcome> {
        self.steps.iter().find(|(k, _)| *k == kind).map(|(_, o)| o)
    }

    /// At least one channel reached the user.
    pub fn delivered(&self) -> bool {
        self.steps.iter().any(|(_, o)| o.succeeded())
    }
}

/// Run a blocking channel call off the async thread; a panic becomes `Failed`.
async fn call_blocking<F>(kind: ChannelKind, call: F) -> ChannelResult
where
    F: FnOnce() -> ChannelResult + Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(result) => result,
        Err(e) => Err(ChannelError::Failed(format!("{:?} channel panicked: {}", kind, e))),
    }
}

/// Ordered, failure-isolated delivery of due-task alerts.
pub struct DeliveryChain {
    config: DeliveryConfig,
    ring_config: RingConfig,
    channels: ChannelSet,
    window: Mutex<Option<Weak<dyn HostWindow>>>,
    disabled: Mutex<HashSet<ChannelKind>>,
    rings: Arc<RingRegistry>,
}

impl DeliveryChain {
    pub fn new(config: DeliveryConfig, ring_config: RingConfig, channels: ChannelSet) -> Self {
        Self {
            config,
            ring_config,
            channels,
            window: Mutex::new(None),
            disabled: Mutex::new(HashSet::new()),
            rings: Arc::new(RingRegistry::new()),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn rings(&self) -> &RingRegistry {
        &self.rings
    }

    /// Anchor popups to `window`. Only a weak reference is kept. Re-enables
    /// the popup channel.
    pub fn set_host_window(&self, window: &Arc<dyn HostWindow>) {
        *self.window_slot() = Some(Arc::downgrade(window));
        self.disabled_set().remove(&ChannelKind::Popup);
        debug!("host window attached");
    }

    pub fn clear_host_window(&self) {
        *self.window_slot() = None;
    }

    /// Whether a host window reference is held and still alive.
    pub fn has_host_window(&self) -> bool {
        self.live_window().is_some()
    }

    /// Re-enable every channel switched off by a permanent failure.
    pub fn revalidate_channels(&self) {
        let mut disabled = self.disabled_set();
        if !disabled.is_empty() {
            let kinds: Vec<ChannelKind> = disabled.iter().copied().collect();
            info!(channels = ?kinds, "re-enabling disabled channels");
        }
        disabled.clear();
    }

    pub fn disabled_channels(&self) -> Vec<ChannelKind> {
        self.disabled_set().iter().copied().collect()
    }

    pub fn is_disabled(&self, kind: ChannelKind) -> bool {
        self.disabled_set().contains(&kind)
    }

    /// Cancel a task's ring without waiting.
    pub fn cancel_ring(&self, task_id: TaskId) -> bool {
        self.rings.cancel(task_id)
    }

    /// Deliver and report only whether anything reached the user.
    pub async fn deliver(&self, task: &Task) -> bool {
        self.deliver_with_report(task).await.delivered()
    }

    /// Run every step for `task`. Must be called inside a Tokio runtime.
    pub async fn deliver_with_report(&self, task: &Task) -> DeliveryReport {
        info!(task_id = %task.id, title = %task.title, "delivering due-task alert");
        let mut report = DeliveryReport::new(task.id);

        let ring = self.start_ring(task);
        report.ring_started = ring.is_active();

        let tone = self.play_alert_tone().await;
        report.record(ChannelKind::Tone, tone);

        let popup = self.show_popup(task).await;
        let popup_shown = popup.succeeded();
        report.record(ChannelKind::Popup, popup);

        let toast = if popup_shown {
            StepOutcome::Skipped("popup shown".to_string())
        } else {
            self.show_toast(task).await
        };
        let toast_shown = toast.succeeded();
        report.record(ChannelKind::Toast, toast);

        let modal = if popup_shown || toast_shown {
            StepOutcome::Skipped("already visible".to_string())
        } else {
            self.show_modal(task).await
        };
        report.record(ChannelKind::Modal, modal);

        report.record(ChannelKind::Console, self.print_console(task));

        self.schedule_ring_stop(task.id, ring);

        for (kind, outcome) in &report.steps {
            debug!(task_id = %task.id, channel = ?kind, outcome = ?outcome, "delivery step");
        }
        if report.delivered() {
            info!(task_id = %task.id, "due-task alert delivered");
        } else {
            warn!(task_id = %task.id, "every alert channel failed");
        }
        report
    }

    fn start_ring(&self, task: &Task) -> Arc<RingEffect> {
        let outputs = RingOutputs {
            sounder: self.channels.sounder.clone(),
            console: self.channels.console.clone(),
            window: self.window_slot().clone(),
        };
        self.rings.start(task, &self.ring_config, outputs)
    }

    fn schedule_ring_stop(&self, task_id: TaskId, ring: Arc<RingEffect>) {
        let rings = self.rings.clone();
        let after = self.config.ring_duration();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {}
                _ = ring.cancelled() => {}
            }
            rings.stop_if_current(task_id, &ring).await;
        });
    }

    async fn play_alert_tone(&self) -> StepOutcome {
        if !self.is_disabled(ChannelKind::Tone) {
            let sounder = self.channels.sounder.clone();
            let system = call_blocking(ChannelKind::Tone, move || sounder.system_alert()).await;
            let Err(system_err) = system else {
                return StepOutcome::Delivered;
            };
            debug!(error = %system_err, "system alert sound failed, trying manual tone");

            let sounder = self.channels.sounder.clone();
            let manual = call_blocking(ChannelKind::Tone, move || sounder.tone(ALERT_TONE)).await;
            match manual {
                Ok(()) => return StepOutcome::Fallback("manual tone".to_string()),
                Err(e) => {
                    warn!(error = %e, "no alert tone could be played");
                    self.note_failure(ChannelKind::Tone, &e);
                }
            }
        }

        match self.channels.console.sound_indicator() {
            Ok(()) => StepOutcome::Fallback("text indicator".to_string()),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn show_popup(&self, task: &Task) -> StepOutcome {
        if self.is_disabled(ChannelKind::Popup) {
            return StepOutcome::Disabled;
        }
        let Some(window) = self.live_window() else {
            return StepOutcome::Skipped("no host window".to_string());
        };

        let content = PopupContent::for_task(task, self.config.popup_auto_close());
        match call_blocking(ChannelKind::Popup, move || window.show_popup(&content)).await {
            Ok(()) => StepOutcome::Delivered,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "popup failed");
                if e.is_permanent() {
                    self.clear_host_window();
                }
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    async fn show_toast(&self, task: &Task) -> StepOutcome {
        let Some(toaster) = self.channels.toaster.clone() else {
            return StepOutcome::Skipped("no toast backend".to_string());
        };
        if self.is_disabled(ChannelKind::Toast) {
            return StepOutcome::Disabled;
        }

        let request = ToastRequest::for_task(task, self.config.toast_duration(), &self.config.app_name);
        let reduced = request.reduced();

        let first = {
            let toaster = toaster.clone();
            call_blocking(ChannelKind::Toast, move || toaster.show(&request)).await
        };
        let result = match first {
            Err(ChannelError::Rejected(reason)) => {
                debug!(task_id = %task.id, reason = %reason, "toast parameters rejected, retrying reduced");
                call_blocking(ChannelKind::Toast, move || toaster.show(&reduced)).await
            }
            other => other,
        };

        match result {
            Ok(()) => StepOutcome::Delivered,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "toast failed");
                self.note_failure(ChannelKind::Toast, &e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    async fn show_modal(&self, task: &Task) -> StepOutcome {
        let Some(modal) = self.channels.modal.clone() else {
            return StepOutcome::Skipped("no modal backend".to_string());
        };
        if self.is_disabled(ChannelKind::Modal) {
            return StepOutcome::Disabled;
        }

        let title = format!("{}: task due", self.config.app_name);
        let body = modal_body(task);
        match call_blocking(ChannelKind::Modal, move || modal.show(&title, &body)).await {
            Ok(()) => StepOutcome::Delivered,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "emergency modal failed");
                self.note_failure(ChannelKind::Modal, &e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    fn print_console(&self, task: &Task) -> StepOutcome {
        match self.channels.console.notify(task) {
            Ok(()) => StepOutcome::Delivered,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "console notification failed");
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    fn note_failure(&self, kind: ChannelKind, err: &ChannelError) {
        if err.is_permanent() && self.disabled_set().insert(kind) {
            warn!(channel = ?kind, error = %err, "channel disabled until revalidated");
        }
    }

    /// Upgrade the stored window; drop the reference if it is gone or dead.
    fn live_window(&self) -> Option<Arc<dyn HostWindow>> {
        let mut slot = self.window_slot();
        let window = slot.as_ref()?.upgrade();
        match window {
            Some(w) if w.is_alive() => Some(w),
            Some(_) => {
                warn!("host window destroyed, dropping reference");
                *slot = None;
                None
            }
            None => {
                debug!("host window dropped, clearing reference");
                *slot = None;
                None
            }
        }
    }

    fn window_slot(&self) -> MutexGuard<'_, Option<Weak<dyn HostWindow>>> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn disabled_set(&self) -> MutexGuard<'_, HashSet<ChannelKind>> {
        self.disabled.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn modal_body(task: &Task) -> String {
    match task.description() {
        Some(desc) => format!("{}\n\n{}\n\nDue: {}", task.title, desc, task.formatted_due()),
        None => format!("{}\n\nDue: {}", task.title, task.formatted_due()),
    }
}
