//! Notification core: dedup tracking, alert channels, the ring effect and
//! the delivery chain, behind the [`NotificationManager`] facade.

pub mod chain;
pub mod channels;
pub mod console;
pub mod mock;
pub mod ring;
pub mod system;
pub mod tracker;

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{Task, TaskId};

pub use chain::{ChannelSet, DeliveryChain, DeliveryConfig, DeliveryReport, StepOutcome};
pub use channels::{
    ChannelError, ChannelKind, ChannelResult, HostWindow, ModalAlert, PopupContent, Sounder, ToastRequest, Toaster,
    ToneSpec,
};
pub use console::ConsoleNotifier;
pub use ring::{RingConfig, RingRegistry};
pub use tracker::DedupTracker;

/// Owns the dedup tracker and the delivery chain.
///
/// Shared between the host (which resets tasks on edit and attaches its
/// window) and the scheduler's poll loop.
pub struct NotificationManager {
    tracker: DedupTracker,
    chain: DeliveryChain,
}

impl NotificationManager {
    pub fn new(chain: DeliveryChain) -> Self {
        Self {
            tracker: DedupTracker::new(),
            chain,
        }
    }

    /// Manager wired to the platform channels.
    pub fn platform(delivery: DeliveryConfig, ring: RingConfig) -> Self {
        Self::new(DeliveryChain::new(delivery, ring, ChannelSet::platform()))
    }

    pub fn tracker(&self) -> &DedupTracker {
        &self.tracker
    }

    pub fn chain(&self) -> &DeliveryChain {
        &self.chain
    }

    pub fn set_host_window(&self, window: &Arc<dyn HostWindow>) {
        self.chain.set_host_window(window);
    }

    pub fn revalidate_channels(&self) {
        self.chain.revalidate_channels();
    }

    pub fn is_task_notified(&self, task_id: TaskId) -> bool {
        self.tracker.is_notified(task_id)
    }

    /// Forget that `task_id` was alerted and silence its ring.
    ///
    /// Called when a task is edited; if it is still due on the next poll it
    /// is delivered again.
    pub fn reset_notification_for_task(&self, task_id: TaskId) -> bool {
        let was_notified = self.tracker.reset(task_id);
        let was_ringing = self.chain.cancel_ring(task_id);
        info!(task_id = %task_id, was_notified, was_ringing, "notification reset");
        was_notified
    }

    /// Forget every alerted task.
    pub fn clear_notified_tasks(&self) {
        let count = self.tracker.len();
        self.tracker.clear();
        info!(count, "cleared notified tasks");
    }

    /// Run the delivery chain for `task` without touching the tracker.
    pub async fn deliver(&self, task: &Task) -> bool {
        self.chain.deliver(task).await
    }

    pub async fn deliver_with_report(&self, task: &Task) -> DeliveryReport {
        self.chain.deliver_with_report(task).await
    }

    /// Deliver `task` unless it was already alerted, then record it.
    ///
    /// Returns `None` when the task was skipped, otherwise whether the
    /// delivery reached the user. The id is recorded either way once the
    /// chain has run.
    pub async fn notify_if_new(&self, task: &Task) -> Option<bool> {
        if self.tracker.is_notified(task.id) {
            debug!(task_id = %task.id, "already notified, skipping");
            return None;
        }
        let delivered = self.chain.deliver(task).await;
        self.tracker.mark_notified(task.id);
        Some(delivered)
    }
}
