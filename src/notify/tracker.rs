//! Dedup tracker: which due tasks have already been alerted.
//!
//! Membership is plain set membership. No timestamps, no expiry; callers
//! reset a task when it is edited and clear everything on rollover.
//! Nothing here is persisted.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::domain::TaskId;

/// Set of task ids that already triggered a delivery.
#[derive(Debug, Default)]
pub struct DedupTracker {
    notified: Mutex<HashSet<TaskId>>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_notified(&self, task_id: TaskId) -> bool {
        self.set().contains(&task_id)
    }

    /// Returns `true` if the id was not already present.
    pub fn mark_notified(&self, task_id: TaskId) -> bool {
        self.set().insert(task_id)
    }

    /// Forget one task so it alerts again when next seen due.
    /// Returns whether it was present.
    pub fn reset(&self, task_id: TaskId) -> bool {
        self.set().remove(&task_id)
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.set().clear();
    }

    pub fn len(&self) -> usize {
        self.set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set().is_empty()
    }

    /// Snapshot of the tracked ids, sorted.
    pub fn snapshot(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.set().iter().copied().collect();
        ids.sort();
        ids
    }

    // A panic while holding this lock cannot leave the set half-updated,
    // so a poisoned guard is still usable.
    fn set(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        self.notified.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
