//! Due-task sources
//!
//! The scheduler never owns task storage. It is handed a [`TaskSource`]
//! capability and asks it, once per poll, for everything currently due.
//!
//! Implementations must return due tasks ordered by due time ascending so
//! repeated polls see the same order.

pub mod sqlite;

use std::sync::RwLock;

use chrono::{Local, NaiveDateTime};

use crate::domain::{Task, TaskId};
use crate::error::{Result, TaskyError};

pub use sqlite::SqliteTaskSource;

/// Read-only view of the host's task storage.
pub trait TaskSource: Send + Sync {
    /// All incomplete tasks with `due_time <= now`, ordered by due time.
    fn list_due_tasks(&self) -> Result<Vec<Task>>;

    /// Every task, ordered by due time.
    ///
    /// Sources that only know about due tasks may leave the default.
    fn list_all_tasks(&self) -> Result<Vec<Task>> {
        self.list_due_tasks()
    }
}

impl<F> TaskSource for F
where
    F: Fn() -> Result<Vec<Task>> + Send + Sync,
{
    fn list_due_tasks(&self) -> Result<Vec<Task>> {
        self()
    }
}

/// In-process task list, handy for embedding hosts and tests.
///
/// The clock can be pinned so "due" is deterministic.
#[derive(Default)]
pub struct MemoryTaskSource {
    tasks: RwLock<Vec<Task>>,
    pinned_now: RwLock<Option<NaiveDateTime>>,
}

impl MemoryTaskSource {
    /// Create an empty source using the local clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source pre-filled with `tasks`.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
            pinned_now: RwLock::new(None),
        }
    }

    /// Pin "now" to a fixed instant (`None` returns to the local clock).
    pub fn set_now(&self, now: Option<NaiveDateTime>) -> Result<()> {
        *self.pinned_now.write().map_err(|_| poisoned())? = now;
        Ok(())
    }

    /// Insert or replace a task by id.
    pub fn upsert(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
        Ok(())
    }

    /// Remove a task. Returns whether it existed.
    pub fn remove(&self, id: TaskId) -> Result<bool> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        Ok(tasks.len() != before)
    }

    /// Mark a task completed or not. Returns whether it existed.
    pub fn set_completed(&self, id: TaskId, completed: bool) -> Result<bool> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.completed = completed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn now(&self) -> Result<NaiveDateTime> {
        let pinned = *self.pinned_now.read().map_err(|_| poisoned())?;
        Ok(pinned.unwrap_or_else(|| Local::now().naive_local()))
    }
}

impl TaskSource for MemoryTaskSource {
    fn list_due_tasks(&self) -> Result<Vec<Task>> {
        let now = self.now()?;
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        let mut due: Vec<Task> = tasks.iter().filter(|t| t.is_due(now)).cloned().collect();
        sort_by_due(&mut due);
        Ok(due)
    }

    fn list_all_tasks(&self) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        let mut all = tasks.clone();
        sort_by_due(&mut all);
        Ok(all)
    }
}

/// Due time ascending, id as tie-breaker.
pub(crate) fn sort_by_due(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.due_time.cmp(&b.due_time).then(a.id.cmp(&b.id)));
}

fn poisoned() -> TaskyError {
    TaskyError::Source("task list lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_memory_source_filters_and_orders_due() {
        let source = MemoryTaskSource::with_tasks(vec![
            Task::new(1, "later", at(11, 0)),
            Task::new(2, "done", at(8, 0)).with_completed(true),
            Task::new(3, "second", at(9, 30)),
            Task::new(4, "first", at(9, 0)),
            Task::new(5, "future", at(12, 0)),
        ]);
        source.set_now(Some(at(11, 0))).unwrap();

        let due = source.list_due_tasks().unwrap();
        let ids: Vec<i64> = due.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![4, 3, 1]);
    }

    #[test]
    fn test_memory_source_equal_due_times_order_by_id() {
        let source = MemoryTaskSource::with_tasks(vec![
            Task::new(9, "b", at(9, 0)),
            Task::new(2, "a", at(9, 0)),
        ]);
        source.set_now(Some(at(10, 0))).unwrap();

        let ids: Vec<i64> = source.list_due_tasks().unwrap().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn test_memory_source_upsert_replaces() {
        let source = MemoryTaskSource::new();
        source.upsert(Task::new(1, "old", at(9, 0))).unwrap();
        source.upsert(Task::new(1, "new", at(9, 0))).unwrap();

        let all = source.list_all_tasks().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "new");
    }

    #[test]
    fn test_memory_source_completion_removes_from_due() {
        let source = MemoryTaskSource::with_tasks(vec![Task::new(1, "t", at(9, 0))]);
        source.set_now(Some(at(10, 0))).unwrap();
        assert_eq!(source.list_due_tasks().unwrap().len(), 1);

        assert!(source.set_completed(TaskId(1), true).unwrap());
        assert!(source.list_due_tasks().unwrap().is_empty());
        assert!(!source.set_completed(TaskId(42), true).unwrap());
    }

    #[test]
    fn test_memory_source_remove() {
        let source = MemoryTaskSource::with_tasks(vec![Task::new(1, "t", at(9, 0))]);
        assert!(source.remove(TaskId(1)).unwrap());
        assert!(!source.remove(TaskId(1)).unwrap());
    }

    #[test]
    fn test_closure_is_a_task_source() {
        let source = || -> Result<Vec<Task>> { Ok(vec![Task::new(1, "t", at(9, 0))]) };
        assert_eq!(source.list_due_tasks().unwrap().len(), 1);
        assert_eq!(source.list_all_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_failing_closure_propagates() {
        let source = || -> Result<Vec<Task>> { Err(TaskyError::Source("offline".to_string())) };
        assert!(source.list_due_tasks().is_err());
    }
}
