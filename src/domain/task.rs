//! Task record as seen by the notification core
//!
//! Only `id`, `title`, `description` and `due_time` drive notifications;
//! `completed` is carried so sources and the CLI can filter on it.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format used for due times in toasts and console output.
pub const DUE_FORMAT: &str = "%Y-%m-%d %H:%M";

const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_HOUR: i64 = 3_600;

/// Stable identifier assigned by the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A task snapshot returned by a [`crate::source::TaskSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Local wall-clock due time.
    pub due_time: NaiveDateTime,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// Create an incomplete task.
    pub fn new(id: i64, title: &str, due_time: NaiveDateTime) -> Self {
        Self {
            id: TaskId(id),
            title: title.to_string(),
            description: String::new(),
            due_time,
            completed: false,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Mark completed or not.
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Description, or `None` when empty.
    pub fn description(&self) -> Option<&str> {
        let trimmed = self.description.trim();
        if trimmed.is_empty() { None } else { Some(&self.description) }
    }

    /// Due time rendered with [`DUE_FORMAT`].
    pub fn formatted_due(&self) -> String {
        self.due_time.format(DUE_FORMAT).to_string()
    }

    /// Not completed and due at or before `now`.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        !self.completed && now >= self.due_time
    }

    /// Not completed and strictly past due.
    pub fn is_overdue(&self, now: NaiveDateTime) -> bool {
        !self.completed && now > self.due_time
    }

    /// Same as [`Task::is_due`] against the local clock.
    pub fn is_due_now(&self) -> bool {
        self.is_due(Local::now().naive_local())
    }

    /// Human-readable distance to the due time, e.g. "Due in 2 hour(s)".
    pub fn time_until_due(&self, now: NaiveDateTime) -> String {
        if self.completed {
            return "Completed".to_string();
        }

        if self.due_time > now {
            format!("Due in {}", describe_span((self.due_time - now).num_seconds()))
        } else {
            format!("Overdue by {}", describe_span((now - self.due_time).num_seconds()))
        }
    }
}

/// Coarsest whole unit: days, then hours (only past one full hour), then minutes.
fn describe_span(total_secs: i64) -> String {
    let days = total_secs / SECS_PER_DAY;
    let rem = total_secs % SECS_PER_DAY;

    if days > 0 {
        format!("{} day(s)", days)
    } else if rem > SECS_PER_HOUR {
        format!("{} hour(s)", rem / SECS_PER_HOUR)
    } else {
        format!("{} minute(s)", rem / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new(7, "Pay rent", at(9, 0));
        assert_eq!(task.id, TaskId(7));
        assert!(task.description.is_empty());
        assert!(!task.completed);
        assert_eq!(task.description(), None);
    }

    #[test]
    fn test_description_blank_is_none() {
        let task = Task::new(1, "t", at(9, 0)).with_description("   ");
        assert_eq!(task.description(), None);

        let task = task.with_description("bring keys");
        assert_eq!(task.description(), Some("bring keys"));
    }

    #[test]
    fn test_formatted_due() {
        let task = Task::new(1, "t", at(9, 5));
        assert_eq!(task.formatted_due(), "2026-03-14 09:05");
    }

    #[test]
    fn test_is_due_boundaries() {
        let task = Task::new(1, "t", at(9, 0));
        assert!(!task.is_due(at(8, 59)));
        assert!(task.is_due(at(9, 0)));
        assert!(!task.is_overdue(at(9, 0)));
        assert!(task.is_overdue(at(9, 1)));
    }

    #[test]
    fn test_completed_task_never_due() {
        let task = Task::new(1, "t", at(9, 0)).with_completed(true);
        assert!(!task.is_due(at(12, 0)));
        assert_eq!(task.time_until_due(at(12, 0)), "Completed");
    }

    #[test]
    fn test_time_until_due_labels() {
        let task = Task::new(1, "t", at(12, 0));
        assert_eq!(task.time_until_due(at(11, 30)), "Due in 30 minute(s)");
        assert_eq!(task.time_until_due(at(9, 0)), "Due in 3 hour(s)");
        assert_eq!(task.time_until_due(at(12, 45)), "Overdue by 45 minute(s)");

        let earlier = at(12, 0) - Duration::days(2);
        assert_eq!(task.time_until_due(earlier), "Due in 2 day(s)");
    }

    #[test]
    fn test_exactly_one_hour_reads_as_minutes() {
        let task = Task::new(1, "t", at(12, 0));
        assert_eq!(task.time_until_due(at(11, 0)), "Due in 60 minute(s)");
    }

    #[test]
    fn test_task_serde_roundtrip() {
        let task = Task::new(3, "Call mom", at(18, 0)).with_description("birthday");
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"id\":3"));
        let restored: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, restored);
    }
}
