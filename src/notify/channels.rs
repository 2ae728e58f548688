//! Alert channel contracts
//!
//! Each channel is an independent, best-effort way of reaching the user.
//! Implementations report failure through [`ChannelError`]; the delivery
//! chain decides what a failure means for the rest of the chain.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Task, TaskId};

/// Format used for the due line inside the popup.
pub const POPUP_DUE_FORMAT: &str = "%m/%d %H:%M";

/// Why a channel could not deliver.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Not available right now; try again next time.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The backing resource is gone for good (e.g. a destroyed window).
    #[error("invalidated: {0}")]
    Invalidated(String),

    /// The platform rejected the shape of the request.
    #[error("rejected parameters: {0}")]
    Rejected(String),

    /// Anything else.
    #[error("failed: {0}")]
    Failed(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether the channel should be switched off until revalidated.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ChannelError::Invalidated(_))
    }
}

/// Result alias for channel calls.
pub type ChannelResult<T = ()> = std::result::Result<T, ChannelError>;

/// The channels the delivery chain knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Tone,
    Popup,
    Toast,
    Modal,
    Console,
}

/// A single tone: pitch and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneSpec {
    pub frequency_hz: u32,
    pub duration_ms: u64,
}

impl ToneSpec {
    pub const fn new(frequency_hz: u32, duration_ms: u64) -> Self {
        Self {
            frequency_hz,
            duration_ms,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Audible output.
pub trait Sounder: Send + Sync {
    /// Play the platform's standard alert sound.
    fn system_alert(&self) -> ChannelResult;

    /// Play a manual tone of the given pitch and length.
    fn tone(&self, tone: ToneSpec) -> ChannelResult;
}

/// Non-owning handle to the host application's main window.
///
/// The delivery chain only holds a `Weak` to it; when the window is gone it
/// drops the reference instead of retrying.
pub trait HostWindow: Send + Sync {
    /// Whether the window can still render anything.
    fn is_alive(&self) -> bool;

    /// Render the in-app popup. Return [`ChannelError::Invalidated`] if the
    /// window turned out to be destroyed.
    fn show_popup(&self, popup: &PopupContent) -> ChannelResult;

    /// Optional visual pulse used by the ring effect.
    fn flash(&self, _task_id: TaskId) -> ChannelResult {
        Ok(())
    }
}

/// Platform toast/notification-center backend.
pub trait Toaster: Send + Sync {
    fn show(&self, request: &ToastRequest) -> ChannelResult;
}

/// Last-resort modal that does not depend on the host UI toolkit.
pub trait ModalAlert: Send + Sync {
    fn show(&self, title: &str, body: &str) -> ChannelResult;
}

/// What the in-app popup shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupContent {
    pub task_id: TaskId,
    pub heading: String,
    pub title: String,
    pub description: Option<String>,
    pub due_label: String,
    pub auto_close: Duration,
}

impl PopupContent {
    pub fn for_task(task: &Task, auto_close: Duration) -> Self {
        Self {
            task_id: task.id,
            heading: "TASKY ALERT!".to_string(),
            title: format!("'{}'", task.title),
            description: task.description().map(|d| format!("Description: {}", d)),
            due_label: format!("Due: {}", task.due_time.format(POPUP_DUE_FORMAT)),
            auto_close,
        }
    }
}

/// A platform toast request.
///
/// `duration`, `icon` and `app_name` are optional extras; some backends only
/// accept title and message, see [`ToastRequest::reduced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastRequest {
    pub title: String,
    pub message: String,
    pub duration: Option<Duration>,
    pub icon: Option<String>,
    pub app_name: Option<String>,
}

impl ToastRequest {
    pub fn for_task(task: &Task, duration: Duration, app_name: &str) -> Self {
        let message = match task.description() {
            Some(desc) => format!("{}\n\nDue: {}", desc, task.formatted_due()),
            None => format!("Due: {}", task.formatted_due()),
        };

        Self {
            title: format!("🔔 TASK DUE: {}", task.title),
            message,
            duration: Some(duration),
            icon: None,
            app_name: Some(app_name.to_string()),
        }
    }

    /// Title and message only.
    pub fn reduced(&self) -> Self {
        Self {
            title: self.title.clone(),
            message: self.message.clone(),
            duration: None,
            icon: None,
            app_name: None,
        }
    }

    pub fn is_reduced(&self) -> bool {
        self.duration.is_none() && self.icon.is_none() && self.app_name.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn task() -> Task {
        let due = NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        Task::new(4, "Water plants", due)
    }

    #[test]
    fn test_only_invalidated_is_permanent() {
        assert!(ChannelError::Invalidated("gone".into()).is_permanent());
        assert!(!ChannelError::Unavailable("busy".into()).is_permanent());
        assert!(!ChannelError::Rejected("icon".into()).is_permanent());
        assert!(!ChannelError::Failed("boom".into()).is_permanent());
    }

    #[test]
    fn test_toast_request_without_description() {
        let req = ToastRequest::for_task(&task(), Duration::from_secs(15), "Tasky");
        assert_eq!(req.title, "🔔 TASK DUE: Water plants");
        assert_eq!(req.message, "Due: 2026-03-14 09:05");
        assert_eq!(req.duration, Some(Duration::from_secs(15)));
        assert!(!req.is_reduced());
    }

    #[test]
    fn test_toast_request_with_description() {
        let req = ToastRequest::for_task(&task().with_description("balcony"), Duration::from_secs(15), "Tasky");
        assert_eq!(req.message, "balcony\n\nDue: 2026-03-14 09:05");
    }

    #[test]
    fn test_reduced_toast_keeps_text() {
        let req = ToastRequest::for_task(&task(), Duration::from_secs(15), "Tasky");
        let reduced = req.reduced();
        assert!(reduced.is_reduced());
        assert_eq!(reduced.title, req.title);
        assert_eq!(reduced.message, req.message);
    }

    #[test]
    fn test_popup_content() {
        let popup = PopupContent::for_task(&task().with_description("balcony"), Duration::from_secs(25));
        assert_eq!(popup.heading, "TASKY ALERT!");
        assert_eq!(popup.title, "'Water plants'");
        assert_eq!(popup.description.as_deref(), Some("Description: balcony"));
        assert_eq!(popup.due_label, "Due: 03/14 09:05");
    }
}
