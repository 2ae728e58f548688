//! Error types for Tasky
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::notify::ChannelError;

/// All error types that can occur in the notification core
#[derive(Debug, Error)]
pub enum TaskyError {
    /// The due-task source failed to answer a query
    #[error("Task source error: {0}")]
    Source(String),

    /// Invalid lifecycle transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An alert channel failed
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error from the task database adapter
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Tasky operations
pub type Result<T> = std::result::Result<T, TaskyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error() {
        let err = TaskyError::Source("database is locked".to_string());
        assert_eq!(err.to_string(), "Task source error: database is locked");
    }

    #[test]
    fn test_invalid_state_error() {
        let err = TaskyError::InvalidState("scheduler is stopping".to_string());
        assert_eq!(err.to_string(), "Invalid state: scheduler is stopping");
    }

    #[test]
    fn test_channel_error_conversion() {
        let err: TaskyError = ChannelError::Unavailable("no toast backend".to_string()).into();
        assert!(matches!(err, TaskyError::Channel(_)));
        assert!(err.to_string().contains("no toast backend"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TaskyError = io_err.into();
        assert!(matches!(err, TaskyError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TaskyError::InvalidState("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
