//! Task supervisor errors.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`TaskError::DuplicateName`] | `TASK_DUPLICATE_NAME` | No |
//! | [`TaskError::NotFound`] | `TASK_NOT_FOUND` | No |
//! | [`TaskError::ShuttingDown`] | `TASK_SHUTTING_DOWN` | No |
//! | [`TaskError::Failed`] | `TASK_FAILED` | Yes |

use keyrelay_types::ErrorCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// A task with this name is still running.
    #[error("task already running: {0}")]
    DuplicateName(String),

    #[error("task not found: {0}")]
    NotFound(String),

    /// The supervisor no longer accepts tasks.
    #[error("task supervisor is shutting down")]
    ShuttingDown,

    /// The task returned an error or panicked.
    #[error("task {name} failed: {message}")]
    Failed { name: String, message: String },
}

impl TaskError {
    pub fn failed(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

impl ErrorCode for TaskError {
    fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName(_) => "TASK_DUPLICATE_NAME",
            Self::NotFound(_) => "TASK_NOT_FOUND",
            Self::ShuttingDown => "TASK_SHUTTING_DOWN",
            Self::Failed { .. } => "TASK_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_types::assert_error_codes;

    fn all_variants() -> Vec<TaskError> {
        vec![
            TaskError::DuplicateName("console".into()),
            TaskError::NotFound("watcher".into()),
            TaskError::ShuttingDown,
            TaskError::failed("console", "stdin closed"),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "TASK_");
    }

    #[test]
    fn failed_message_names_task() {
        let err = TaskError::failed("watcher", "permission denied");
        assert_eq!(err.to_string(), "task watcher failed: permission denied");
        assert!(err.is_recoverable());
    }
}
