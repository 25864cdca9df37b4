use std::fmt;
use thiserror::Error;

use crate::task::{GroupId, TaskId};

/// Boxed error source carried by executor and task errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the executor itself: building tasks, loading
/// configuration and submitting work.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Work offered after shutdown has begun
    #[error("Executor is shut down: {operation} rejected")]
    Shutdown { operation: String },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: BoxError,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ExecutorError {
    /// Create a validation error with field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error naming the offending field and values
    pub fn configuration_field<S, F, E, A>(message: S, field: F, expected: E, actual: A) -> Self
    where
        S: Into<String>,
        F: Into<String>,
        E: Into<String>,
        A: Into<String>,
    {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
            expected: Some(expected.into()),
            actual: Some(actual.into()),
        }
    }

    /// Create a shutdown rejection
    pub fn shutdown<S: Into<String>>(operation: S) -> Self {
        Self::Shutdown {
            operation: operation.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error wrapping its cause
    pub fn internal_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The field a validation or configuration error points at, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } | Self::Configuration { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::Shutdown { .. } => "shutdown",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ExecutorError>;

impl From<serde_yaml::Error> for ExecutorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

/// Failure delivered through a task handle.
///
/// Only the task that produced it observes it; the group lock has already
/// been released by the time the handle resolves.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The action returned an error
    #[error("Task {task_id} failed: {source}")]
    Failed {
        task_id: TaskId,
        group_id: GroupId,
        #[source]
        source: BoxError,
    },

    /// The action panicked
    #[error("Task {task_id} panicked: {message}")]
    Panicked {
        task_id: TaskId,
        group_id: GroupId,
        message: String,
    },

    /// Shutdown dropped the task while it was queued or running
    #[error("Task {task_id} was cancelled")]
    Cancelled { task_id: TaskId, group_id: GroupId },
}

impl TaskError {
    pub fn failed(task_id: TaskId, group_id: GroupId, source: anyhow::Error) -> Self {
        Self::Failed {
            task_id,
            group_id,
            source: source.into(),
        }
    }

    pub fn panicked<S: Into<String>>(task_id: TaskId, group_id: GroupId, message: S) -> Self {
        Self::Panicked {
            task_id,
            group_id,
            message: message.into(),
        }
    }

    pub fn cancelled(task_id: TaskId, group_id: GroupId) -> Self {
        Self::Cancelled { task_id, group_id }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Failed { task_id, .. }
            | Self::Panicked { task_id, .. }
            | Self::Cancelled { task_id, .. } => *task_id,
        }
    }

    pub fn group_id(&self) -> GroupId {
        match self {
            Self::Failed { group_id, .. }
            | Self::Panicked { group_id, .. }
            | Self::Cancelled { group_id, .. } => *group_id,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Panicked { .. } => "panicked",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Outcome of a pool or executor shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownStatus {
    /// All queued and in-flight work finished within the grace period
    Drained,
    /// The grace period elapsed and outstanding work was cancelled
    Forced,
}

impl ShutdownStatus {
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Forced)
    }
}

impl fmt::Display for ShutdownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drained => write!(f, "drained"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Render a caught panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_creation() {
        let err = ExecutorError::validation_field("group id must not be nil", "group");
        assert!(matches!(err, ExecutorError::Validation { .. }));
        assert_eq!(err.category(), "validation");
        assert_eq!(err.field(), Some("group"));

        let err = ExecutorError::shutdown("submit_task");
        assert_eq!(err.category(), "shutdown");
        assert_eq!(err.to_string(), "Executor is shut down: submit_task rejected");
    }

    #[test]
    fn test_internal_error_keeps_source() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "no reactor");
        let err = ExecutorError::internal_with_source("worker pool needs a runtime", cause);
        assert_eq!(err.category(), "internal");
        assert_eq!(err.to_string(), "Internal error: worker pool needs a runtime");
        assert_eq!(err.source().map(|s| s.to_string()), Some("no reactor".to_string()));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<u32>("not: [a number").unwrap_err();
        let err: ExecutorError = yaml_err.into();
        assert_eq!(err.category(), "serialization");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_task_error_keeps_source() {
        let task_id = TaskId::random();
        let group_id = GroupId::random();
        let err = TaskError::failed(task_id, group_id, anyhow::anyhow!("disk full"));

        assert_eq!(err.task_id(), task_id);
        assert_eq!(err.group_id(), group_id);
        assert_eq!(err.category(), "failed");
        assert!(err.to_string().contains("disk full"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk full".to_string()));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_shutdown_status_display() {
        assert_eq!(ShutdownStatus::Drained.to_string(), "drained");
        assert!(ShutdownStatus::Forced.is_forced());
    }
}
