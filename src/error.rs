//! Error taxonomy shared by every orchestrator component.
//!
//! Each variant maps to a stable `kind` string that is persisted into the
//! task record and surfaced over HTTP, so renaming a variant is a wire
//! format change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while driving a task through the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("task '{0}' already exists")]
    AlreadyExists(String),

    #[error("{message}")]
    Unavailable { message: String, transient: bool },

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("recursion limit exceeded: {0}")]
    RecursionExceeded(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Non-retriable provider or store failure.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            transient: false,
        }
    }

    /// Transient provider failure, eligible for retry.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            transient: true,
        }
    }

    /// Stable identifier for this error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::RecursionExceeded(_) => "recursion_exceeded",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether an LLM call hitting this error should be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unavailable { transient: true, .. }
        )
    }
}

/// The error shape persisted into a FAILED task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
}

impl From<&OrchestratorError> for TaskError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(OrchestratorError::Cancelled.kind(), "cancelled");
        assert_eq!(
            OrchestratorError::Timeout("llm call".into()).kind(),
            "timeout"
        );
        assert_eq!(
            OrchestratorError::unavailable("redis down").kind(),
            "unavailable"
        );
    }

    #[test]
    fn retriability() {
        assert!(OrchestratorError::Timeout("x".into()).is_retriable());
        assert!(OrchestratorError::transient("x").is_retriable());
        assert!(!OrchestratorError::unavailable("x").is_retriable());
        assert!(!OrchestratorError::Cancelled.is_retriable());
    }

    #[test]
    fn task_error_conversion() {
        let err = OrchestratorError::RecursionExceeded("Content team".into());
        let task_err = TaskError::from(&err);
        assert_eq!(task_err.kind, "recursion_exceeded");
        assert!(task_err.message.contains("Content team"));
    }
}
