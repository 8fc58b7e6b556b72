//! Structured errors for the orchestration core.
//!
//! `OrchestratorError` provides pattern-matchable errors for callers of the
//! [`Orchestrator`](crate::Orchestrator) instead of a generic `anyhow::Error`.
//!
//! # Propagation
//!
//! - `ResourceExhausted`, `InvalidState`, `Cancelling`, `NotFound` and
//!   `ShuttingDown` are returned synchronously to whoever called the facade.
//! - `ExecutionFailed` is never returned to a caller. The runner records it on
//!   the task's error trail and broadcasts it as an `error` event.
//!
//! `anyhow` stays internal transport for units of work; it never crosses the
//! facade boundary.

use thiserror::Error;

use crate::record::{JobId, JobStatus};

/// Errors produced by the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// The concurrency bound was reached at submission time. Callers may retry later.
    #[error("maximum concurrent tasks ({max_concurrent}) reached")]
    ResourceExhausted { max_concurrent: usize },

    /// The requested transition is not legal from the task's current status.
    #[error("cannot {action} task {job_id} while it is {status}")]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    /// The task was asked to cancel and is unwinding, so only a repeated
    /// cancel is accepted.
    #[error("cannot {action} task {job_id} while it is being cancelled")]
    Cancelling {
        job_id: JobId,
        action: &'static str,
    },

    /// No task exists with this id.
    #[error("task {0} not found")]
    NotFound(JobId),

    /// The unit of work for a task failed. Terminal, never retried by the core.
    #[error("task {job_id} failed: {message}")]
    ExecutionFailed { job_id: JobId, message: String },

    /// The orchestrator is draining and no longer admits tasks.
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    /// Whether the caller can reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::ResourceExhausted { .. })
    }

    pub(crate) fn invalid_state(job_id: JobId, status: JobStatus, action: &'static str) -> Self {
        OrchestratorError::InvalidState {
            job_id,
            status,
            action,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_resource_exhausted_is_retryable() {
        let id = JobId::new();
        assert!(OrchestratorError::ResourceExhausted { max_concurrent: 3 }.is_retryable());
        assert!(!OrchestratorError::NotFound(id).is_retryable());
        assert!(!OrchestratorError::invalid_state(id, JobStatus::Completed, "pause").is_retryable());
        assert!(!OrchestratorError::ShuttingDown.is_retryable());
    }

    #[test]
    fn test_cancelling_message_names_action() {
        let id = JobId::new();
        let msg = OrchestratorError::Cancelling {
            job_id: id,
            action: "pause",
        }
        .to_string();
        assert_eq!(msg, format!("cannot pause task {id} while it is being cancelled"));
    }

    #[test]
    fn test_invalid_state_message_names_action_and_status() {
        let id = JobId::new();
        let err = OrchestratorError::invalid_state(id, JobStatus::Paused, "pause");
        let msg = err.to_string();
        assert!(msg.contains("cannot pause"));
        assert!(msg.contains("paused"));
        assert!(msg.contains(&id.to_string()));
    }
}
