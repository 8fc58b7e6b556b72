//! HTTP error mapping.
//!
//! Every handler returns `Result<_, ApiError>`; failures render as the
//! standard envelope with `success: false` and an error code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use task_orchestrator::OrchestratorError;
use thiserror::Error;
use tracing::{debug, error};

use crate::common::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Task not found")]
    UnknownTask,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::InvalidState { .. } | OrchestratorError::Cancelling { .. } => {
                    StatusCode::CONFLICT
                }
                OrchestratorError::ResourceExhausted { .. } | OrchestratorError::ShuttingDown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                OrchestratorError::ExecutionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownTask => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::NotFound(_) => "NOT_FOUND",
                OrchestratorError::InvalidState { .. } | OrchestratorError::Cancelling { .. } => {
                    "INVALID_STATE"
                }
                OrchestratorError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
                OrchestratorError::ShuttingDown => "SHUTTING_DOWN",
                OrchestratorError::ExecutionFailed { .. } => "EXECUTION_FAILED",
            },
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::UnknownTask => "NOT_FOUND",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        (status, ApiResponse::failure(self.code(), self.to_string())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_orchestrator::{JobId, JobStatus};

    #[test]
    fn test_status_mapping() {
        let id = JobId::new();
        assert_eq!(
            ApiError::from(OrchestratorError::NotFound(id)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(OrchestratorError::InvalidState {
                job_id: id,
                status: JobStatus::Completed,
                action: "pause",
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(OrchestratorError::ResourceExhausted { max_concurrent: 3 }).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::bad_request("nope").status(), StatusCode::BAD_REQUEST);

        let cancelling = ApiError::from(OrchestratorError::Cancelling {
            job_id: id,
            action: "pause",
        });
        assert_eq!(cancelling.status(), StatusCode::CONFLICT);
        assert_eq!(cancelling.code(), "INVALID_STATE");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::UnknownTask.code(), "NOT_FOUND");
        assert_eq!(
            ApiError::from(OrchestratorError::ShuttingDown).code(),
            "SHUTTING_DOWN"
        );
    }
}
