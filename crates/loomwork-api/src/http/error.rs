//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use loomwork_core::workflow::approval::ApprovalError;
use loomwork_core::workflow::checkpoint::SnapshotError;
use loomwork_core::workflow::definition::WorkflowError;
use loomwork_core::workflow::engine::EngineError;
use loomwork_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    Workflow(WorkflowError),
    Approval(ApprovalError),
    Repository(RepositoryError),
    Snapshot(SnapshotError),
    /// Authentication failure.
    Unauthorized(String),
    /// Validation error (malformed request body, bad query params).
    Validation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Generic internal error.
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Workflow(e)
    }
}

impl From<ApprovalError> for AppError {
    fn from(e: ApprovalError) -> Self {
        AppError::Approval(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl From<SnapshotError> for AppError {
    fn from(e: SnapshotError) -> Self {
        AppError::Snapshot(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Engine(EngineError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", what.clone())
            }
            AppError::Engine(EngineError::ApprovalRejected(step)) => (
                StatusCode::CONFLICT,
                "APPROVAL_REJECTED",
                format!("approval for step {step} was rejected"),
            ),
            AppError::Engine(EngineError::ApprovalPending) => (
                StatusCode::CONFLICT,
                "APPROVAL_PENDING",
                "approval is still pending".to_string(),
            ),
            AppError::Engine(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", e.to_string())
            }

            AppError::Workflow(WorkflowError::CycleDetected(msg)) => {
                (StatusCode::BAD_REQUEST, "CYCLE_DETECTED", msg.clone())
            }
            AppError::Workflow(WorkflowError::ValidationError(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Workflow(WorkflowError::ParseError(msg)) => {
                (StatusCode::BAD_REQUEST, "PARSE_ERROR", msg.clone())
            }
            AppError::Workflow(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "WORKFLOW_ERROR", e.to_string())
            }

            AppError::Approval(ApprovalError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, "APPROVAL_NOT_FOUND", format!("approval {id} not found"))
            }
            AppError::Approval(ApprovalError::NotPending(id)) => (
                StatusCode::CONFLICT,
                "APPROVAL_NOT_PENDING",
                format!("approval {id} is not pending"),
            ),
            AppError::Approval(ApprovalError::ResendLimitExceeded) => (
                StatusCode::TOO_MANY_REQUESTS,
                "RESEND_LIMIT_EXCEEDED",
                "resend limit exceeded for tenant".to_string(),
            ),
            AppError::Approval(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "APPROVAL_ERROR", e.to_string())
            }

            AppError::Repository(RepositoryError::NotFound) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "entity not found".to_string())
            }
            AppError::Repository(RepositoryError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone())
            }
            AppError::Repository(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "REPOSITORY_ERROR", e.to_string())
            }

            AppError::Snapshot(SnapshotError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "SNAPSHOT_NOT_FOUND",
                format!("no snapshot for execution {id}"),
            ),
            AppError::Snapshot(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SNAPSHOT_ERROR", e.to_string())
            }

            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
