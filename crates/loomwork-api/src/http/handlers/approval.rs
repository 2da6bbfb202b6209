//! Approval gate handlers: approve, reject, resend notification.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn approval_routes() -> Router<AppState> {
    Router::new()
        .route("/approvals/{id}/approve", post(approve))
        .route("/approvals/{id}/reject", post(reject))
        .route("/approvals/{id}/resend", post(resend))
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub approver: String,
    pub comment: Option<String>,
}

/// POST /api/v1/approvals/:id/approve - Approve a pending gate and resume
/// the paused execution.
///
/// Idempotency: approving a non-pending request returns a 409 conflict
/// (`ApprovalError::NotPending`).
pub async fn approve(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let resolved = state
        .approvals
        .approve(&id, &body.approver, body.comment.as_deref())
        .await?;
    state
        .resume_execution(resolved.execution_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&resolved).unwrap(), request_id, elapsed);
    Ok(Json(resp))
}

/// POST /api/v1/approvals/:id/reject - Reject a pending gate.
///
/// The backing execution is left `paused`; rejection never resumes it.
pub async fn reject(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let resolved = state
        .approvals
        .reject(&id, &body.approver, body.comment.as_deref())
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&resolved).unwrap(), request_id, elapsed);
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
pub struct ResendQuery {
    pub tenant_id: Uuid,
}

/// POST /api/v1/approvals/:id/resend?tenant_id=... - Re-dispatch the
/// notification for a still-pending gate.
pub async fn resend(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Query(query): Query<ResendQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.approvals.resend_notification(query.tenant_id, &id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::json!({"resent": true}), request_id, elapsed);
    Ok(Json(resp))
}
