//! Workflow CRUD and execution handlers for the REST API.
//!
//! Illustrative surface over the execution core: workflow definition CRUD,
//! submitting an execution, and inspecting execution/task state. Not
//! bit-exact with any particular existing product API.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use loomwork_core::repository::approval::ApprovalRepository;
use loomwork_core::repository::workflow::WorkflowRepository;
use loomwork_types::workflow::WorkflowDefinition;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::{ListExecutionsQuery, ListWorkflowsQuery};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Build the workflow/execution sub-router, mounted at `/api/v1` by the
/// main router.
pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create_workflow))
        .route("/workflows", get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}", delete(delete_workflow))
        .route("/executions", post(submit_execution))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
}

#[derive(Debug, Deserialize)]
pub struct SubmitExecutionBody {
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// POST /api/v1/workflows - Register a new workflow definition.
///
/// The caller supplies a fully-formed `WorkflowDefinition` (typically
/// produced by parsing a YAML manifest client-side); the server persists
/// it verbatim.
pub async fn create_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<WorkflowDefinition>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.workflow_repo.create_definition(&body).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(body.clone(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{}", body.id));
    Ok(Json(resp))
}

/// GET /api/v1/workflows?tenant_id=... - List workflow definitions for a tenant.
pub async fn list_workflows(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowDefinition>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let defs = state.workflow_repo.list_definitions(&query.tenant_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(defs, request_id, elapsed).with_link("self", "/api/v1/workflows");
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

/// GET /api/v1/workflows/:id?tenant_id=... - Fetch one workflow definition.
pub async fn get_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let def = state
        .workflow_repo
        .get_definition(&query.tenant_id, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow {id} not found")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(def, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}"));
    Ok(Json(resp))
}

/// DELETE /api/v1/workflows/:id?tenant_id=... - Soft-delete a workflow definition.
pub async fn delete_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let deleted = state
        .workflow_repo
        .soft_delete_definition(&query.tenant_id, &id)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::json!({"deleted": deleted}), request_id, elapsed);
    Ok(Json(resp))
}

/// POST /api/v1/executions - Submit a workflow for execution.
///
/// Queues the execution and drives it until it completes, fails, or pauses
/// on an approval gate, then returns the resulting execution record.
pub async fn submit_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<SubmitExecutionBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let record = state
        .engine
        .execute(body.workflow_id, body.tenant_id, body.user_id, body.input)
        .await?;
    state
        .drive_execution(record.id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let record = state
        .workflow_repo
        .get_execution(&record.id)
        .await?
        .ok_or_else(|| AppError::Internal("execution vanished after submit".to_string()))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&record).unwrap(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/executions/{}", record.id));
    Ok(Json(resp))
}

/// GET /api/v1/executions?tenant_id=...&workflow_id=...&limit=... - List executions.
pub async fn list_executions(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let records = state
        .workflow_repo
        .list_executions(&query.tenant_id, &query.workflow_id, query.limit)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&records).unwrap(), request_id, elapsed)
        .with_link("self", "/api/v1/executions");
    Ok(Json(resp))
}

/// GET /api/v1/executions/:id - Execution detail: record, task rows,
/// automation log, and any pending approvals.
pub async fn get_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let record = state
        .workflow_repo
        .get_execution(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("execution {id} not found")))?;
    let tasks = state.workflow_repo.list_tasks(&id).await?;
    let automation_log = state.workflow_repo.list_automation_log(&id).await?;
    let pending_approvals = state.approval_repo.list_pending_for_execution(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let body = serde_json::json!({
        "execution": record,
        "tasks": tasks,
        "automation_log": automation_log,
        "pending_approvals": pending_approvals,
    });
    let resp = ApiResponse::success(body, request_id, elapsed)
        .with_link("self", &format!("/api/v1/executions/{id}"));
    Ok(Json(resp))
}
