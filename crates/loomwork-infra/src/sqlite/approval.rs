//! SQLite approval repository implementation.
//!
//! Backs the human-approval gate lifecycle (`pending -> approved|rejected|
//! timeout`, terminal and one-shot). `resolve` enforces that transition at
//! the SQL layer: the `UPDATE ... WHERE status = 'pending'` only touches a
//! row still awaiting a decision, so a replayed approve/reject against an
//! already-resolved request is reported as a conflict rather than silently
//! re-applied.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use loomwork_core::repository::approval::ApprovalRepository;
use loomwork_types::error::RepositoryError;
use loomwork_types::workflow::{ApprovalRequest, ApprovalStatus, NewApprovalRequest};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ApprovalRepository`.
pub struct SqliteApprovalRepository {
    pool: DatabasePool,
}

impl SqliteApprovalRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
        ApprovalStatus::Timeout => "timeout",
    }
}

fn parse_status(s: &str) -> Result<ApprovalStatus, RepositoryError> {
    match s {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        "timeout" => Ok(ApprovalStatus::Timeout),
        other => Err(RepositoryError::Query(format!("invalid approval status: {other}"))),
    }
}

fn string_list_json(values: &[String]) -> Result<String, RepositoryError> {
    serde_json::to_string(values).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn request_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let tenant_id: String = row
        .try_get("tenant_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let execution_id: String = row
        .try_get("execution_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let workflow_id: String = row
        .try_get("workflow_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let step_output_json: String = row
        .try_get("step_output_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let notify_channels_json: String = row
        .try_get("notify_channels_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let notify_targets_json: String = row
        .try_get("notify_targets_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let expires_at: String = row
        .try_get("expires_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let resolved_at: Option<String> = row
        .try_get("resolved_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(ApprovalRequest {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        execution_id: parse_uuid(&execution_id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        step_id: row.try_get("step_id").map_err(|e| RepositoryError::Query(e.to_string()))?,
        status: parse_status(&status)?,
        approval_type: row
            .try_get("approval_type")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        requester: row
            .try_get("requester")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        approver: row.try_get("approver").map_err(|e| RepositoryError::Query(e.to_string()))?,
        step_output: serde_json::from_str(&step_output_json)
            .map_err(|e| RepositoryError::Query(format!("invalid step_output JSON: {e}")))?,
        comment: row.try_get("comment").map_err(|e| RepositoryError::Query(e.to_string()))?,
        notify_channels: serde_json::from_str(&notify_channels_json)
            .map_err(|e| RepositoryError::Query(format!("invalid notify_channels JSON: {e}")))?,
        notify_targets: serde_json::from_str(&notify_targets_json)
            .map_err(|e| RepositoryError::Query(format!("invalid notify_targets JSON: {e}")))?,
        notification_attempts: row
            .try_get::<i64, _>("notification_attempts")
            .map_err(|e| RepositoryError::Query(e.to_string()))? as u32,
        last_notification_error: row
            .try_get("last_notification_error")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        timeout_secs: row
            .try_get("timeout_secs")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        expires_at: parse_datetime(&expires_at)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
        resolved_at: resolved_at.as_deref().map(parse_datetime).transpose()?,
    })
}

impl ApprovalRepository for SqliteApprovalRepository {
    async fn create(&self, req: NewApprovalRequest) -> Result<ApprovalRequest, RepositoryError> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(req.timeout_secs);

        let step_output_json = serde_json::to_string(&req.step_output)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let notify_channels_json = string_list_json(&req.notify_channels)?;
        let notify_targets_json = serde_json::to_string(&req.notify_targets)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, tenant_id, execution_id, workflow_id, step_id, status, approval_type,
                requester, approver, step_output_json, comment, notify_channels_json,
                notify_targets_json, notification_attempts, last_notification_error,
                timeout_secs, expires_at, created_at, updated_at, resolved_at)
               VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, NULL, ?, NULL, ?, ?, 0, NULL, ?, ?, ?, ?, NULL)"#,
        )
        .bind(id.to_string())
        .bind(req.tenant_id.to_string())
        .bind(req.execution_id.to_string())
        .bind(req.workflow_id.to_string())
        .bind(&req.step_id)
        .bind(&req.approval_type)
        .bind(&req.requester)
        .bind(&step_output_json)
        .bind(&notify_channels_json)
        .bind(&notify_targets_json)
        .bind(req.timeout_secs)
        .bind(format_datetime(&expires_at))
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(ApprovalRequest {
            id,
            tenant_id: req.tenant_id,
            execution_id: req.execution_id,
            workflow_id: req.workflow_id,
            step_id: req.step_id,
            status: ApprovalStatus::Pending,
            approval_type: req.approval_type,
            requester: req.requester,
            approver: None,
            step_output: req.step_output,
            comment: None,
            notify_channels: req.notify_channels,
            notify_targets: req.notify_targets,
            notification_attempts: 0,
            last_notification_error: None,
            timeout_secs: req.timeout_secs,
            expires_at,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        })
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn resolve(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: Option<&str>,
        comment: Option<&str>,
    ) -> Result<ApprovalRequest, RepositoryError> {
        let now = format_datetime(&Utc::now());

        let result = sqlx::query(
            r#"UPDATE approval_requests SET
                 status = ?, approver = ?, comment = ?, updated_at = ?, resolved_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(status_str(status))
        .bind(approver)
        .bind(comment)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(existing) => Err(RepositoryError::Conflict(format!(
                    "approval request {id} already resolved as {:?}",
                    existing.status
                ))),
                None => Err(RepositoryError::NotFound),
            };
        }

        self.get(id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn record_notification_attempt(
        &self,
        id: &Uuid,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE approval_requests SET
                 notification_attempts = notification_attempts + 1,
                 last_notification_error = ?
               WHERE id = ?"#,
        )
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_expired(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE status = 'pending' AND expires_at <= ?",
        )
        .bind(&now)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(request_from_row).collect()
    }

    async fn list_pending_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE execution_id = ? AND status = 'pending' ORDER BY created_at ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(request_from_row).collect()
    }
}
