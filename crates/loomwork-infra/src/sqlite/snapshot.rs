//! SQLite-backed, TTL-aware `SnapshotStore`.
//!
//! Mirrors `loomwork_core::workflow::checkpoint::InMemorySnapshotStore`
//! field-for-field but persists through `DatabasePool` so a paused execution
//! survives a process restart. Rows carry their own `expires_at`
//! (`updated_at + ttl`); `reap_expired` is called periodically by the
//! hosting process to enforce the 24h default TTL.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use loomwork_core::workflow::checkpoint::{SnapshotError, SnapshotPatch, SnapshotStore};
use loomwork_types::workflow::{SnapshotStatus, WorkflowSnapshot};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SnapshotStore` with TTL-based expiry.
pub struct SqliteSnapshotStore {
    pool: DatabasePool,
    ttl_secs: i64,
}

impl SqliteSnapshotStore {
    pub fn new(pool: DatabasePool, ttl_secs: i64) -> Self {
        Self { pool, ttl_secs }
    }

    /// Delete snapshots whose `expires_at` has passed. Returns the number removed.
    pub async fn reap_expired(&self) -> Result<u64, SnapshotError> {
        let now = format_datetime(&Utc::now());
        let result = sqlx::query("DELETE FROM workflow_snapshots WHERE expires_at <= ?")
            .bind(&now)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SnapshotError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SnapshotError::Backend(format!("invalid datetime: {e}")))
}

fn status_str(status: SnapshotStatus) -> &'static str {
    match status {
        SnapshotStatus::Running => "running",
        SnapshotStatus::Paused => "paused",
        SnapshotStatus::Completed => "completed",
        SnapshotStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> Result<SnapshotStatus, SnapshotError> {
    match s {
        "running" => Ok(SnapshotStatus::Running),
        "paused" => Ok(SnapshotStatus::Paused),
        "completed" => Ok(SnapshotStatus::Completed),
        "failed" => Ok(SnapshotStatus::Failed),
        other => Err(SnapshotError::Backend(format!("invalid snapshot status: {other}"))),
    }
}

fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowSnapshot, SnapshotError> {
    let execution_id: String = row
        .try_get("execution_id")
        .map_err(|e| SnapshotError::Backend(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| SnapshotError::Backend(e.to_string()))?;
    let steps_json: String = row
        .try_get("steps_json")
        .map_err(|e| SnapshotError::Backend(e.to_string()))?;
    let pending_approvals_json: String = row
        .try_get("pending_approvals_json")
        .map_err(|e| SnapshotError::Backend(e.to_string()))?;
    let metadata_json: String = row
        .try_get("metadata_json")
        .map_err(|e| SnapshotError::Backend(e.to_string()))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| SnapshotError::Backend(e.to_string()))?;

    Ok(WorkflowSnapshot {
        execution_id: execution_id
            .parse()
            .map_err(|e| SnapshotError::Backend(format!("invalid UUID: {e}")))?,
        mode: row.try_get("mode").map_err(|e| SnapshotError::Backend(e.to_string()))?,
        current_step: row
            .try_get("current_step")
            .map_err(|e| SnapshotError::Backend(e.to_string()))?,
        paused_step_id: row
            .try_get("paused_step_id")
            .map_err(|e| SnapshotError::Backend(e.to_string()))?,
        current_round: row
            .try_get::<i64, _>("current_round")
            .map_err(|e| SnapshotError::Backend(e.to_string()))? as u32,
        max_rounds: row
            .try_get::<i64, _>("max_rounds")
            .map_err(|e| SnapshotError::Backend(e.to_string()))? as u32,
        steps: serde_json::from_str(&steps_json)
            .map_err(|e| SnapshotError::Backend(format!("invalid steps JSON: {e}")))?,
        pending_approvals: serde_json::from_str(&pending_approvals_json)
            .map_err(|e| SnapshotError::Backend(format!("invalid pending_approvals JSON: {e}")))?,
        status: parse_status(&status)?,
        metadata: serde_json::from_str(&metadata_json)
            .map_err(|e| SnapshotError::Backend(format!("invalid metadata JSON: {e}")))?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &WorkflowSnapshot) -> Result<(), SnapshotError> {
        let mut snapshot = snapshot.clone();
        snapshot.updated_at = Utc::now();
        let expires_at = snapshot.updated_at + chrono::Duration::seconds(self.ttl_secs);

        let steps_json = serde_json::to_string(&snapshot.steps)
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;
        let pending_approvals_json = serde_json::to_string(&snapshot.pending_approvals)
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;
        let metadata_json = serde_json::to_string(&snapshot.metadata)
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_snapshots
               (execution_id, mode, current_step, paused_step_id, current_round, max_rounds,
                steps_json, pending_approvals_json, status, metadata_json, updated_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                 mode = excluded.mode,
                 current_step = excluded.current_step,
                 paused_step_id = excluded.paused_step_id,
                 current_round = excluded.current_round,
                 max_rounds = excluded.max_rounds,
                 steps_json = excluded.steps_json,
                 pending_approvals_json = excluded.pending_approvals_json,
                 status = excluded.status,
                 metadata_json = excluded.metadata_json,
                 updated_at = excluded.updated_at,
                 expires_at = excluded.expires_at"#,
        )
        .bind(snapshot.execution_id.to_string())
        .bind(&snapshot.mode)
        .bind(&snapshot.current_step)
        .bind(&snapshot.paused_step_id)
        .bind(snapshot.current_round as i64)
        .bind(snapshot.max_rounds as i64)
        .bind(&steps_json)
        .bind(&pending_approvals_json)
        .bind(status_str(snapshot.status))
        .bind(&metadata_json)
        .bind(format_datetime(&snapshot.updated_at))
        .bind(format_datetime(&expires_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, execution_id: &Uuid) -> Result<WorkflowSnapshot, SnapshotError> {
        let row = sqlx::query("SELECT * FROM workflow_snapshots WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        match row {
            Some(row) => snapshot_from_row(&row),
            None => Ok(WorkflowSnapshot::new_running(*execution_id, "automated")),
        }
    }

    async fn must_get(&self, execution_id: &Uuid) -> Result<WorkflowSnapshot, SnapshotError> {
        let row = sqlx::query("SELECT * FROM workflow_snapshots WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        match row {
            Some(row) => snapshot_from_row(&row),
            None => Err(SnapshotError::NotFound(*execution_id)),
        }
    }

    async fn update(
        &self,
        execution_id: &Uuid,
        mode: &str,
        patch: SnapshotPatch,
    ) -> Result<WorkflowSnapshot, SnapshotError> {
        let row = sqlx::query("SELECT * FROM workflow_snapshots WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        let mut snapshot = match row {
            Some(row) => snapshot_from_row(&row)?,
            None => WorkflowSnapshot::new_running(*execution_id, mode),
        };
        patch.apply(&mut snapshot);
        self.save(&snapshot).await?;
        Ok(snapshot)
    }

    async fn delete(&self, execution_id: &Uuid) -> Result<(), SnapshotError> {
        sqlx::query("DELETE FROM workflow_snapshots WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| SnapshotError::Backend(e.to_string()))?;

        Ok(())
    }
}
