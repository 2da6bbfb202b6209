//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `loomwork-core` using sqlx with split
//! read/write pools. Definitions store their node/edge graph as JSON blobs;
//! executions, tasks, and the automation log track per-run state for crash
//! recovery and operational audit.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use loomwork_core::repository::workflow::WorkflowRepository;
use loomwork_types::error::RepositoryError;
use loomwork_types::workflow::{
    AutomationLog, ExecutionRecord, ExecutionStatus, TaskRecord, TaskStatus, WorkflowDefinition,
    WorkflowVisibility,
};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

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

fn visibility_str(v: WorkflowVisibility) -> &'static str {
    match v {
        WorkflowVisibility::Private => "private",
        WorkflowVisibility::Tenant => "tenant",
        WorkflowVisibility::Public => "public",
    }
}

fn parse_visibility(s: &str) -> Result<WorkflowVisibility, RepositoryError> {
    match s {
        "private" => Ok(WorkflowVisibility::Private),
        "tenant" => Ok(WorkflowVisibility::Tenant),
        "public" => Ok(WorkflowVisibility::Public),
        other => Err(RepositoryError::Query(format!("invalid visibility: {other}"))),
    }
}

fn execution_status_str(s: ExecutionStatus) -> &'static str {
    match s {
        ExecutionStatus::Queued => "queued",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Paused => "paused",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
    }
}

fn parse_execution_status(s: &str) -> Result<ExecutionStatus, RepositoryError> {
    match s {
        "queued" => Ok(ExecutionStatus::Queued),
        "running" => Ok(ExecutionStatus::Running),
        "paused" => Ok(ExecutionStatus::Paused),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        other => Err(RepositoryError::Query(format!("invalid execution status: {other}"))),
    }
}

fn task_status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Success => "success",
        TaskStatus::Failed => "failed",
        TaskStatus::Paused => "paused",
        TaskStatus::Skipped => "skipped",
        TaskStatus::Rejected => "rejected",
    }
}

fn parse_task_status(s: &str) -> Result<TaskStatus, RepositoryError> {
    match s {
        "success" => Ok(TaskStatus::Success),
        "failed" => Ok(TaskStatus::Failed),
        "paused" => Ok(TaskStatus::Paused),
        "skipped" => Ok(TaskStatus::Skipped),
        "rejected" => Ok(TaskStatus::Rejected),
        other => Err(RepositoryError::Query(format!("invalid task status: {other}"))),
    }
}

fn definition_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition, RepositoryError> {
    let nodes_json: String = row
        .try_get("nodes_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let edges_json: String = row
        .try_get("edges_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let automation_json: Option<String> = row
        .try_get("automation_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let visibility: String = row
        .try_get("visibility")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let tenant_id: String = row
        .try_get("tenant_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let owner_id: String = row
        .try_get("owner_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(WorkflowDefinition {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        owner_id: parse_uuid(&owner_id)?,
        name: row.try_get("name").map_err(|e| RepositoryError::Query(e.to_string()))?,
        description: row
            .try_get("description")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        version: row.try_get("version").map_err(|e| RepositoryError::Query(e.to_string()))?,
        visibility: parse_visibility(&visibility)?,
        nodes: serde_json::from_str(&nodes_json)
            .map_err(|e| RepositoryError::Query(format!("invalid nodes JSON: {e}")))?,
        edges: serde_json::from_str(&edges_json)
            .map_err(|e| RepositoryError::Query(format!("invalid edges JSON: {e}")))?,
        max_concurrency: row
            .try_get::<Option<i64>, _>("max_concurrency")
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .map(|v| v as usize),
        automation: automation_json
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid automation JSON: {e}")))
            })
            .transpose()?,
        soft_deleted: row
            .try_get::<i64, _>("soft_deleted")
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            != 0,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn execution_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let tenant_id: String = row
        .try_get("tenant_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let workflow_id: String = row
        .try_get("workflow_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let user_id: String = row
        .try_get("user_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let input_json: String = row
        .try_get("input_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let output_json: Option<String> = row
        .try_get("output_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let started_at: Option<String> = row
        .try_get("started_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let completed_at: Option<String> = row
        .try_get("completed_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(ExecutionRecord {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        user_id: parse_uuid(&user_id)?,
        status: parse_execution_status(&status)?,
        input: serde_json::from_str(&input_json)
            .map_err(|e| RepositoryError::Query(format!("invalid input JSON: {e}")))?,
        output: output_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid output JSON: {e}")))?,
        error: row.try_get("error").map_err(|e| RepositoryError::Query(e.to_string()))?,
        started_at: started_at.as_deref().map(parse_datetime).transpose()?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
        trace_id: row
            .try_get("trace_id")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let execution_id: String = row
        .try_get("execution_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let input_json: String = row
        .try_get("input_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let output_json: Option<String> = row
        .try_get("output_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let started_at: Option<String> = row
        .try_get("started_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let completed_at: Option<String> = row
        .try_get("completed_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(TaskRecord {
        id: parse_uuid(&id)?,
        execution_id: parse_uuid(&execution_id)?,
        step_id: row.try_get("step_id").map_err(|e| RepositoryError::Query(e.to_string()))?,
        agent_type: row
            .try_get("agent_type")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        status: parse_task_status(&status)?,
        input: serde_json::from_str(&input_json)
            .map_err(|e| RepositoryError::Query(format!("invalid input JSON: {e}")))?,
        output: output_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid output JSON: {e}")))?,
        error: row.try_get("error").map_err(|e| RepositoryError::Query(e.to_string()))?,
        started_at: started_at.as_deref().map(parse_datetime).transpose()?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
        retry_count: row
            .try_get::<i64, _>("retry_count")
            .map_err(|e| RepositoryError::Query(e.to_string()))? as u32,
        created_at: parse_datetime(&created_at)?,
    })
}

fn automation_log_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AutomationLog, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Query(e.to_string()))?;
    let tenant_id: String = row
        .try_get("tenant_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let execution_id: String = row
        .try_get("execution_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let details_json: String = row
        .try_get("details_json")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(AutomationLog {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        execution_id: parse_uuid(&execution_id)?,
        step_id: row.try_get("step_id").map_err(|e| RepositoryError::Query(e.to_string()))?,
        action: row.try_get("action").map_err(|e| RepositoryError::Query(e.to_string()))?,
        details: serde_json::from_str(&details_json)
            .map_err(|e| RepositoryError::Query(format!("invalid details JSON: {e}")))?,
        result: row.try_get("result").map_err(|e| RepositoryError::Query(e.to_string()))?,
        created_at: parse_datetime(&created_at)?,
    })
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let nodes_json = serde_json::to_string(&def.nodes)
            .map_err(|e| RepositoryError::Query(format!("serialize nodes: {e}")))?;
        let edges_json = serde_json::to_string(&def.edges)
            .map_err(|e| RepositoryError::Query(format!("serialize edges: {e}")))?;
        let automation_json = def
            .automation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize automation: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflows
               (id, tenant_id, owner_id, name, description, version, visibility,
                nodes_json, edges_json, max_concurrency, automation_json, soft_deleted,
                created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(def.tenant_id.to_string())
        .bind(def.owner_id.to_string())
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.version)
        .bind(visibility_str(def.visibility))
        .bind(&nodes_json)
        .bind(&edges_json)
        .bind(def.max_concurrency.map(|v| v as i64))
        .bind(&automation_json)
        .bind(def.soft_deleted as i64)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_definition(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflows WHERE id = ? AND tenant_id = ? AND soft_deleted = 0",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(definition_from_row).transpose()
    }

    async fn list_definitions(
        &self,
        tenant_id: &Uuid,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE tenant_id = ? AND soft_deleted = 0 ORDER BY name ASC",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(definition_from_row).collect()
    }

    async fn save_new_version(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let nodes_json = serde_json::to_string(&def.nodes)
            .map_err(|e| RepositoryError::Query(format!("serialize nodes: {e}")))?;
        let edges_json = serde_json::to_string(&def.edges)
            .map_err(|e| RepositoryError::Query(format!("serialize edges: {e}")))?;
        let automation_json = def
            .automation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize automation: {e}")))?;

        let result = sqlx::query(
            r#"UPDATE workflows SET
                 name = ?, description = ?, version = ?, visibility = ?,
                 nodes_json = ?, edges_json = ?, max_concurrency = ?,
                 automation_json = ?, updated_at = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.version)
        .bind(visibility_str(def.visibility))
        .bind(&nodes_json)
        .bind(&edges_json)
        .bind(def.max_concurrency.map(|v| v as i64))
        .bind(&automation_json)
        .bind(format_datetime(&def.updated_at))
        .bind(def.id.to_string())
        .bind(def.tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn soft_delete_definition(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflows SET soft_deleted = 1 WHERE id = ? AND tenant_id = ? AND soft_deleted = 0",
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), RepositoryError> {
        let input_json = serde_json::to_string(&execution.input)
            .map_err(|e| RepositoryError::Query(format!("serialize input: {e}")))?;
        let output_json = execution
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize output: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, tenant_id, workflow_id, user_id, status, input_json, output_json, error,
                started_at, completed_at, trace_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.tenant_id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.user_id.to_string())
        .bind(execution_status_str(execution.status))
        .bind(&input_json)
        .bind(&output_json)
        .bind(&execution.error)
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.trace_id)
        .bind(format_datetime(&execution.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let is_terminal = matches!(status, ExecutionStatus::Completed | ExecutionStatus::Failed);
        let now = format_datetime(&Utc::now());
        let started = matches!(status, ExecutionStatus::Running);

        let output_json = output
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            r#"UPDATE workflow_executions SET
                 status = ?,
                 output_json = COALESCE(?, output_json),
                 error = COALESCE(?, error),
                 started_at = CASE WHEN ? = 1 AND started_at IS NULL THEN ? ELSE started_at END,
                 completed_at = CASE WHEN ? = 1 THEN ? ELSE completed_at END
               WHERE id = ?"#,
        )
        .bind(execution_status_str(status))
        .bind(&output_json)
        .bind(error)
        .bind(started as i64)
        .bind(&now)
        .bind(is_terminal as i64)
        .bind(&now)
        .bind(execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions
               WHERE tenant_id = ? AND workflow_id = ?
               ORDER BY created_at DESC LIMIT ?"#,
        )
        .bind(tenant_id.to_string())
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn list_running_executions(&self) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE status IN ('queued', 'running') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn create_task(&self, task: &TaskRecord) -> Result<(), RepositoryError> {
        let input_json = serde_json::to_string(&task.input)
            .map_err(|e| RepositoryError::Query(format!("serialize input: {e}")))?;
        let output_json = task
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize output: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_tasks
               (id, execution_id, step_id, agent_type, status, input_json, output_json, error,
                started_at, completed_at, retry_count, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.execution_id.to_string())
        .bind(&task.step_id)
        .bind(&task.agent_type)
        .bind(task_status_str(task.status))
        .bind(&input_json)
        .bind(&output_json)
        .bind(&task.error)
        .bind(task.started_at.as_ref().map(format_datetime))
        .bind(task.completed_at.as_ref().map(format_datetime))
        .bind(task.retry_count as i64)
        .bind(format_datetime(&task.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_task_status(
        &self,
        task_id: &Uuid,
        status: TaskStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let is_terminal = status.resolves_dependency() || status.is_terminal_failure();
        let now = format_datetime(&Utc::now());

        let output_json = output
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            r#"UPDATE workflow_tasks SET
                 status = ?,
                 output_json = COALESCE(?, output_json),
                 error = COALESCE(?, error),
                 completed_at = CASE WHEN ? = 1 THEN ? ELSE completed_at END
               WHERE id = ?"#,
        )
        .bind(task_status_str(status))
        .bind(&output_json)
        .bind(error)
        .bind(is_terminal as i64)
        .bind(&now)
        .bind(task_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_tasks(&self, execution_id: &Uuid) -> Result<Vec<TaskRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_tasks WHERE execution_id = ? ORDER BY started_at ASC, created_at ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(task_from_row).collect()
    }

    async fn log_automation_action(&self, entry: &AutomationLog) -> Result<(), RepositoryError> {
        let details_json = serde_json::to_string(&entry.details)
            .map_err(|e| RepositoryError::Query(format!("serialize details: {e}")))?;

        sqlx::query(
            r#"INSERT INTO automation_logs
               (id, tenant_id, execution_id, step_id, action, details_json, result, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.tenant_id.to_string())
        .bind(entry.execution_id.to_string())
        .bind(&entry.step_id)
        .bind(&entry.action)
        .bind(&details_json)
        .bind(&entry.result)
        .bind(format_datetime(&entry.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_automation_log(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<AutomationLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM automation_logs WHERE execution_id = ? ORDER BY created_at ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(automation_log_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loomwork_types::workflow::{Node, NodeKind};
    use serde_json::json;
    use std::collections::HashMap;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_definition(tenant_id: Uuid) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            tenant_id,
            owner_id: Uuid::now_v7(),
            name: "daily-digest".to_string(),
            description: Some("Gather and summarize news".to_string()),
            version: "1.0.0".to_string(),
            visibility: WorkflowVisibility::Tenant,
            nodes: vec![Node {
                id: "start".to_string(),
                kind: NodeKind::Start,
                name: None,
                ui: None,
                config: serde_json::Map::new(),
                inputs: HashMap::new(),
            }],
            edges: vec![],
            max_concurrency: Some(4),
            automation: None,
            soft_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_execution(tenant_id: Uuid, workflow_id: Uuid) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::now_v7(),
            tenant_id,
            workflow_id,
            user_id: Uuid::now_v7(),
            status: ExecutionStatus::Queued,
            input: json!({"topic": "AI"}),
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            trace_id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_get_definition_roundtrips() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let def = sample_definition(Uuid::now_v7());

        repo.create_definition(&def).await.unwrap();
        let loaded = repo.get_definition(&def.tenant_id, &def.id).await.unwrap().unwrap();

        assert_eq!(loaded.name, "daily-digest");
        assert_eq!(loaded.version, "1.0.0");
        assert_eq!(loaded.nodes.len(), 1);
    }

    #[tokio::test]
    async fn get_definition_wrong_tenant_returns_none() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let def = sample_definition(Uuid::now_v7());
        repo.create_definition(&def).await.unwrap();

        let other_tenant = Uuid::now_v7();
        let loaded = repo.get_definition(&other_tenant, &def.id).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_new_version_overwrites_existing_row() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let mut def = sample_definition(Uuid::now_v7());
        repo.create_definition(&def).await.unwrap();

        def.version = "2.0.0".to_string();
        repo.save_new_version(&def).await.unwrap();

        let loaded = repo.get_definition(&def.tenant_id, &def.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, "2.0.0");
    }

    #[tokio::test]
    async fn soft_delete_excludes_from_list_and_get() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let def = sample_definition(Uuid::now_v7());
        repo.create_definition(&def).await.unwrap();

        let deleted = repo.soft_delete_definition(&def.tenant_id, &def.id).await.unwrap();
        assert!(deleted);

        let again = repo.soft_delete_definition(&def.tenant_id, &def.id).await.unwrap();
        assert!(!again);

        assert!(repo.get_definition(&def.tenant_id, &def.id).await.unwrap().is_none());
        assert!(repo.list_definitions(&def.tenant_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_definitions_scoped_to_tenant() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant_a = Uuid::now_v7();
        let tenant_b = Uuid::now_v7();

        repo.create_definition(&sample_definition(tenant_a)).await.unwrap();
        repo.create_definition(&sample_definition(tenant_b)).await.unwrap();

        let a_defs = repo.list_definitions(&tenant_a).await.unwrap();
        assert_eq!(a_defs.len(), 1);
    }

    #[tokio::test]
    async fn execution_lifecycle() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let def = sample_definition(Uuid::now_v7());
        repo.create_definition(&def).await.unwrap();

        let execution = sample_execution(def.tenant_id, def.id);
        repo.create_execution(&execution).await.unwrap();

        repo.update_execution_status(&execution.id, ExecutionStatus::Running, None, None)
            .await
            .unwrap();
        let running = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);
        assert!(running.started_at.is_some());

        let output = json!({"summary": "done"});
        repo.update_execution_status(&execution.id, ExecutionStatus::Completed, Some(&output), None)
            .await
            .unwrap();
        let completed = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(completed.status, ExecutionStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.output, Some(output));
    }

    #[tokio::test]
    async fn list_executions_and_running_sweep() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let def = sample_definition(Uuid::now_v7());
        repo.create_definition(&def).await.unwrap();

        let running = sample_execution(def.tenant_id, def.id);
        repo.create_execution(&running).await.unwrap();
        repo.update_execution_status(&running.id, ExecutionStatus::Running, None, None)
            .await
            .unwrap();

        let mut other = sample_execution(def.tenant_id, def.id);
        other.id = Uuid::now_v7();
        repo.create_execution(&other).await.unwrap();
        repo.update_execution_status(&other.id, ExecutionStatus::Completed, None, None)
            .await
            .unwrap();

        let listed = repo.list_executions(&def.tenant_id, &def.id, 10).await.unwrap();
        assert_eq!(listed.len(), 2);

        let still_running = repo.list_running_executions().await.unwrap();
        assert_eq!(still_running.len(), 1);
        assert_eq!(still_running[0].id, running.id);
    }

    #[tokio::test]
    async fn task_lifecycle() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let def = sample_definition(Uuid::now_v7());
        repo.create_definition(&def).await.unwrap();
        let execution = sample_execution(def.tenant_id, def.id);
        repo.create_execution(&execution).await.unwrap();

        let task = TaskRecord {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            step_id: "gather".to_string(),
            agent_type: Some("researcher".to_string()),
            status: TaskStatus::Paused,
            input: json!({"query": "AI news"}),
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        repo.create_task(&task).await.unwrap();

        let output = json!({"articles": ["a", "b"]});
        repo.update_task_status(&task.id, TaskStatus::Success, Some(&output), None)
            .await
            .unwrap();

        let tasks = repo.list_tasks(&execution.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Success);
        assert!(tasks[0].completed_at.is_some());
        assert_eq!(tasks[0].output, Some(output));
    }

    #[tokio::test]
    async fn automation_log_append_and_list() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let def = sample_definition(Uuid::now_v7());
        repo.create_definition(&def).await.unwrap();
        let execution = sample_execution(def.tenant_id, def.id);
        repo.create_execution(&execution).await.unwrap();

        let entry = AutomationLog {
            id: Uuid::now_v7(),
            tenant_id: def.tenant_id,
            execution_id: execution.id,
            step_id: "review".to_string(),
            action: "auto_approve".to_string(),
            details: json!({"score": 0.9}),
            result: Some("approved".to_string()),
            created_at: Utc::now(),
        };
        repo.log_automation_action(&entry).await.unwrap();

        let entries = repo.list_automation_log(&execution.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "auto_approve");
    }
}
