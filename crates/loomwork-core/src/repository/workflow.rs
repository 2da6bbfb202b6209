//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions and their
//! executions: the definitions themselves (versioned, soft-deletable), the
//! per-run `ExecutionRecord`s, per-step `TaskRecord`s, and the
//! `AutomationLog` audit trail the Automation Engine writes to. The
//! infrastructure layer (loomwork-infra) implements this trait with SQLite
//! persistence.

use loomwork_types::error::RepositoryError;
use loomwork_types::workflow::{
    AutomationLog, ExecutionRecord, ExecutionStatus, TaskRecord, TaskStatus, WorkflowDefinition,
};
use uuid::Uuid;

/// Repository trait for workflow definitions and their executions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Insert a new workflow definition version.
    fn create_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get the current (non-soft-deleted) definition by ID.
    fn get_definition(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List definitions visible to a tenant, excluding soft-deleted rows.
    fn list_definitions(
        &self,
        tenant_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Insert a new version of an existing definition (copy-on-write, bumps `version`).
    fn save_new_version(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Soft-delete a definition. Returns `true` if a row was affected.
    fn soft_delete_definition(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update an execution's status, and optionally its output/error and timestamps.
    fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution record by ID.
    fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;

    /// List executions for a workflow definition, most recent first.
    fn list_executions(
        &self,
        tenant_id: &Uuid,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    /// List executions left in `Running` status (crash recovery sweep).
    fn list_running_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Record a step's execution, regardless of outcome.
    fn create_task(
        &self,
        task: &TaskRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a task's status and optionally its output/error.
    fn update_task_status(
        &self,
        task_id: &Uuid,
        status: TaskStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all task records for an execution, ordered by `started_at` ASC.
    fn list_tasks(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TaskRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Automation audit trail
    // -----------------------------------------------------------------------

    /// Append an automation decision (approval gate, quality-check retry,
    /// agent-switch hint) to the audit log.
    fn log_automation_action(
        &self,
        entry: &AutomationLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List automation log entries for an execution, ordered by `created_at` ASC.
    fn list_automation_log(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<AutomationLog>, RepositoryError>> + Send;
}
