//! Workflow domain types for Loomwork.
//!
//! Defines the canonical data model described in the workflow execution
//! core: the external `WorkflowDefinition` (nodes + edges authored by a
//! caller), the internal `StepDefinition` the Parser produces from it, the
//! records the Scheduler and Task Executor exchange while running, and the
//! persisted rows (`ExecutionRecord`, `TaskRecord`, `ApprovalRequest`,
//! `WorkflowSnapshot`, `AutomationLog`) that survive a process restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkflowDefinition (external input: nodes + edges)
// ---------------------------------------------------------------------------

/// Kind of a node in a raw `WorkflowDefinition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Agent,
    Tool,
    Router,
    Approval,
    Loop,
}

/// One node of a raw, author-facing workflow definition.
///
/// `inputs` maps the node's own variable names to template expressions
/// referencing upstream outputs (e.g. `"topic"` -> `"{{s1.output.title}}"`).
/// `config` is a free-form bag interpreted per `kind` by the Parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form display metadata (canvas position, color, etc.); opaque to the core.
    #[serde(default)]
    pub ui: Option<Value>,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
}

/// An edge linking a source node to a target node.
///
/// `condition` references a condition id evaluated on the source router
/// node; a plain dependency edge omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Visibility of a workflow definition row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowVisibility {
    Private,
    Tenant,
    Public,
}

/// The raw, author-facing workflow definition: an ordered collection of
/// nodes and edges. One node must be the designated `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: String,
    #[serde(default)]
    pub visibility: WorkflowVisibility,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Per-workflow concurrency cap override (None = engine default).
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub automation: Option<AutomationConfig>,
    #[serde(default)]
    pub soft_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for WorkflowVisibility {
    fn default() -> Self {
        Self::Private
    }
}

/// Execution mode for a workflow carrying an `AutomationConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    Manual,
    Automated,
}

/// Per-workflow automation settings consulted by `AutomationEngine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub mode: AutomationMode,
    #[serde(default)]
    pub max_rounds: u32,
}

// ---------------------------------------------------------------------------
// StepDefinition (internal, produced by the Parser)
// ---------------------------------------------------------------------------

/// Kind of an internal workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Agent,
    Tool,
    Condition,
    Loop,
    Approval,
}

/// Backoff policy between retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed { delay_secs: u64 },
    Exponential { delay_secs: u64 },
}

/// Retry policy applied by the Automated Task Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

/// A condition step's branch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionBlock {
    pub expression: String,
    #[serde(default)]
    pub on_true: Option<String>,
    #[serde(default)]
    pub on_false: Option<String>,
}

/// Approval gate configuration attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub required: bool,
    /// Expression evaluated against the step's own output; true -> auto-approve.
    #[serde(default)]
    pub auto_approve_if: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<i64>,
    #[serde(default)]
    pub notify_channels: Vec<String>,
    #[serde(default)]
    pub notify_targets: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub approval_type: Option<String>,
}

/// Quality-check policy: score the output, optionally rewrite once on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheckConfig {
    pub enabled: bool,
    pub min_score: f64,
    #[serde(default)]
    pub retry_on_fail: bool,
    #[serde(default)]
    pub rewrite_agent_type: Option<String>,
    /// Expression extracting a numeric score from the step's output.
    pub score_expression: String,
}

/// One rule of an agent-switch policy, evaluated in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRule {
    pub priority: i32,
    pub expression: String,
    pub suggested_agent: String,
}

/// Agent-switch hint policy: first matching rule suggests a replacement agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSwitchPolicy {
    pub rules: Vec<SwitchRule>,
}

/// The kind of loop and its type-specific parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "loop_type", rename_all = "snake_case")]
pub enum LoopType {
    Count { max_iterations: u32 },
    While { condition: String, max_iterations: Option<u32> },
    Foreach {
        collection: String,
        item_variable: String,
        #[serde(default)]
        index_variable: Option<String>,
    },
}

/// Loop-step configuration. Bodies are flat `StepDefinition` lists rather
/// than nested `LoopConfig`s — nested loops are rejected by the Parser (see
/// DESIGN.md's Open Question decision on loop-body variable scoping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub loop_type: LoopType,
    #[serde(default)]
    pub break_condition: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub delay_between_iterations_secs: Option<u64>,
    pub body: Vec<StepDefinition>,
}

/// One step of the internal, parsed workflow representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    pub kind: StepKind,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub prompt_override: Option<String>,
    /// Maps the step's own variable names to template expressions.
    #[serde(default)]
    pub input: HashMap<String, String>,
    /// Variable name this step's output is additionally bound to, if any.
    #[serde(default)]
    pub output_var: Option<String>,
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub condition: Option<ConditionBlock>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub approval: Option<ApprovalConfig>,
    #[serde(default)]
    pub quality_check: Option<QualityCheckConfig>,
    #[serde(default)]
    pub loop_config: Option<LoopConfig>,
    #[serde(default)]
    pub agent_switch: Option<AgentSwitchPolicy>,
}

impl StepDefinition {
    /// Canonical shared-context key under which this step's output is stored.
    pub fn output_key(&self) -> String {
        format!("{}.output", self.id)
    }

    pub fn approval_required(&self) -> bool {
        self.approval.as_ref().is_some_and(|a| a.required)
    }
}

// ---------------------------------------------------------------------------
// TaskResult (Scheduler <-> Task Executor)
// ---------------------------------------------------------------------------

/// Outcome of running a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Paused,
    Skipped,
    Rejected,
}

impl TaskStatus {
    /// True for statuses that satisfy a downstream step's dependency.
    pub fn resolves_dependency(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Skipped)
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Rejected)
    }
}

/// The result of executing one step, returned by the Task Executor to the Scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub step_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(step_id: impl Into<String>, output: Value) -> Self {
        Self {
            step_id: step_id.into(),
            status: TaskStatus::Success,
            output: Some(output),
            metadata: HashMap::new(),
            error: None,
        }
    }

    pub fn failed(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: TaskStatus::Failed,
            output: None,
            metadata: HashMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn paused(step_id: impl Into<String>, metadata: HashMap<String, Value>) -> Self {
        Self {
            step_id: step_id.into(),
            status: TaskStatus::Paused,
            output: None,
            metadata,
            error: None,
        }
    }

    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: TaskStatus::Skipped,
            output: None,
            metadata: HashMap::new(),
            error: Some(reason.into()),
        }
    }

    pub fn rejected(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: TaskStatus::Rejected,
            output: None,
            metadata: HashMap::new(),
            error: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalRequest
// ---------------------------------------------------------------------------

/// Lifecycle state of an approval request. Terminal once it leaves `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// A persisted human-approval gate tied to one paused step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub step_id: String,
    pub status: ApprovalStatus,
    pub approval_type: String,
    pub requester: String,
    #[serde(default)]
    pub approver: Option<String>,
    pub step_output: Value,
    #[serde(default)]
    pub comment: Option<String>,
    pub notify_channels: Vec<String>,
    pub notify_targets: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub notification_attempts: u32,
    #[serde(default)]
    pub last_notification_error: Option<String>,
    pub timeout_secs: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Input required to create a new approval request.
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub tenant_id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub step_id: String,
    pub approval_type: String,
    pub requester: String,
    pub step_output: Value,
    pub notify_channels: Vec<String>,
    pub notify_targets: HashMap<String, Vec<String>>,
    pub timeout_secs: i64,
}

// ---------------------------------------------------------------------------
// WorkflowSnapshot
// ---------------------------------------------------------------------------

/// Overall status recorded in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

/// A single step's persisted form inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStep {
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl From<&TaskResult> for PersistedStep {
    fn from(result: &TaskResult) -> Self {
        Self {
            status: result.status,
            output: result.output.clone().unwrap_or(Value::Null),
            metadata: result.metadata.clone(),
        }
    }
}

/// Durable per-execution state enabling resumption across process restarts.
///
/// Persisted at key `workflow:state:<execution_id>` with a 24h TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub execution_id: Uuid,
    pub mode: String,
    #[serde(default)]
    pub current_step: Option<String>,
    /// The step id that most recently suspended, recorded so `Resume` does
    /// not need to scan `steps` for a `paused` entry.
    #[serde(default)]
    pub paused_step_id: Option<String>,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default)]
    pub max_rounds: u32,
    pub steps: HashMap<String, PersistedStep>,
    #[serde(default)]
    pub pending_approvals: Vec<Uuid>,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSnapshot {
    pub fn new_running(execution_id: Uuid, mode: impl Into<String>) -> Self {
        Self {
            execution_id,
            mode: mode.into(),
            current_step: None,
            paused_step_id: None,
            current_round: 0,
            max_rounds: 0,
            steps: HashMap::new(),
            pending_approvals: Vec::new(),
            status: SnapshotStatus::Running,
            metadata: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord / TaskRecord / AutomationLog
// ---------------------------------------------------------------------------

/// Status of a persisted workflow execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Top-level record of one workflow submission. Owned exclusively by the Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: Uuid,
    pub status: ExecutionStatus,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
}

/// Record of one step's execution within a run, written regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    pub status: TaskStatus,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

/// An append-only log of an automation decision (auto-approve, quality
/// rewrite, agent-switch suggestion) for operational audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    pub action: String,
    pub details: Value,
    #[serde(default)]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_output_key() {
        let step = StepDefinition {
            id: "s1".to_string(),
            name: "step one".to_string(),
            kind: StepKind::Agent,
            agent_type: None,
            role: None,
            prompt_override: None,
            input: HashMap::new(),
            output_var: None,
            depends_on: vec![],
            condition: None,
            retry: None,
            timeout_secs: None,
            parallel: false,
            approval: None,
            quality_check: None,
            loop_config: None,
            agent_switch: None,
        };
        assert_eq!(step.output_key(), "s1.output");
        assert!(!step.approval_required());
    }

    #[test]
    fn test_task_status_resolves_dependency() {
        assert!(TaskStatus::Success.resolves_dependency());
        assert!(TaskStatus::Skipped.resolves_dependency());
        assert!(!TaskStatus::Failed.resolves_dependency());
        assert!(!TaskStatus::Paused.resolves_dependency());
        assert!(!TaskStatus::Rejected.resolves_dependency());
    }

    #[test]
    fn test_task_status_is_terminal_failure() {
        assert!(TaskStatus::Failed.is_terminal_failure());
        assert!(TaskStatus::Rejected.is_terminal_failure());
        assert!(!TaskStatus::Success.is_terminal_failure());
    }

    #[test]
    fn test_approval_status_terminal() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_task_result_constructors() {
        let s = TaskResult::success("s1", serde_json::json!({"a": 1}));
        assert_eq!(s.status, TaskStatus::Success);
        let f = TaskResult::failed("s2", "boom");
        assert_eq!(f.error.as_deref(), Some("boom"));
        let sk = TaskResult::skipped("s3", "upstream failure");
        assert_eq!(sk.status, TaskStatus::Skipped);
    }

    #[test]
    fn test_persisted_step_from_task_result() {
        let result = TaskResult::success("s1", serde_json::json!(42));
        let persisted = PersistedStep::from(&result);
        assert_eq!(persisted.status, TaskStatus::Success);
        assert_eq!(persisted.output, serde_json::json!(42));
    }

    #[test]
    fn test_workflow_snapshot_new_running() {
        let id = Uuid::now_v7();
        let snap = WorkflowSnapshot::new_running(id, "automated");
        assert_eq!(snap.execution_id, id);
        assert_eq!(snap.status, SnapshotStatus::Running);
        assert!(snap.steps.is_empty());
        assert!(snap.pending_approvals.is_empty());
    }

    #[test]
    fn test_node_kind_serde() {
        let json = serde_json::to_string(&NodeKind::Approval).unwrap();
        assert_eq!(json, "\"approval\"");
    }

    #[test]
    fn test_workflow_definition_serde_roundtrip() {
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "demo".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            visibility: WorkflowVisibility::Private,
            nodes: vec![Node {
                id: "start".to_string(),
                kind: NodeKind::Start,
                name: None,
                ui: None,
                config: serde_json::Map::new(),
                inputs: HashMap::new(),
            }],
            edges: vec![],
            max_concurrency: None,
            automation: None,
            soft_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "demo");
        assert_eq!(parsed.nodes.len(), 1);
    }
}
