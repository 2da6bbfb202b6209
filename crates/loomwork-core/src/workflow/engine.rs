//! Top-level orchestrator: submission, parse/build/schedule, and resumption.
//!
//! `Engine` owns the `ExecutionRecord` end to end: `execute` enqueues a
//! submission and returns immediately, `run_execution` is the worker-side
//! entry point that parses the definition, builds the DAG, and drives the
//! Scheduler with a plain `TaskExecutor`. `AutomationEngine` wraps an
//! `Engine` and, for workflows carrying an `AutomationConfig` in automated
//! mode, drives the same Scheduler with the Automated Task Executor instead,
//! threading a `WorkflowSnapshot` through pause/resume cycles. Workflows
//! with no automation config, or mode `manual`, are delegated straight back
//! to the wrapped `Engine`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use loomwork_types::error::RepositoryError;
use loomwork_types::event::WorkflowEvent;
use loomwork_types::workflow::{
    ApprovalStatus, AutomationMode, ExecutionRecord, ExecutionStatus, PersistedStep,
    SnapshotStatus, TaskRecord, TaskResult, TaskStatus, WorkflowSnapshot,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::repository::approval::ApprovalRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::workflow::checkpoint::{SnapshotError, SnapshotPatch, SnapshotStore};
use crate::workflow::context::ExecutionContext;
use crate::workflow::definition::{validate_definition, WorkflowError};
use crate::workflow::executor::{ScheduleOutcome, Scheduler, StepDispatcher, DEFAULT_MAX_CONCURRENCY};
use crate::workflow::parser::build_steps;

/// Errors surfaced by `Engine`/`AutomationEngine` operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("approval for step {0} was rejected")]
    ApprovalRejected(String),

    #[error("approval is still pending")]
    ApprovalPending,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Approval(#[from] crate::workflow::approval::ApprovalError),

    #[error("enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

// ---------------------------------------------------------------------------
// Execution queue
// ---------------------------------------------------------------------------

/// A submission handed off from `Engine::execute` to the worker that calls
/// `Engine::run_execution`.
#[derive(Debug, Clone)]
pub struct ExecutionJob {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub input: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("execution queue is closed")]
    Closed,
}

/// External collaborator the spec carves out as its own interface -- the
/// reference implementation here is an in-process channel; a real
/// deployment would back this with a durable broker.
pub trait ExecutionQueue: Send + Sync {
    fn enqueue(&self, job: ExecutionJob) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;
}

/// `tokio::sync::mpsc`-backed queue for single-process deployments and tests.
pub struct InProcessQueue {
    sender: mpsc::UnboundedSender<ExecutionJob>,
}

impl InProcessQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExecutionJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ExecutionQueue for InProcessQueue {
    async fn enqueue(&self, job: ExecutionJob) -> Result<(), QueueError> {
        self.sender.send(job).map_err(|_| QueueError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Standard (non-automated) execution path: submit, enqueue, and run to
/// completion with the base Task Executor.
pub struct Engine<R, Q, D>
where
    R: WorkflowRepository,
    Q: ExecutionQueue,
    D: StepDispatcher,
{
    repository: Arc<R>,
    queue: Arc<Q>,
    dispatcher: Arc<D>,
    events: EventBus,
    max_concurrency: usize,
}

impl<R, Q, D> Engine<R, Q, D>
where
    R: WorkflowRepository,
    Q: ExecutionQueue,
    D: StepDispatcher,
{
    pub fn new(repository: Arc<R>, queue: Arc<Q>, dispatcher: Arc<D>, events: EventBus) -> Self {
        Self {
            repository,
            queue,
            dispatcher,
            events,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// `Engine.Execute`: resolve the workflow, insert a `queued`
    /// `ExecutionRecord`, enqueue the job. On enqueue failure the record is
    /// marked `failed` in place rather than left dangling as `queued`.
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        input: Value,
    ) -> Result<ExecutionRecord, EngineError> {
        let def = self
            .repository
            .get_definition(&tenant_id, &workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("workflow".to_string()))?;

        let now = Utc::now();
        let record = ExecutionRecord {
            id: Uuid::now_v7(),
            tenant_id,
            workflow_id: def.id,
            user_id,
            status: ExecutionStatus::Queued,
            input: input.clone(),
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            trace_id: Uuid::now_v7().to_string(),
            created_at: now,
        };
        self.repository.create_execution(&record).await?;

        let job = ExecutionJob {
            execution_id: record.id,
            workflow_id: def.id,
            tenant_id,
            user_id,
            input,
        };

        if let Err(e) = self.queue.enqueue(job).await {
            self.repository
                .update_execution_status(&record.id, ExecutionStatus::Failed, None, Some(&e.to_string()))
                .await?;
            return Err(EngineError::Queue(e));
        }

        Ok(record)
    }

    /// `Engine.RunExecution`: the worker-side path. Loads the record and
    /// definition, parses and builds the DAG, drives the Scheduler, and
    /// persists the outcome.
    pub async fn run_execution(
        &self,
        execution_id: Uuid,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let mut record = self
            .repository
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("execution".to_string()))?;
        let def = self
            .repository
            .get_definition(&record.tenant_id, &record.workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("workflow".to_string()))?;

        validate_definition(&def)?;
        let steps = build_steps(&def)?;

        record.status = ExecutionStatus::Running;
        record.started_at = Some(Utc::now());
        self.repository
            .update_execution_status(&execution_id, ExecutionStatus::Running, None, None)
            .await?;
        self.events.publish(WorkflowEvent::ExecutionStarted {
            execution_id,
            workflow_id: def.id,
            tenant_id: record.tenant_id,
        });

        let ctx = Arc::new(ExecutionContext::new(
            execution_id,
            record.tenant_id,
            record.user_id,
            record.trace_id.clone(),
            def.name.clone(),
            Some(record.input.clone()),
        ));

        let concurrency = def.max_concurrency.unwrap_or(self.max_concurrency);
        let scheduler = Scheduler::new(concurrency);
        let outcome = scheduler
            .schedule(&steps, &ctx, &self.dispatcher, cancellation)
            .await?;

        self.persist_task_results(execution_id, &outcome).await?;
        self.finalize_record(&mut record, &outcome, &ctx).await?;
        Ok(record)
    }

    /// Writes a `TaskRecord` for every step the Scheduler resolved this
    /// round, success or failure alike.
    pub(crate) async fn persist_task_results(
        &self,
        execution_id: Uuid,
        outcome: &ScheduleOutcome,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        for (step_id, result) in &outcome.results {
            let task = TaskRecord {
                id: Uuid::now_v7(),
                execution_id,
                step_id: step_id.clone(),
                agent_type: None,
                status: result.status,
                input: Value::Null,
                output: result.output.clone(),
                error: result.error.clone(),
                started_at: None,
                completed_at: Some(now),
                retry_count: 0,
                created_at: now,
            };
            self.repository.create_task(&task).await?;
        }
        Ok(())
    }

    /// Common "what does this round's outcome mean for the execution row"
    /// logic, shared by the plain and automated paths.
    pub(crate) async fn finalize_record(
        &self,
        record: &mut ExecutionRecord,
        outcome: &ScheduleOutcome,
        ctx: &ExecutionContext,
    ) -> Result<(), EngineError> {
        let output = snapshot_context_output(ctx);

        if outcome.is_paused() {
            record.status = ExecutionStatus::Paused;
            self.repository
                .update_execution_status(&record.id, ExecutionStatus::Paused, None, None)
                .await?;
            self.events.publish(WorkflowEvent::ExecutionPaused {
                execution_id: record.id,
                step_id: first_paused_step(outcome).unwrap_or_default(),
            });
            return Ok(());
        }

        let status = if outcome.is_failed() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        let completed_at = Utc::now();
        self.repository
            .update_execution_status(&record.id, status, Some(&output), outcome.error.as_deref())
            .await?;

        let duration_ms = record
            .started_at
            .map(|started| (completed_at - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        match status {
            ExecutionStatus::Completed => {
                self.events.publish(WorkflowEvent::ExecutionCompleted {
                    execution_id: record.id,
                    duration_ms,
                });
            }
            ExecutionStatus::Failed => {
                self.events.publish(WorkflowEvent::ExecutionFailed {
                    execution_id: record.id,
                    error: outcome.error.clone().unwrap_or_default(),
                });
            }
            _ => {}
        }

        record.status = status;
        record.output = Some(output);
        record.error = outcome.error.clone();
        record.completed_at = Some(completed_at);
        Ok(())
    }
}

fn snapshot_context_output(ctx: &ExecutionContext) -> Value {
    Value::Object(ctx.get_all_data().into_iter().collect())
}

fn first_paused_step(outcome: &ScheduleOutcome) -> Option<String> {
    outcome
        .results
        .values()
        .find(|r| r.status == TaskStatus::Paused)
        .map(|r| r.step_id.clone())
}

/// Best-effort reconstruction of a `TaskResult` from a persisted snapshot
/// entry, used to seed `Scheduler::resume`'s `prior` map. Round-trips
/// status/output/metadata; the original attempt's error text is not
/// retained by `PersistedStep`, so a resumed failure carries no message.
fn persisted_to_task_result(step_id: &str, persisted: &PersistedStep) -> TaskResult {
    TaskResult {
        step_id: step_id.to_string(),
        status: persisted.status,
        output: if persisted.output.is_null() {
            None
        } else {
            Some(persisted.output.clone())
        },
        metadata: persisted.metadata.clone(),
        error: None,
    }
}

// ---------------------------------------------------------------------------
// Automation Engine
// ---------------------------------------------------------------------------

/// Wraps an `Engine` with approval-gated, snapshot-backed automated
/// execution. Workflows without automation config, or in `manual` mode,
/// fall straight through to the wrapped `Engine`.
pub struct AutomationEngine<R, Q, D, AD, S, AR>
where
    R: WorkflowRepository,
    Q: ExecutionQueue,
    D: StepDispatcher,
    AD: StepDispatcher,
    S: SnapshotStore,
    AR: ApprovalRepository,
{
    engine: Arc<Engine<R, Q, D>>,
    automated_dispatcher: Arc<AD>,
    snapshots: Arc<S>,
    approvals: Arc<AR>,
    max_concurrency: usize,
}

impl<R, Q, D, AD, S, AR> AutomationEngine<R, Q, D, AD, S, AR>
where
    R: WorkflowRepository,
    Q: ExecutionQueue,
    D: StepDispatcher,
    AD: StepDispatcher,
    S: SnapshotStore,
    AR: ApprovalRepository,
{
    pub fn new(
        engine: Arc<Engine<R, Q, D>>,
        automated_dispatcher: Arc<AD>,
        snapshots: Arc<S>,
        approvals: Arc<AR>,
    ) -> Self {
        Self {
            engine,
            automated_dispatcher,
            snapshots,
            approvals,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// `AutomationEngine.ExecuteWithAutomation`.
    pub async fn execute_with_automation(
        &self,
        execution_id: Uuid,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let mut record = self
            .engine
            .repository
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("execution".to_string()))?;
        let def = self
            .engine
            .repository
            .get_definition(&record.tenant_id, &record.workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("workflow".to_string()))?;

        let automated = matches!(
            def.automation.as_ref(),
            Some(cfg) if cfg.mode == AutomationMode::Automated
        );
        if !automated {
            return self.engine.run_execution(execution_id, cancellation).await;
        }

        validate_definition(&def)?;
        let steps = build_steps(&def)?;

        record.status = ExecutionStatus::Running;
        record.started_at = Some(Utc::now());
        self.engine
            .repository
            .update_execution_status(&execution_id, ExecutionStatus::Running, None, None)
            .await?;
        self.engine.events.publish(WorkflowEvent::ExecutionStarted {
            execution_id,
            workflow_id: def.id,
            tenant_id: record.tenant_id,
        });

        let mut snapshot = WorkflowSnapshot::new_running(execution_id, "automated");
        snapshot.max_rounds = def.automation.as_ref().map(|c| c.max_rounds).unwrap_or(0);
        snapshot.metadata.insert("workflow_id".to_string(), Value::String(def.id.to_string()));
        snapshot
            .metadata
            .insert("tenant_id".to_string(), Value::String(record.tenant_id.to_string()));
        snapshot
            .metadata
            .insert("user_id".to_string(), Value::String(record.user_id.to_string()));
        snapshot.metadata.insert("input".to_string(), record.input.clone());
        self.snapshots.save(&snapshot).await?;

        let ctx = Arc::new(ExecutionContext::new(
            execution_id,
            record.tenant_id,
            record.user_id,
            record.trace_id.clone(),
            def.name.clone(),
            Some(record.input.clone()),
        ));

        let concurrency = def.max_concurrency.unwrap_or(self.max_concurrency);
        let scheduler = Scheduler::new(concurrency);
        let outcome = scheduler
            .schedule(&steps, &ctx, &self.automated_dispatcher, cancellation)
            .await?;

        self.settle_round(&mut record, &outcome, &ctx).await?;
        Ok(record)
    }

    /// `AutomationEngine.ResumeExecution`.
    pub async fn resume_execution(
        &self,
        execution_id: Uuid,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let mut snapshot = self.snapshots.must_get(&execution_id).await?;
        let mut record = self
            .engine
            .repository
            .get_execution(&execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("execution".to_string()))?;
        let def = self
            .engine
            .repository
            .get_definition(&record.tenant_id, &record.workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("workflow".to_string()))?;

        let approval_id = snapshot
            .pending_approvals
            .first()
            .copied()
            .ok_or_else(|| EngineError::NotFound("pending approval".to_string()))?;
        let approval = self
            .approvals
            .get(&approval_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("approval request".to_string()))?;

        match approval.status {
            ApprovalStatus::Pending => return Err(EngineError::ApprovalPending),
            ApprovalStatus::Rejected | ApprovalStatus::Timeout => {
                return Err(EngineError::ApprovalRejected(approval.step_id));
            }
            ApprovalStatus::Approved => {
                if let Some(step) = snapshot.steps.get_mut(&approval.step_id) {
                    step.status = TaskStatus::Success;
                }
            }
        }

        validate_definition(&def)?;
        let steps = build_steps(&def)?;
        let ctx = Arc::new(ExecutionContext::new(
            execution_id,
            record.tenant_id,
            record.user_id,
            record.trace_id.clone(),
            def.name.clone(),
            Some(record.input.clone()),
        ));

        let prior: HashMap<String, TaskResult> = snapshot
            .steps
            .iter()
            .map(|(id, persisted)| (id.clone(), persisted_to_task_result(id, persisted)))
            .collect();

        let concurrency = def.max_concurrency.unwrap_or(self.max_concurrency);
        let scheduler = Scheduler::new(concurrency);
        let outcome = scheduler
            .resume(&steps, &ctx, &self.automated_dispatcher, cancellation, prior)
            .await?;

        self.snapshots
            .update(&execution_id, "automated", SnapshotPatch::new().remove_approval(approval_id))
            .await?;

        self.settle_round(&mut record, &outcome, &ctx).await?;
        Ok(record)
    }

    /// Shared pause/terminal handling for both the initial round and every
    /// resume: `paused` rewrites the snapshot and stops there; a terminal
    /// outcome deletes the snapshot and finalizes the execution record
    /// exactly as the plain `Engine` path does. `outcome.patches` carries
    /// side-channel snapshot updates from individual dispatches (an
    /// approval gate's `add_approval`, for instance) and is replayed onto
    /// the snapshot before the terminal/paused decision.
    async fn settle_round(
        &self,
        record: &mut ExecutionRecord,
        outcome: &ScheduleOutcome,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<(), EngineError> {
        self.engine.persist_task_results(record.id, outcome).await?;

        let persisted: HashMap<String, PersistedStep> = outcome
            .results
            .iter()
            .map(|(id, result)| (id.clone(), PersistedStep::from(result)))
            .collect();
        self.snapshots
            .update(&record.id, "automated", SnapshotPatch::new().step_results(persisted))
            .await?;
        for patch in &outcome.patches {
            self.snapshots.update(&record.id, "automated", patch.clone()).await?;
        }

        if outcome.is_paused() {
            self.snapshots
                .update(&record.id, "automated", SnapshotPatch::new().status(SnapshotStatus::Paused))
                .await?;
            record.status = ExecutionStatus::Paused;
            self.engine
                .repository
                .update_execution_status(&record.id, ExecutionStatus::Paused, None, None)
                .await?;
            self.engine.events.publish(WorkflowEvent::ExecutionPaused {
                execution_id: record.id,
                step_id: first_paused_step(outcome).unwrap_or_default(),
            });
            return Ok(());
        }

        self.snapshots.delete(&record.id).await?;
        self.engine.finalize_record(record, outcome, ctx).await
    }
}
