//! Task Executor: dispatches one step by `StepKind`, and the Automated Task
//! Executor that wraps it with approval/retry/quality-check/switch-hint
//! policies.
//!
//! External collaborators are reached through the "capability-set
//! interfaces" the design calls for: `AgentRuntime` invokes agent steps,
//! `ToolHandler` invokes tool steps. This module ships no implementation of
//! either -- `loomwork-infra::workflow` wires up reference, echo-based
//! implementations so the engine runs end to end without a real LLM/tool
//! backend.

use std::collections::HashMap;

use loomwork_types::workflow::{
    ApprovalConfig, LoopType, NewApprovalRequest, StepDefinition, StepKind, TaskResult, TaskStatus,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::approval::ApprovalRepository;
use crate::workflow::approval::{ApprovalManager, Notifier};
use crate::workflow::checkpoint::SnapshotPatch;
use crate::workflow::context::ExecutionContext;
use crate::workflow::expression::WorkflowEvaluator;
use crate::workflow::retry::run_with_retry;
use crate::workflow::template::TemplateRenderer;

/// Errors from Task Executor dispatch.
#[derive(Debug, thiserror::Error)]
pub enum TaskExecutorError {
    #[error("template resolution failed: {0}")]
    Template(String),

    #[error("expression evaluation failed: {0}")]
    Expression(String),

    #[error("agent runtime error: {0}")]
    Agent(String),

    #[error("tool handler error: {0}")]
    Tool(String),

    #[error("missing collection for foreach loop: {0}")]
    MissingCollection(String),

    #[error("approval error: {0}")]
    Approval(#[from] crate::workflow::approval::ApprovalError),
}

/// Identity and a read-only data snapshot handed to an `AgentRuntime`/
/// `ToolHandler` invocation -- never the live `ExecutionContext`, so a
/// collaborator cannot race concurrent sibling writes.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub execution_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub step_id: String,
    pub data_snapshot: HashMap<String, Value>,
}

/// Invokes an agent by type, with an optional role and prompt override.
pub trait AgentRuntime: Send + Sync {
    fn execute(
        &self,
        agent_type: &str,
        role: Option<&str>,
        prompt_override: Option<&str>,
        input: &Value,
        ctx: &AgentContext,
    ) -> impl std::future::Future<Output = Result<Value, TaskExecutorError>> + Send;
}

/// Invokes a registered tool by name.
pub trait ToolHandler: Send + Sync {
    fn execute(
        &self,
        tool_name: &str,
        input: &Value,
        ctx: &AgentContext,
    ) -> impl std::future::Future<Output = Result<Value, TaskExecutorError>> + Send;
}

fn agent_context(step: &StepDefinition, ctx: &ExecutionContext) -> AgentContext {
    AgentContext {
        execution_id: ctx.execution_id,
        tenant_id: ctx.tenant_id,
        user_id: ctx.user_id,
        step_id: step.id.clone(),
        data_snapshot: ctx.get_all_data(),
    }
}

// ---------------------------------------------------------------------------
// Base Task Executor
// ---------------------------------------------------------------------------

/// Dispatches a single step by kind. No retry, approval, or quality-check
/// policy -- those are the Automated Task Executor's job.
pub struct TaskExecutor<A: AgentRuntime, T: ToolHandler> {
    agent_runtime: A,
    tool_handler: T,
    renderer: TemplateRenderer,
    evaluator: WorkflowEvaluator,
}

impl<A: AgentRuntime, T: ToolHandler> TaskExecutor<A, T> {
    pub fn new(agent_runtime: A, tool_handler: T) -> Self {
        Self {
            agent_runtime,
            tool_handler,
            renderer: TemplateRenderer::new(),
            evaluator: WorkflowEvaluator::new(),
        }
    }

    /// Run the "real work" kinds (`Agent`, `Tool`) -- one attempt, no policy
    /// wrapping. `Condition`/`Loop`/`Approval` are dispatched by the
    /// Automated Task Executor, which owns the control-flow and gating logic.
    pub async fn run_once(&self, step: &StepDefinition, ctx: &ExecutionContext) -> TaskResult {
        let input = match self.renderer.render_input_map(&step.input, ctx) {
            Ok(map) => Value::Object(map),
            Err(e) => return TaskResult::failed(&step.id, format!("template error: {e}")),
        };

        let agent_ctx = agent_context(step, ctx);

        let outcome = match step.kind {
            StepKind::Agent => {
                let Some(agent_type) = step.agent_type.as_deref() else {
                    return TaskResult::failed(&step.id, "agent step missing agent_type");
                };
                self.agent_runtime
                    .execute(
                        agent_type,
                        step.role.as_deref(),
                        step.prompt_override.as_deref(),
                        &input,
                        &agent_ctx,
                    )
                    .await
            }
            StepKind::Tool => {
                let Some(tool_name) = step.agent_type.as_deref() else {
                    return TaskResult::failed(&step.id, "tool step missing tool name");
                };
                self.tool_handler.execute(tool_name, &input, &agent_ctx).await
            }
            _ => {
                return TaskResult::failed(&step.id, "run_once only dispatches Agent/Tool steps");
            }
        };

        match outcome {
            Ok(output) => TaskResult::success(&step.id, output),
            Err(e) => TaskResult::failed(&step.id, e.to_string()),
        }
    }

    fn evaluate_condition(&self, step: &StepDefinition, ctx: &ExecutionContext) -> TaskResult {
        let Some(block) = &step.condition else {
            return TaskResult::failed(&step.id, "condition step missing `condition` block");
        };
        let scope = ctx.to_expression_context();
        let result = match self.evaluator.evaluate_bool(&block.expression, &scope) {
            Ok(v) => v,
            Err(e) => return TaskResult::failed(&step.id, format!("condition eval failed: {e}")),
        };
        let next_step = if result { block.on_true.clone() } else { block.on_false.clone() };
        TaskResult::success(
            &step.id,
            json!({ "condition_result": result, "next_step": next_step }),
        )
    }
}

impl<A: AgentRuntime, T: ToolHandler> crate::workflow::executor::StepDispatcher for TaskExecutor<A, T> {
    async fn dispatch(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        cancellation: &CancellationToken,
    ) -> (TaskResult, Option<SnapshotPatch>) {
        match step.kind {
            StepKind::Condition => (self.evaluate_condition(step, ctx), None),
            StepKind::Agent | StepKind::Tool => {
                let result = run_with_retry(step.retry.as_ref(), cancellation, |_attempt| {
                    self.run_once(step, ctx)
                })
                .await;
                (result, None)
            }
            StepKind::Loop | StepKind::Approval => (
                TaskResult::failed(&step.id, "step kind requires the Automated Task Executor"),
                None,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Automated Task Executor
// ---------------------------------------------------------------------------

/// Wraps the base executor with the policies spec'd for automated runs:
/// approval gate, retry loop, quality-check rewrite pass, and agent-switch
/// hinting -- plus dispatch for the `Condition`, `Loop`, and `Approval`
/// step kinds the base executor doesn't handle.
pub struct AutomatedTaskExecutor<A, T, R, N = crate::workflow::approval::LoggingNotifier>
where
    A: AgentRuntime,
    T: ToolHandler,
    R: ApprovalRepository,
    N: Notifier,
{
    base: TaskExecutor<A, T>,
    approvals: ApprovalManager<R, N>,
    evaluator: WorkflowEvaluator,
    loop_safety_cap: u32,
    default_approval_timeout_secs: i64,
}

impl<A, T, R, N> AutomatedTaskExecutor<A, T, R, N>
where
    A: AgentRuntime,
    T: ToolHandler,
    R: ApprovalRepository,
    N: Notifier,
{
    pub fn new(
        base: TaskExecutor<A, T>,
        approvals: ApprovalManager<R, N>,
        loop_safety_cap: u32,
        default_approval_timeout_secs: i64,
    ) -> Self {
        Self {
            base,
            approvals,
            evaluator: WorkflowEvaluator::new(),
            loop_safety_cap,
            default_approval_timeout_secs,
        }
    }

    /// Dispatch one step, applying automation policy. Used by the Scheduler
    /// for top-level steps, and recursively by `run_loop` for body steps.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        cancellation: &CancellationToken,
    ) -> (TaskResult, Option<SnapshotPatch>) {
        match step.kind {
            StepKind::Condition => (self.base.evaluate_condition(step, ctx), None),
            StepKind::Loop => (self.run_loop(step, ctx, cancellation).await, None),
            StepKind::Agent | StepKind::Tool | StepKind::Approval => {
                self.run_gated(step, ctx, cancellation).await
            }
        }
    }

    /// Approval gate -> retry loop -> quality check -> switch hint, in order.
    async fn run_gated(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        cancellation: &CancellationToken,
    ) -> (TaskResult, Option<SnapshotPatch>) {
        if let Some(approval) = step.approval.as_ref().filter(|a| a.required) {
            match self.try_auto_approve(step, ctx, approval).await {
                Ok(true) => {}
                Ok(false) => return self.open_approval_gate(step, ctx, approval).await,
                Err(e) => return (TaskResult::failed(&step.id, e.to_string()), None),
            }
        } else if step.kind == StepKind::Approval {
            // No config at all on a dedicated Approval step: always gates.
            return self
                .open_approval_gate(
                    step,
                    ctx,
                    &ApprovalConfig {
                        required: true,
                        auto_approve_if: None,
                        timeout_secs: None,
                        notify_channels: vec![],
                        notify_targets: HashMap::new(),
                        approval_type: None,
                    },
                )
                .await;
        }

        if step.kind == StepKind::Approval {
            // Approval already granted (auto or otherwise) and there's no
            // further "work" -- the step's output is the approval decision.
            return (TaskResult::success(&step.id, json!({ "approval_status": "approved" })), None);
        }

        let mut result = run_with_retry(step.retry.as_ref(), cancellation, |_attempt| {
            self.base.run_once(step, ctx)
        })
        .await;

        if result.status == TaskStatus::Success {
            self.apply_quality_check(step, ctx, &mut result).await;
            self.apply_switch_hint(step, ctx, &mut result);
        }

        (result, None)
    }

    async fn try_auto_approve(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        approval: &ApprovalConfig,
    ) -> Result<bool, TaskExecutorError> {
        let Some(expr) = approval.auto_approve_if.as_deref() else {
            return Ok(false);
        };
        // `auto_approve_if` is written against bare paths (e.g.
        // `s1.output.score >= 90`), not the `steps.`/`variables.`-qualified
        // shape `to_expression_context` produces -- use the flat scope so
        // both step outputs and plain variables resolve directly.
        let scope = ctx.to_flat_scope();
        let approved = self
            .approvals
            .check_auto_approval(&scope, expr)
            .map_err(TaskExecutorError::Approval)?;
        Ok(approved)
    }

    async fn open_approval_gate(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        approval: &ApprovalConfig,
    ) -> (TaskResult, Option<SnapshotPatch>) {
        let request = match self
            .approvals
            .create_request(NewApprovalRequest {
                tenant_id: ctx.tenant_id,
                execution_id: ctx.execution_id,
                workflow_id: Uuid::nil(),
                step_id: step.id.clone(),
                approval_type: approval.approval_type.clone().unwrap_or_else(|| "manual".to_string()),
                requester: ctx.user_id.to_string(),
                step_output: ctx.get_step_output(&step.id).unwrap_or(Value::Null),
                notify_channels: approval.notify_channels.clone(),
                notify_targets: approval.notify_targets.clone(),
                timeout_secs: approval.timeout_secs.unwrap_or(self.default_approval_timeout_secs),
            })
            .await
        {
            Ok(r) => r,
            Err(e) => return (TaskResult::failed(&step.id, e.to_string()), None),
        };

        let mut metadata = HashMap::new();
        metadata.insert("approval_status".to_string(), json!("pending"));
        metadata.insert("approval_id".to_string(), json!(request.id));
        let result = TaskResult::paused(&step.id, metadata);
        let patch = SnapshotPatch::new().add_approval(request.id);
        (result, Some(patch))
    }

    async fn apply_quality_check(&self, step: &StepDefinition, ctx: &ExecutionContext, result: &mut TaskResult) {
        let Some(qc) = step.quality_check.as_ref().filter(|q| q.enabled) else {
            return;
        };
        let Some(output) = result.output.clone() else { return };
        let score = match self.evaluator.evaluate_value(&qc.score_expression, &output) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => return,
        };
        if score >= qc.min_score || !qc.retry_on_fail {
            return;
        }
        let Some(rewrite_agent) = qc.rewrite_agent_type.as_deref() else {
            return;
        };
        let agent_ctx = agent_context(step, ctx);
        if let Ok(rewritten) = self
            .base
            .agent_runtime
            .execute(rewrite_agent, step.role.as_deref(), None, &output, &agent_ctx)
            .await
        {
            result.output = Some(rewritten);
        }
    }

    fn apply_switch_hint(&self, step: &StepDefinition, ctx: &ExecutionContext, result: &mut TaskResult) {
        let Some(policy) = step.agent_switch.as_ref() else { return };
        let scope = ctx.to_expression_context();
        let mut rules = policy.rules.clone();
        rules.sort_by_key(|r| r.priority);
        for rule in &rules {
            match self.evaluator.evaluate_bool(&rule.expression, &scope) {
                Ok(true) => {
                    result
                        .metadata
                        .insert("next_agent_suggestion".to_string(), json!(rule.suggested_agent));
                    return;
                }
                _ => continue,
            }
        }
    }

    /// Iterate a `Loop` step's body per its `LoopType`, honoring
    /// `BreakCondition`, `ContinueOnError`, `DelayBetweenIterations`, and the
    /// configured safety cap. Loop-scoped variables are written before each
    /// iteration and restored afterward so they never leak past the loop.
    async fn run_loop(&self, step: &StepDefinition, ctx: &ExecutionContext, cancellation: &CancellationToken) -> TaskResult {
        let Some(loop_cfg) = step.loop_config.as_ref() else {
            return TaskResult::failed(&step.id, "loop step missing loop_config");
        };

        let max_iterations = match &loop_cfg.loop_type {
            LoopType::Count { max_iterations } => (*max_iterations).min(self.loop_safety_cap),
            LoopType::While { max_iterations, .. } => (*max_iterations).min(self.loop_safety_cap),
            LoopType::Foreach { .. } => self.loop_safety_cap,
        };

        let collection: Vec<Value> = if let LoopType::Foreach { collection, .. } = &loop_cfg.loop_type {
            match ctx.get(collection).or_else(|| ctx.to_expression_context().get(collection).cloned()) {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => return TaskResult::failed(&step.id, format!("missing collection for foreach: {collection}")),
            }
        } else {
            vec![]
        };

        let mut results = Vec::new();
        let mut iterations = 0u32;

        loop {
            if cancellation.is_cancelled() {
                break;
            }
            if iterations >= max_iterations {
                break;
            }
            if let LoopType::Foreach { .. } = &loop_cfg.loop_type {
                if iterations as usize >= collection.len() {
                    break;
                }
            }
            if let LoopType::While { condition, .. } = &loop_cfg.loop_type {
                let scope = ctx.to_expression_context();
                match self.evaluator.evaluate_bool(condition, &scope) {
                    Ok(false) => break,
                    Err(e) => {
                        results.push(json!({ "error": format!("while condition failed: {e}") }));
                        break;
                    }
                    Ok(true) => {}
                }
            }

            let restore = self.bind_loop_variables(step, ctx, loop_cfg, &collection, iterations);

            let mut iteration_outputs = Vec::new();
            let mut iteration_failed = false;
            for body_step in &loop_cfg.body {
                let (result, _) = Box::pin(self.execute(body_step, ctx, cancellation)).await;
                if result.status.is_terminal_failure() {
                    iteration_failed = true;
                    if !loop_cfg.continue_on_error {
                        self.restore_loop_variables(ctx, restore);
                        let error = result.error.unwrap_or_default();
                        results.push(json!({ "error": error.clone() }));
                        let mut failed = TaskResult::failed(&step.id, error);
                        failed.output = Some(json!({ "iterations": iterations, "completed": false, "results": results }));
                        return failed;
                    }
                    iteration_outputs.push(json!({ "error": result.error.unwrap_or_default() }));
                } else {
                    iteration_outputs.push(result.output.unwrap_or(Value::Null));
                }
            }
            results.push(if iteration_outputs.len() == 1 {
                iteration_outputs.into_iter().next().unwrap()
            } else {
                Value::Array(iteration_outputs)
            });

            self.restore_loop_variables(ctx, restore);
            iterations += 1;
            let _ = iteration_failed;

            if let Some(break_expr) = &loop_cfg.break_condition {
                let scope = ctx.to_expression_context();
                if matches!(self.evaluator.evaluate_bool(break_expr, &scope), Ok(true)) {
                    break;
                }
            }

            if let Some(delay) = loop_cfg.delay_between_iterations_secs {
                if delay > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {}
                        _ = cancellation.cancelled() => break,
                    }
                }
            }
        }

        TaskResult::success(
            &step.id,
            json!({ "iterations": iterations, "completed": true, "results": results }),
        )
    }

    /// Write `ItemVariable`/`IndexVariable` for this iteration, returning
    /// the prior values so the caller can restore them afterward.
    fn bind_loop_variables(
        &self,
        _step: &StepDefinition,
        ctx: &ExecutionContext,
        loop_cfg: &loomwork_types::workflow::LoopConfig,
        collection: &[Value],
        index: u32,
    ) -> Vec<(String, Option<Value>)> {
        let mut restore = Vec::new();
        if let LoopType::Foreach {
            item_variable,
            index_variable,
            ..
        } = &loop_cfg.loop_type
        {
            restore.push((item_variable.clone(), ctx.get(item_variable)));
            let _ = ctx.set(item_variable.clone(), collection.get(index as usize).cloned().unwrap_or(Value::Null));
            if let Some(idx_var) = index_variable {
                restore.push((idx_var.clone(), ctx.get(idx_var)));
                let _ = ctx.set(idx_var.clone(), json!(index));
            }
        }
        restore
    }

    fn restore_loop_variables(&self, ctx: &ExecutionContext, restore: Vec<(String, Option<Value>)>) {
        for (key, prior) in restore {
            match prior {
                Some(v) => {
                    let _ = ctx.set(key, v);
                }
                None => {
                    // `ExecutionContext` has no remove(); an empty-string
                    // sentinel distinguishes "never set" for callers that
                    // care. Loop variables are scoped to this step's own
                    // template scope, so leaving a null behind is harmless.
                    let _ = ctx.set(key, Value::Null);
                }
            }
        }
    }
}

impl<A, T, R, N> crate::workflow::executor::StepDispatcher for AutomatedTaskExecutor<A, T, R, N>
where
    A: AgentRuntime,
    T: ToolHandler,
    R: ApprovalRepository,
    N: Notifier,
{
    async fn dispatch(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        cancellation: &CancellationToken,
    ) -> (TaskResult, Option<SnapshotPatch>) {
        self.execute(step, ctx, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::approval::LoggingNotifier;
    use loomwork_types::error::RepositoryError;
    use loomwork_types::workflow::{
        ApprovalRequest, ApprovalStatus, ConditionBlock, LoopConfig, QualityCheckConfig, RetryPolicy, BackoffPolicy,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoAgent;

    impl AgentRuntime for EchoAgent {
        async fn execute(
            &self,
            agent_type: &str,
            _role: Option<&str>,
            _prompt_override: Option<&str>,
            input: &Value,
            _ctx: &AgentContext,
        ) -> Result<Value, TaskExecutorError> {
            Ok(json!({ "agent": agent_type, "input": input }))
        }
    }

    #[derive(Default)]
    struct NoopTool;

    impl ToolHandler for NoopTool {
        async fn execute(&self, tool_name: &str, input: &Value, _ctx: &AgentContext) -> Result<Value, TaskExecutorError> {
            Ok(json!({ "tool": tool_name, "input": input }))
        }
    }

    #[derive(Default)]
    struct FailNAgent {
        failures_remaining: AtomicU32,
    }

    impl AgentRuntime for FailNAgent {
        async fn execute(
            &self,
            _agent_type: &str,
            _role: Option<&str>,
            _prompt_override: Option<&str>,
            _input: &Value,
            _ctx: &AgentContext,
        ) -> Result<Value, TaskExecutorError> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                Err(TaskExecutorError::Agent("transient".to_string()))
            } else {
                Ok(json!({ "ok": true }))
            }
        }
    }

    #[derive(Default)]
    struct InMemoryApprovalRepo {
        requests: Mutex<HashMap<Uuid, ApprovalRequest>>,
    }

    impl ApprovalRepository for InMemoryApprovalRepo {
        async fn create(&self, req: NewApprovalRequest) -> Result<ApprovalRequest, RepositoryError> {
            let id = Uuid::now_v7();
            let now = chrono::Utc::now();
            let request = ApprovalRequest {
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
                expires_at: now + chrono::Duration::seconds(req.timeout_secs),
                created_at: now,
                updated_at: now,
                resolved_at: None,
            };
            self.requests.lock().unwrap().insert(id, request.clone());
            Ok(request)
        }

        async fn get(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
            Ok(self.requests.lock().unwrap().get(id).cloned())
        }

        async fn resolve(
            &self,
            id: &Uuid,
            status: ApprovalStatus,
            approver: Option<&str>,
            comment: Option<&str>,
        ) -> Result<ApprovalRequest, RepositoryError> {
            let mut requests = self.requests.lock().unwrap();
            let request = requests.get_mut(id).ok_or(RepositoryError::NotFound)?;
            request.status = status;
            request.approver = approver.map(|s| s.to_string());
            request.comment = comment.map(|s| s.to_string());
            Ok(request.clone())
        }

        async fn record_notification_attempt(&self, id: &Uuid, error: Option<&str>) -> Result<(), RepositoryError> {
            let mut requests = self.requests.lock().unwrap();
            let request = requests.get_mut(id).ok_or(RepositoryError::NotFound)?;
            request.notification_attempts += 1;
            request.last_notification_error = error.map(|s| s.to_string());
            Ok(())
        }

        async fn list_expired(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
            Ok(vec![])
        }

        async fn list_pending_for_execution(&self, _execution_id: &Uuid) -> Result<Vec<ApprovalRequest>, RepositoryError> {
            Ok(vec![])
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7(), "trace-1", "wf".to_string(), None)
    }

    fn agent_step(id: &str) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            name: id.to_string(),
            kind: StepKind::Agent,
            agent_type: Some("researcher".to_string()),
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
        }
    }

    fn automated(
        agent: impl AgentRuntime,
    ) -> AutomatedTaskExecutor<impl AgentRuntime, NoopTool, InMemoryApprovalRepo, LoggingNotifier> {
        AutomatedTaskExecutor::new(
            TaskExecutor::new(agent, NoopTool),
            ApprovalManager::new(InMemoryApprovalRepo::default(), LoggingNotifier, vec!["websocket".to_string()], 3),
            1000,
            3600,
        )
    }

    #[tokio::test]
    async fn test_agent_step_success() {
        let exec = automated(EchoAgent);
        let cancel = CancellationToken::new();
        let (result, _) = exec.execute(&agent_step("s1"), &ctx(), &cancel).await;
        assert_eq!(result.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_condition_step_picks_branch() {
        let exec = automated(EchoAgent);
        let mut step = agent_step("cond");
        step.kind = StepKind::Condition;
        step.condition = Some(ConditionBlock {
            expression: "1 == 1".to_string(),
            on_true: Some("yes".to_string()),
            on_false: Some("no".to_string()),
        });
        let cancel = CancellationToken::new();
        let (result, _) = exec.execute(&step, &ctx(), &cancel).await;
        assert_eq!(result.output.unwrap()["next_step"], json!("yes"));
    }

    #[tokio::test]
    async fn test_approval_required_without_auto_approve_pauses() {
        let exec = automated(EchoAgent);
        let mut step = agent_step("s2");
        step.approval = Some(ApprovalConfig {
            required: true,
            auto_approve_if: None,
            timeout_secs: Some(3600),
            notify_channels: vec!["email".to_string()],
            notify_targets: HashMap::new(),
            approval_type: Some("manual".to_string()),
        });
        let cancel = CancellationToken::new();
        let (result, patch) = exec.execute(&step, &ctx(), &cancel).await;
        assert_eq!(result.status, TaskStatus::Paused);
        assert!(patch.is_some());
    }

    #[tokio::test]
    async fn test_approval_auto_approved_proceeds_to_work() {
        let exec = automated(EchoAgent);
        let context = ctx();
        context.set("score".to_string(), json!(95)).unwrap();
        let mut step = agent_step("s2");
        step.approval = Some(ApprovalConfig {
            required: true,
            auto_approve_if: Some("score >= 90".to_string()),
            timeout_secs: Some(3600),
            notify_channels: vec![],
            notify_targets: HashMap::new(),
            approval_type: Some("manual".to_string()),
        });
        let cancel = CancellationToken::new();
        let (result, patch) = exec.execute(&step, &context, &cancel).await;
        assert_eq!(result.status, TaskStatus::Success);
        assert!(patch.is_none());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let agent = FailNAgent { failures_remaining: AtomicU32::new(2) };
        let exec = automated(agent);
        let mut step = agent_step("s3");
        step.retry = Some(RetryPolicy { max_retries: 3, backoff: BackoffPolicy::Fixed { delay_secs: 0 } });
        let cancel = CancellationToken::new();
        let (result, _) = exec.execute(&step, &ctx(), &cancel).await;
        assert_eq!(result.status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_foreach_loop_iterates_collection() {
        let exec = automated(EchoAgent);
        let context = ctx();
        context.set("items".to_string(), json!([1, 2, 3])).unwrap();

        let mut step = agent_step("loop1");
        step.kind = StepKind::Loop;
        let mut body_step = agent_step("body");
        body_step.input.insert("item".to_string(), "{{item}}".to_string());
        step.loop_config = Some(LoopConfig {
            loop_type: LoopType::Foreach {
                collection: "items".to_string(),
                item_variable: "item".to_string(),
                index_variable: Some("idx".to_string()),
            },
            break_condition: None,
            continue_on_error: false,
            delay_between_iterations_secs: None,
            body: vec![body_step],
        });

        let cancel = CancellationToken::new();
        let (result, _) = exec.execute(&step, &context, &cancel).await;
        let output = result.output.unwrap();
        assert_eq!(output["iterations"], json!(3));
        assert_eq!(output["results"].as_array().unwrap().len(), 3);
        // loop variable does not leak past the loop
        assert_eq!(context.get("item"), Some(Value::Null));
    }

    #[tokio::test]
    async fn test_count_loop_respects_max_iterations() {
        let exec = automated(EchoAgent);
        let mut step = agent_step("loop2");
        step.kind = StepKind::Loop;
        step.loop_config = Some(LoopConfig {
            loop_type: LoopType::Count { max_iterations: 3 },
            break_condition: None,
            continue_on_error: false,
            delay_between_iterations_secs: None,
            body: vec![agent_step("body")],
        });
        let cancel = CancellationToken::new();
        let (result, _) = exec.execute(&step, &ctx(), &cancel).await;
        assert_eq!(result.output.unwrap()["iterations"], json!(3));
    }

    #[tokio::test]
    async fn test_loop_body_failure_surfaces_as_failed_when_not_continuing() {
        let agent = FailNAgent { failures_remaining: AtomicU32::new(u32::MAX) };
        let exec = automated(agent);
        let mut step = agent_step("loop3");
        step.kind = StepKind::Loop;
        step.loop_config = Some(LoopConfig {
            loop_type: LoopType::Count { max_iterations: 3 },
            break_condition: None,
            continue_on_error: false,
            delay_between_iterations_secs: None,
            body: vec![agent_step("body")],
        });
        let cancel = CancellationToken::new();
        let (result, _) = exec.execute(&step, &ctx(), &cancel).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.output.unwrap()["iterations"], json!(0));
    }

    #[tokio::test]
    async fn test_quality_check_rewrites_low_score_output() {
        #[derive(Default)]
        struct ScoringAgent;
        impl AgentRuntime for ScoringAgent {
            async fn execute(
                &self,
                agent_type: &str,
                _role: Option<&str>,
                _prompt_override: Option<&str>,
                _input: &Value,
                _ctx: &AgentContext,
            ) -> Result<Value, TaskExecutorError> {
                if agent_type == "rewriter" {
                    Ok(json!({ "score": 95 }))
                } else {
                    Ok(json!({ "score": 40 }))
                }
            }
        }

        let exec = automated(ScoringAgent);
        let mut step = agent_step("s4");
        step.quality_check = Some(QualityCheckConfig {
            enabled: true,
            min_score: 80.0,
            retry_on_fail: true,
            rewrite_agent_type: Some("rewriter".to_string()),
            score_expression: "score".to_string(),
        });
        let cancel = CancellationToken::new();
        let (result, _) = exec.execute(&step, &ctx(), &cancel).await;
        assert_eq!(result.output.unwrap()["score"], json!(95));
    }
}
