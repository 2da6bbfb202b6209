//! Scheduler: dependency-counter dispatch of ready steps with bounded
//! concurrency.
//!
//! Unlike a wave-based executor, the `Scheduler` tracks each step's
//! unresolved-dependency count directly: a step becomes eligible to run the
//! instant its last dependency resolves, rather than waiting for an entire
//! depth level to finish. This matters once `paused`/`failed` enter the
//! picture -- a sibling branch unrelated to a paused or failed step should
//! keep making progress.
//!
//! Three terminal outcomes per step:
//! - `success`/`skipped` resolve the dependency for downstream steps.
//! - `failed`/`rejected` mark every transitively downstream step `skipped`
//!   (reason "upstream failure") without running them, and record the first
//!   error.
//! - `paused` resolves nothing; its downstream steps remain pending forever
//!   for this `schedule`/`resume` call, while already-dispatched siblings
//!   are left to finish.
//!
//! A `Condition` step additionally prunes the branch it did not select: the
//! `on_true`/`on_false` target it didn't choose (and everything transitively
//! behind it) is marked `skipped` with reason "condition branch not taken".

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use loomwork_types::workflow::{StepDefinition, TaskResult, TaskStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::checkpoint::SnapshotPatch;
use super::context::ExecutionContext;
use super::definition::WorkflowError;

/// Dispatches one step to completion, returning its `TaskResult` and an
/// optional `SnapshotPatch` (set when the step opened an approval gate).
///
/// Implemented by `TaskExecutor` (condition/agent/tool only; loop/approval
/// fail without automation) and by `AutomatedTaskExecutor` (all kinds).
pub trait StepDispatcher: Send + Sync {
    fn dispatch(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        cancellation: &CancellationToken,
    ) -> impl std::future::Future<Output = (TaskResult, Option<SnapshotPatch>)> + Send;
}

/// The outcome of a `schedule`/`resume` call: every step's `TaskResult`
/// (steps still blocked behind a `paused` dependency are simply absent),
/// the `SnapshotPatch`es collected along the way, and the first error seen.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    pub results: HashMap<String, TaskResult>,
    pub patches: Vec<SnapshotPatch>,
    pub error: Option<String>,
}

impl ScheduleOutcome {
    pub fn is_paused(&self) -> bool {
        self.results.values().any(|r| r.status == TaskStatus::Paused)
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some() && !self.is_paused()
    }
}

/// Default bound on concurrently-dispatched steps when a workflow sets no
/// `max_concurrency` override.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Dependency-counter scheduler. Stateless beyond its concurrency cap --
/// safe to share across executions.
pub struct Scheduler {
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run `steps` to completion (or until nothing further can be
    /// dispatched, e.g. because something paused) from a clean start.
    pub async fn schedule<D>(
        &self,
        steps: &[StepDefinition],
        ctx: &Arc<ExecutionContext>,
        dispatcher: &Arc<D>,
        cancellation: &CancellationToken,
    ) -> Result<ScheduleOutcome, WorkflowError>
    where
        D: StepDispatcher + 'static,
    {
        self.run(steps, ctx, dispatcher, cancellation, HashMap::new()).await
    }

    /// Continue a prior `schedule`/`resume` call: `prior` carries every step
    /// result already known (including the step that previously paused, now
    /// resolved by the caller to something other than `paused`).
    pub async fn resume<D>(
        &self,
        steps: &[StepDefinition],
        ctx: &Arc<ExecutionContext>,
        dispatcher: &Arc<D>,
        cancellation: &CancellationToken,
        prior: HashMap<String, TaskResult>,
    ) -> Result<ScheduleOutcome, WorkflowError>
    where
        D: StepDispatcher + 'static,
    {
        self.run(steps, ctx, dispatcher, cancellation, prior).await
    }

    async fn run<D>(
        &self,
        steps: &[StepDefinition],
        ctx: &Arc<ExecutionContext>,
        dispatcher: &Arc<D>,
        cancellation: &CancellationToken,
        mut results: HashMap<String, TaskResult>,
    ) -> Result<ScheduleOutcome, WorkflowError>
    where
        D: StepDispatcher + 'static,
    {
        super::dag::validate_dag(steps)?;

        let step_map: HashMap<String, StepDefinition> =
            steps.iter().map(|s| (s.id.clone(), s.clone())).collect();

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for s in steps {
            for dep in &s.depends_on {
                dependents.entry(dep.clone()).or_default().push(s.id.clone());
            }
        }

        let mut patches = Vec::new();
        let mut first_error: Option<String> = None;

        let is_ready = |id: &str, results: &HashMap<String, TaskResult>| -> bool {
            step_map[id]
                .depends_on
                .iter()
                .all(|d| results.get(d).is_some_and(|r| r.status.resolves_dependency()))
        };

        let mut ready: VecDeque<String> = steps
            .iter()
            .filter(|s| !results.contains_key(&s.id) && is_ready(&s.id, &results))
            .map(|s| s.id.clone())
            .collect();

        // `skip_subtree` cascades a skip through `dependents`, stopping at
        // anything already resolved (so a failure on one branch never
        // clobbers a sibling branch that already finished independently).
        fn skip_subtree(
            start: &str,
            dependents: &HashMap<String, Vec<String>>,
            results: &mut HashMap<String, TaskResult>,
            ready: &mut VecDeque<String>,
            reason: &str,
        ) {
            let mut queue = VecDeque::new();
            if let Some(children) = dependents.get(start) {
                queue.extend(children.iter().cloned());
            }
            while let Some(id) = queue.pop_front() {
                if results.contains_key(&id) {
                    continue;
                }
                results.insert(id.clone(), TaskResult::skipped(&id, reason));
                ready.retain(|r| r != &id);
                if let Some(children) = dependents.get(&id) {
                    queue.extend(children.iter().cloned());
                }
            }
        }

        let mut dispatched: HashSet<String> = HashSet::new();
        let mut join_set: JoinSet<(String, TaskResult, Option<SnapshotPatch>)> = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        loop {
            while let Some(id) = ready.pop_front() {
                if dispatched.contains(&id) || results.contains_key(&id) {
                    continue;
                }
                if cancellation.is_cancelled() {
                    // Leave it pending: a cancelled run simply stops making
                    // new progress, mirroring paused-halts-downstream.
                    continue;
                }
                dispatched.insert(id.clone());

                let step = step_map[&id].clone();
                let dispatcher = Arc::clone(dispatcher);
                let permit = Arc::clone(&semaphore);
                let token = cancellation.clone();
                let ctx = Arc::clone(ctx);

                join_set.spawn(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore closed");
                    let (result, patch) = dispatcher.dispatch(&step, &ctx, &token).await;
                    (step.id, result, patch)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (id, result, patch) = joined.map_err(|e| {
                WorkflowError::ExecutionError(format!("step task panicked: {e}"))
            })?;

            if let Some(p) = patch {
                patches.push(p);
            }

            if result.status.is_terminal_failure() && first_error.is_none() {
                first_error = Some(
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("step '{id}' failed", id = id)),
                );
            }

            let is_condition_branch = step_map
                .get(&id)
                .map(|s| s.condition.is_some())
                .unwrap_or(false);
            let branch_to_prune = if is_condition_branch && result.status == TaskStatus::Success {
                result
                    .output
                    .as_ref()
                    .and_then(|o| o.get("next_step"))
                    .and_then(|v| v.as_str())
                    .map(|taken| {
                        let block = step_map[&id].condition.as_ref().unwrap();
                        let other = if block.on_true.as_deref() == Some(taken) {
                            block.on_false.clone()
                        } else {
                            block.on_true.clone()
                        };
                        other
                    })
                    .flatten()
            } else {
                None
            };

            let is_failure = result.status.is_terminal_failure();
            let resolves = result.status.resolves_dependency();
            let success_output = if result.status == TaskStatus::Success {
                result.output.clone()
            } else {
                None
            };
            results.insert(id.clone(), result);

            // Output wiring: a successful step's output becomes visible to
            // downstream templates/expressions under `"{id}.output"`.
            if let Some(output) = success_output {
                if let Err(e) = ctx.set_step_output(&step_map[&id], output) {
                    tracing::warn!(step_id = %id, error = %e, "failed to write step output to execution context");
                }
            }

            if is_failure {
                skip_subtree(&id, &dependents, &mut results, &mut ready, "upstream failure");
            }
            if let Some(pruned) = branch_to_prune {
                if !results.contains_key(&pruned) {
                    results.insert(pruned.clone(), TaskResult::skipped(&pruned, "condition branch not taken"));
                }
                skip_subtree(&pruned, &dependents, &mut results, &mut ready, "condition branch not taken");
            }

            if resolves {
                if let Some(children) = dependents.get(&id) {
                    for child in children {
                        if !dispatched.contains(child)
                            && !results.contains_key(child)
                            && is_ready(child, &results)
                        {
                            ready.push_back(child.clone());
                        }
                    }
                }
            }
        }

        Ok(ScheduleOutcome {
            results,
            patches,
            error: first_error,
        })
    }
}
