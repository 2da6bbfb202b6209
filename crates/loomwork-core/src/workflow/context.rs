//! Execution context: the concurrent state store that flows through a
//! workflow run.
//!
//! `ExecutionContext` holds step outputs, ad-hoc variables, and trigger
//! input behind `DashMap`s so that steps within the same parallel wave can
//! read/write without a shared lock. Step outputs are always stored under
//! the canonical `"{step_id}.output"` key produced by
//! `StepDefinition::output_key`, so expression and template lookups never
//! need to special-case step results.

use std::collections::HashMap;

use dashmap::DashMap;
use loomwork_types::workflow::StepDefinition;
use serde_json::{json, Value};
use uuid::Uuid;

use super::definition::WorkflowError;

/// Maximum size of a single stored value (1 MB), serialized.
pub const MAX_VALUE_SIZE: usize = 1_048_576;

/// Maximum total size of all context data (10 MB), serialized.
pub const MAX_CONTEXT_SIZE: usize = 10_485_760;

/// Concurrent execution-scoped state for a single workflow run.
///
/// Cheap to `Arc`-wrap and share across the Scheduler's worker tasks: every
/// accessor takes `&self`, and `DashMap` handles the fine-grained locking
/// internally.
#[derive(Debug)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub trace_id: String,
    pub workflow_name: String,
    data: DashMap<String, Value>,
    metadata: DashMap<String, Value>,
    trigger_payload: Value,
}

impl ExecutionContext {
    pub fn new(
        execution_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        trace_id: impl Into<String>,
        workflow_name: String,
        trigger_payload: Option<Value>,
    ) -> Self {
        Self {
            execution_id,
            tenant_id,
            user_id,
            trace_id: trace_id.into(),
            workflow_name,
            data: DashMap::new(),
            metadata: DashMap::new(),
            trigger_payload: trigger_payload.unwrap_or(json!({})),
        }
    }

    /// Store an arbitrary value under `key`, enforcing per-value and
    /// total-context size limits.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), WorkflowError> {
        let key = key.into();
        let serialized_len = serde_json::to_string(&value)
            .map_err(|e| WorkflowError::ExecutionError(e.to_string()))?
            .len();

        if serialized_len > MAX_VALUE_SIZE {
            tracing::warn!(key, size = serialized_len, max = MAX_VALUE_SIZE, "value exceeds size limit, truncating");
            let truncated = json!({
                "_truncated": true,
                "_original_size": serialized_len,
                "_message": format!("value exceeded {MAX_VALUE_SIZE} byte limit and was truncated"),
            });
            self.data.insert(key, truncated);
        } else {
            self.data.insert(key, value);
        }

        let total = self.total_size();
        if total > MAX_CONTEXT_SIZE {
            return Err(WorkflowError::ExecutionError(format!(
                "total context size ({total} bytes) exceeds maximum ({MAX_CONTEXT_SIZE} bytes)"
            )));
        }
        Ok(())
    }

    /// Read a value previously stored with `set` or `set_step_output`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.clone())
    }

    /// Store a completed step's output under its canonical `"{id}.output"` key.
    pub fn set_step_output(&self, step: &StepDefinition, output: Value) -> Result<(), WorkflowError> {
        self.set(step.output_key(), output)
    }

    /// Read a step's output by step ID (not its output key).
    pub fn get_step_output(&self, step_id: &str) -> Option<Value> {
        self.get(&format!("{step_id}.output"))
    }

    /// Snapshot-copy all data currently held, for persistence or debugging.
    pub fn get_all_data(&self) -> HashMap<String, Value> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Replace the full data map, e.g. when resuming from a snapshot.
    pub fn restore_data(&self, data: HashMap<String, Value>) {
        self.data.clear();
        for (k, v) in data {
            self.data.insert(k, v);
        }
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.get(key).map(|v| v.clone())
    }

    /// Total serialized size in bytes of all data entries (metadata and
    /// trigger payload excluded -- they're small and fixed per run).
    pub fn total_size(&self) -> usize {
        self.data
            .iter()
            .map(|entry| serde_json::to_string(entry.value()).map(|s| s.len()).unwrap_or(0))
            .sum()
    }

    /// Build a JSON object suitable for expression/template evaluation.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "steps": { "<step_id>": { "output": <value> }, ... },
    ///   "variables": { "<key>": <value>, ... },
    ///   "trigger": <trigger_payload>,
    ///   "workflow": { "name": "...", "execution_id": "..." }
    /// }
    /// ```
    ///
    /// Keys matching `"{id}.output"` populate `steps.<id>.output`; every
    /// other key is exposed verbatim under `variables`.
    pub fn to_expression_context(&self) -> Value {
        let mut steps = serde_json::Map::new();
        let mut variables = serde_json::Map::new();

        for entry in self.data.iter() {
            let key = entry.key();
            if let Some(step_id) = key.strip_suffix(".output") {
                steps.insert(step_id.to_string(), json!({ "output": entry.value().clone() }));
            } else {
                variables.insert(key.clone(), entry.value().clone());
            }
        }

        json!({
            "steps": steps,
            "variables": variables,
            "trigger": self.trigger_payload.clone(),
            "workflow": {
                "name": self.workflow_name,
                "execution_id": self.execution_id.to_string(),
                "tenant_id": self.tenant_id.to_string(),
                "user_id": self.user_id.to_string(),
                "trace_id": self.trace_id,
            }
        })
    }

    /// Build a bare-path scope: every stored key is reconstructed into a
    /// nested mapping by splitting on `.`, so `"s1.output"` resolves via the
    /// path `s1.output` and a plain key like `"score"` resolves via `score`
    /// -- no `steps.`/`variables.` qualifier required. Used for expressions
    /// the spec writes against bare paths (auto-approve predicates,
    /// quality-check scores).
    pub fn to_flat_scope(&self) -> Value {
        let mut root = serde_json::Map::new();
        for entry in self.data.iter() {
            insert_dotted(&mut root, entry.key(), entry.value().clone());
        }
        Value::Object(root)
    }
}

/// Insert `value` into `map` at the nested path produced by splitting `key`
/// on `.`, creating intermediate objects as needed.
fn insert_dotted(map: &mut serde_json::Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map.entry(head.to_string()).or_insert_with(|| json!({}));
            if !entry.is_object() {
                *entry = json!({});
            }
            let Value::Object(inner) = entry else { unreachable!() };
            insert_dotted(inner, rest, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loomwork_types::workflow::StepKind;
    use std::collections::HashMap as StdHashMap;

    fn step(id: &str) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            name: id.to_string(),
            kind: StepKind::Agent,
            agent_type: Some("test-agent".to_string()),
            role: None,
            prompt_override: None,
            input: StdHashMap::new(),
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

    fn test_ctx() -> ExecutionContext {
        ExecutionContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Uuid::now_v7(),
            "trace-1",
            "test-workflow".to_string(),
            Some(json!({ "source": "github" })),
        )
    }

    #[test]
    fn test_set_and_get_step_output() {
        let ctx = test_ctx();
        ctx.set_step_output(&step("gather"), json!("news")).unwrap();
        assert_eq!(ctx.get_step_output("gather"), Some(json!("news")));
        assert_eq!(ctx.get_step_output("missing"), None);
    }

    #[test]
    fn test_set_and_get_arbitrary_key() {
        let ctx = test_ctx();
        ctx.set("count", json!(3)).unwrap();
        assert_eq!(ctx.get("count"), Some(json!(3)));
    }

    #[test]
    fn test_get_all_data_is_a_snapshot_copy() {
        let ctx = test_ctx();
        ctx.set_step_output(&step("a"), json!(1)).unwrap();
        ctx.set("x", json!(2)).unwrap();
        let snapshot = ctx.get_all_data();
        assert_eq!(snapshot.get("a.output"), Some(&json!(1)));
        assert_eq!(snapshot.get("x"), Some(&json!(2)));

        ctx.set("y", json!(3)).unwrap();
        assert!(!snapshot.contains_key("y"), "snapshot must not see later writes");
    }

    #[test]
    fn test_restore_data_replaces_contents() {
        let ctx = test_ctx();
        ctx.set("stale", json!(true)).unwrap();
        let mut fresh = HashMap::new();
        fresh.insert("a.output".to_string(), json!("restored"));
        ctx.restore_data(fresh);
        assert_eq!(ctx.get("stale"), None);
        assert_eq!(ctx.get_step_output("a"), Some(json!("restored")));
    }

    #[test]
    fn test_value_exceeding_size_limit_is_truncated() {
        let ctx = test_ctx();
        let large_string = "x".repeat(MAX_VALUE_SIZE + 100);
        ctx.set("big", json!(large_string)).unwrap();
        let stored = ctx.get("big").unwrap();
        assert_eq!(stored["_truncated"], json!(true));
    }

    #[test]
    fn test_metadata_is_separate_from_data() {
        let ctx = test_ctx();
        ctx.set_metadata("retry_count", json!(1));
        assert_eq!(ctx.get_metadata("retry_count"), Some(json!(1)));
        assert_eq!(ctx.get("retry_count"), None);
    }

    #[test]
    fn test_to_expression_context_splits_steps_and_variables() {
        let ctx = test_ctx();
        ctx.set_step_output(&step("gather"), json!("news")).unwrap();
        ctx.set("threshold", json!(5)).unwrap();

        let expr_ctx = ctx.to_expression_context();
        assert_eq!(expr_ctx["steps"]["gather"]["output"], json!("news"));
        assert_eq!(expr_ctx["variables"]["threshold"], json!(5));
        assert_eq!(expr_ctx["trigger"]["source"], json!("github"));
        assert_eq!(expr_ctx["workflow"]["name"], json!("test-workflow"));
    }

    #[test]
    fn test_to_flat_scope_resolves_bare_paths() {
        let ctx = test_ctx();
        ctx.set_step_output(&step("s1"), json!({ "score": 95 })).unwrap();
        ctx.set("score", json!(80)).unwrap();

        let scope = ctx.to_flat_scope();
        assert_eq!(scope["s1"]["output"]["score"], json!(95));
        assert_eq!(scope["score"], json!(80));
    }
}
