//! Durable state snapshot store enabling resumption across process restarts.
//!
//! A `WorkflowSnapshot` is the unit of durable state for one execution: the
//! Automated Task Executor's paused steps, the pending approval ids blocking
//! it, and enough metadata (`workflow_id`, `tenant_id`, `user_id`, `input`)
//! to rebuild an `ExecutionContext` on resume. Conceptually keyed by
//! `workflow:state:<execution_id>` with a 24h TTL; the in-memory
//! implementation here ignores TTL expiry (see
//! `loomwork-infra::sqlite::snapshot` for the TTL-backed SQLite store).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use loomwork_types::workflow::{PersistedStep, SnapshotStatus, WorkflowSnapshot};
use serde_json::Value;
use uuid::Uuid;

/// Errors from snapshot store operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("no snapshot for execution {0}")]
    NotFound(Uuid),

    #[error("snapshot backend error: {0}")]
    Backend(String),
}

/// A structured, idempotent modification applied to one snapshot.
///
/// Mirrors the patch keys of the spec: scalar overwrites for
/// `current_step`/`current_round`/`status`, map inserts/merges for step
/// results, list mutation (with status side effects) for approvals, and a
/// shallow merge for metadata. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPatch {
    pub current_step: Option<Option<String>>,
    pub current_round: Option<u32>,
    pub status: Option<SnapshotStatus>,
    pub step_result: Option<(String, PersistedStep)>,
    pub step_results: Option<HashMap<String, PersistedStep>>,
    pub add_approval: Option<Uuid>,
    pub remove_approval: Option<Uuid>,
    pub metadata: Option<HashMap<String, Value>>,
}

impl SnapshotPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_step(mut self, step_id: Option<String>) -> Self {
        self.current_step = Some(step_id);
        self
    }

    pub fn current_round(mut self, round: u32) -> Self {
        self.current_round = Some(round);
        self
    }

    pub fn status(mut self, status: SnapshotStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn step_result(mut self, step_id: impl Into<String>, result: PersistedStep) -> Self {
        self.step_result = Some((step_id.into(), result));
        self
    }

    pub fn step_results(mut self, results: HashMap<String, PersistedStep>) -> Self {
        self.step_results = Some(results);
        self
    }

    pub fn add_approval(mut self, id: Uuid) -> Self {
        self.add_approval = Some(id);
        self
    }

    pub fn remove_approval(mut self, id: Uuid) -> Self {
        self.remove_approval = Some(id);
        self
    }

    pub fn metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Apply this patch to `snapshot` in place, stamping `updated_at`.
    pub fn apply(self, snapshot: &mut WorkflowSnapshot) {
        if let Some(step) = self.current_step {
            snapshot.current_step = step;
        }
        if let Some(round) = self.current_round {
            snapshot.current_round = round;
        }
        if let Some(status) = self.status {
            snapshot.status = status;
        }
        if let Some((step_id, result)) = self.step_result {
            snapshot.steps.insert(step_id, result);
        }
        if let Some(results) = self.step_results {
            snapshot.steps.extend(results);
        }
        if let Some(id) = self.add_approval {
            if !snapshot.pending_approvals.contains(&id) {
                snapshot.pending_approvals.push(id);
            }
            snapshot.status = SnapshotStatus::Paused;
        }
        if let Some(id) = self.remove_approval {
            snapshot.pending_approvals.retain(|existing| *existing != id);
            if snapshot.pending_approvals.is_empty() {
                snapshot.status = SnapshotStatus::Running;
            }
        }
        if let Some(metadata) = self.metadata {
            snapshot.metadata.extend(metadata);
        }
        snapshot.updated_at = chrono::Utc::now();
    }
}

/// Returns `Some(reason)` when the execution represented by `snapshot`
/// should not be scheduled further.
pub fn should_stop(snapshot: &WorkflowSnapshot) -> Option<&'static str> {
    if snapshot.status == SnapshotStatus::Paused {
        return Some("paused");
    }
    if snapshot.max_rounds > 0 && snapshot.current_round >= snapshot.max_rounds {
        return Some("max rounds reached");
    }
    None
}

/// Storage interface for durable per-execution state.
///
/// Implemented in-memory here (used by tests and single-process
/// deployments) and backed by SQLite with a TTL reaper in
/// `loomwork-infra::sqlite::snapshot`.
pub trait SnapshotStore: Send + Sync {
    /// Persist `snapshot` verbatim, stamping `updated_at`.
    fn save(
        &self,
        snapshot: &WorkflowSnapshot,
    ) -> impl std::future::Future<Output = Result<(), SnapshotError>> + Send;

    /// Fetch a snapshot. Never fails on miss: returns a fresh `running`
    /// state seeded with `execution_id`.
    fn get(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<WorkflowSnapshot, SnapshotError>> + Send;

    /// Fetch a snapshot, failing with `NotFound` on miss. Used by `Resume`,
    /// which must not silently invent state for an unknown execution.
    fn must_get(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<WorkflowSnapshot, SnapshotError>> + Send;

    /// Read-modify-write the snapshot for `execution_id` with `patch`,
    /// creating a fresh running snapshot first if none exists.
    fn update(
        &self,
        execution_id: &Uuid,
        mode: &str,
        patch: SnapshotPatch,
    ) -> impl std::future::Future<Output = Result<WorkflowSnapshot, SnapshotError>> + Send;

    /// Remove the snapshot for `execution_id`, if any.
    fn delete(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), SnapshotError>> + Send;
}

/// In-memory `SnapshotStore` backed by a `DashMap`, matching the
/// concurrency pattern used by `ExecutionContext`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    inner: Arc<DashMap<Uuid, WorkflowSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &WorkflowSnapshot) -> Result<(), SnapshotError> {
        self.inner.insert(snapshot.execution_id, snapshot.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &Uuid) -> Result<WorkflowSnapshot, SnapshotError> {
        Ok(self
            .inner
            .get(execution_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| WorkflowSnapshot::new_running(*execution_id, "automated")))
    }

    async fn must_get(&self, execution_id: &Uuid) -> Result<WorkflowSnapshot, SnapshotError> {
        self.inner
            .get(execution_id)
            .map(|entry| entry.value().clone())
            .ok_or(SnapshotError::NotFound(*execution_id))
    }

    async fn update(
        &self,
        execution_id: &Uuid,
        mode: &str,
        patch: SnapshotPatch,
    ) -> Result<WorkflowSnapshot, SnapshotError> {
        let mut snapshot = self
            .inner
            .get(execution_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| WorkflowSnapshot::new_running(*execution_id, mode));
        patch.apply(&mut snapshot);
        self.inner.insert(*execution_id, snapshot.clone());
        Ok(snapshot)
    }

    async fn delete(&self, execution_id: &Uuid) -> Result<(), SnapshotError> {
        self.inner.remove(execution_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_should_stop_paused() {
        let mut snap = WorkflowSnapshot::new_running(Uuid::now_v7(), "automated");
        snap.status = SnapshotStatus::Paused;
        assert_eq!(should_stop(&snap), Some("paused"));
    }

    #[test]
    fn test_should_stop_max_rounds() {
        let mut snap = WorkflowSnapshot::new_running(Uuid::now_v7(), "automated");
        snap.max_rounds = 3;
        snap.current_round = 3;
        assert_eq!(should_stop(&snap), Some("max rounds reached"));
    }

    #[test]
    fn test_should_stop_running_continues() {
        let snap = WorkflowSnapshot::new_running(Uuid::now_v7(), "automated");
        assert_eq!(should_stop(&snap), None);
    }

    #[tokio::test]
    async fn test_get_on_miss_returns_fresh_running_state() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::now_v7();
        let snap = store.get(&id).await.unwrap();
        assert_eq!(snap.execution_id, id);
        assert_eq!(snap.status, SnapshotStatus::Running);
    }

    #[tokio::test]
    async fn test_must_get_on_miss_errors() {
        let store = InMemorySnapshotStore::new();
        let err = store.must_get(&Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_save_then_get_round_trips() {
        let store = InMemorySnapshotStore::new();
        let snap = WorkflowSnapshot::new_running(Uuid::now_v7(), "automated");
        store.save(&snap).await.unwrap();
        let loaded = store.must_get(&snap.execution_id).await.unwrap();
        assert_eq!(loaded.execution_id, snap.execution_id);
    }

    #[tokio::test]
    async fn test_update_scalar_overwrite() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::now_v7();
        let patch = SnapshotPatch::new().current_step(Some("s1".to_string())).current_round(2);
        let snap = store.update(&id, "automated", patch).await.unwrap();
        assert_eq!(snap.current_step.as_deref(), Some("s1"));
        assert_eq!(snap.current_round, 2);
    }

    #[tokio::test]
    async fn test_update_step_result_inserts() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::now_v7();
        let result = PersistedStep {
            status: loomwork_types::workflow::TaskStatus::Success,
            output: json!("done"),
            metadata: HashMap::new(),
        };
        let patch = SnapshotPatch::new().step_result("s1", result);
        let snap = store.update(&id, "automated", patch).await.unwrap();
        assert_eq!(snap.steps["s1"].output, json!("done"));
    }

    #[tokio::test]
    async fn test_add_approval_sets_paused() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::now_v7();
        let approval_id = Uuid::now_v7();
        let patch = SnapshotPatch::new().add_approval(approval_id);
        let snap = store.update(&id, "automated", patch).await.unwrap();
        assert_eq!(snap.status, SnapshotStatus::Paused);
        assert!(snap.pending_approvals.contains(&approval_id));
    }

    #[tokio::test]
    async fn test_remove_last_approval_resets_to_running() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::now_v7();
        let approval_id = Uuid::now_v7();
        store
            .update(&id, "automated", SnapshotPatch::new().add_approval(approval_id))
            .await
            .unwrap();
        let snap = store
            .update(&id, "automated", SnapshotPatch::new().remove_approval(approval_id))
            .await
            .unwrap();
        assert_eq!(snap.status, SnapshotStatus::Running);
        assert!(snap.pending_approvals.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_shallow_merge() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::now_v7();
        let mut m1 = HashMap::new();
        m1.insert("a".to_string(), json!(1));
        store.update(&id, "automated", SnapshotPatch::new().metadata(m1)).await.unwrap();
        let mut m2 = HashMap::new();
        m2.insert("b".to_string(), json!(2));
        let snap = store.update(&id, "automated", SnapshotPatch::new().metadata(m2)).await.unwrap();
        assert_eq!(snap.metadata["a"], json!(1));
        assert_eq!(snap.metadata["b"], json!(2));
    }

    #[tokio::test]
    async fn test_delete_removes_snapshot() {
        let store = InMemorySnapshotStore::new();
        let snap = WorkflowSnapshot::new_running(Uuid::now_v7(), "automated");
        store.save(&snap).await.unwrap();
        store.delete(&snap.execution_id).await.unwrap();
        assert!(store.must_get(&snap.execution_id).await.is_err());
    }
}
