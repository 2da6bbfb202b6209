//! Approval Manager: human-approval gates, notification dispatch, and the
//! per-approval event bus.
//!
//! Generic over `ApprovalRepository` the same way the old `CheckpointManager`
//! was generic over `WorkflowRepository`. Notification delivery is itself
//! pluggable behind the `Notifier` trait so the infra layer can wire real
//! email/webhook/websocket backends without this module depending on them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use loomwork_types::error::RepositoryError;
use loomwork_types::workflow::{ApprovalRequest, ApprovalStatus, NewApprovalRequest};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::repository::approval::ApprovalRepository;
use crate::workflow::expression::WorkflowEvaluator;

/// Errors from approval-gate operations.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request {0} not found")]
    NotFound(Uuid),

    #[error("approval request {0} is not pending")]
    NotPending(Uuid),

    #[error("resend limit exceeded for tenant")]
    ResendLimitExceeded,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("expression error: {0}")]
    Expression(String),
}

/// Event published on an approval request's lifecycle.
#[derive(Debug, Clone)]
pub enum ApprovalEvent {
    Pending(ApprovalRequest),
    Resolved(ApprovalRequest),
}

/// Delivers one notification for one recipient on one channel.
///
/// Delivery failures are recorded against `NotificationAttempts` but never
/// block the approval transition.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        channel: &str,
        recipient: &str,
        request: &ApprovalRequest,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

/// A `Notifier` that only logs — used when no real delivery backend is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    async fn notify(&self, channel: &str, recipient: &str, request: &ApprovalRequest) -> Result<(), String> {
        tracing::info!(
            channel,
            recipient,
            approval_id = %request.id,
            step_id = %request.step_id,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Buffered, non-blocking event bus keyed by approval id.
///
/// Publishers never await a slow subscriber: sends use `try_send` and drop
/// on a full channel to preserve liveness.
#[derive(Debug, Clone, Default)]
pub struct ApprovalEventBus {
    subscribers: Arc<DashMap<Uuid, Vec<mpsc::Sender<ApprovalEvent>>>>,
}

/// Handle returned by `subscribe`; calling `cancel` deregisters the
/// listener and closes its channel.
pub struct Subscription {
    bus: Arc<DashMap<Uuid, Vec<mpsc::Sender<ApprovalEvent>>>>,
    id: Uuid,
    sender: mpsc::Sender<ApprovalEvent>,
}

impl Subscription {
    pub fn cancel(self) {
        if let Some(mut entry) = self.bus.get_mut(&self.id) {
            entry.retain(|s| !s.same_channel(&self.sender));
        }
    }
}

impl ApprovalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffered listener for `id`. Default buffer size 1.
    pub fn subscribe(&self, id: Uuid, buffer: usize) -> (mpsc::Receiver<ApprovalEvent>, Subscription) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.subscribers.entry(id).or_default().push(tx.clone());
        (
            rx,
            Subscription {
                bus: self.subscribers.clone(),
                id,
                sender: tx,
            },
        )
    }

    /// Publish an event to every live subscriber of `id`. A no-op if no
    /// subscriber remains (e.g. the last listener already cancelled).
    pub fn publish(&self, id: Uuid, event: ApprovalEvent) {
        if let Some(mut entry) = self.subscribers.get_mut(&id) {
            entry.retain(|sender| sender.try_send(event.clone()).is_ok() || !sender.is_closed());
        }
    }
}

/// Human-approval gate manager.
pub struct ApprovalManager<R: ApprovalRepository, N: Notifier = LoggingNotifier> {
    repository: R,
    notifier: N,
    pub event_bus: ApprovalEventBus,
    channel_fallback_order: Vec<String>,
    resend_limit_per_tenant: u32,
    resend_counts: DashMap<(Uuid, Uuid), u32>,
}

impl<R: ApprovalRepository, N: Notifier> ApprovalManager<R, N> {
    pub fn new(
        repository: R,
        notifier: N,
        channel_fallback_order: Vec<String>,
        resend_limit_per_tenant: u32,
    ) -> Self {
        Self {
            repository,
            notifier,
            event_bus: ApprovalEventBus::new(),
            channel_fallback_order,
            resend_limit_per_tenant,
            resend_counts: DashMap::new(),
        }
    }

    /// Stable channel order: explicitly requested channels first, then the
    /// configured fallback order, deduplicated.
    fn ordered_channels(&self, requested: &[String]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();
        for channel in requested.iter().chain(self.channel_fallback_order.iter()) {
            if seen.insert(channel.clone()) {
                ordered.push(channel.clone());
            }
        }
        ordered
    }

    async fn dispatch_notifications(&self, request: &ApprovalRequest) {
        let channels = self.ordered_channels(&request.notify_channels);
        let mut last_error = None;

        for channel in &channels {
            let Some(recipients) = request.notify_targets.get(channel) else {
                continue;
            };
            for recipient in recipients {
                if let Err(e) = self.notifier.notify(channel, recipient, request).await {
                    tracing::warn!(channel, recipient, error = %e, "notification delivery failed");
                    last_error = Some(e);
                }
            }
        }

        if let Err(e) = self
            .repository
            .record_notification_attempt(&request.id, last_error.as_deref())
            .await
        {
            tracing::warn!(error = %e, "failed to record notification attempt");
        }
    }

    /// `CreateRequest`: persist a pending request, publish the `pending`
    /// event, and dispatch notifications.
    pub async fn create_request(&self, input: NewApprovalRequest) -> Result<ApprovalRequest, ApprovalError> {
        let request = self.repository.create(input).await?;
        self.event_bus.publish(request.id, ApprovalEvent::Pending(request.clone()));
        self.dispatch_notifications(&request).await;
        Ok(request)
    }

    async fn resolve(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: Option<&str>,
        comment: Option<&str>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let current = self.repository.get(id).await?.ok_or(ApprovalError::NotFound(*id))?;
        if current.status.is_terminal() {
            return Err(ApprovalError::NotPending(*id));
        }
        let resolved = self.repository.resolve(id, status, approver, comment).await?;
        self.event_bus.publish(*id, ApprovalEvent::Resolved(resolved.clone()));
        Ok(resolved)
    }

    pub async fn approve(
        &self,
        id: &Uuid,
        approver: &str,
        comment: Option<&str>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.resolve(id, ApprovalStatus::Approved, Some(approver), comment).await
    }

    pub async fn reject(
        &self,
        id: &Uuid,
        approver: &str,
        comment: Option<&str>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.resolve(id, ApprovalStatus::Rejected, Some(approver), comment).await
    }

    /// Bulk-transition `pending` rows whose `expires_at` has passed to `timeout`.
    pub async fn check_expired(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let expired = self.repository.list_expired().await?;
        let mut timed_out = Vec::with_capacity(expired.len());
        for request in expired {
            if Utc::now() < request.expires_at {
                continue;
            }
            match self.resolve(&request.id, ApprovalStatus::Timeout, None, None).await {
                Ok(resolved) => timed_out.push(resolved),
                Err(ApprovalError::NotPending(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(timed_out)
    }

    /// Re-fire notifications for an operator, gated by the per-tenant resend limit.
    pub async fn resend_notification(&self, tenant_id: Uuid, id: &Uuid) -> Result<(), ApprovalError> {
        let request = self.repository.get(id).await?.ok_or(ApprovalError::NotFound(*id))?;
        let key = (tenant_id, *id);
        let mut count = self.resend_counts.entry(key).or_insert(0);
        if *count >= self.resend_limit_per_tenant {
            return Err(ApprovalError::ResendLimitExceeded);
        }
        *count += 1;
        drop(count);
        self.dispatch_notifications(&request).await;
        Ok(())
    }

    /// `CheckAutoApproval`: evaluate `lhs op rhs` where either side may be a
    /// literal or a `{{path}}` reference resolved against `output`.
    pub fn check_auto_approval(&self, output: &Value, expression: &str) -> Result<bool, ApprovalError> {
        WorkflowEvaluator::new()
            .evaluate_bool(expression, output)
            .map_err(|e| ApprovalError::Expression(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryApprovalRepo {
        requests: Mutex<HashMap<Uuid, ApprovalRequest>>,
    }

    impl ApprovalRepository for InMemoryApprovalRepo {
        async fn create(&self, req: NewApprovalRequest) -> Result<ApprovalRequest, RepositoryError> {
            let id = Uuid::now_v7();
            let now = Utc::now();
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
            request.resolved_at = Some(Utc::now());
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
            Ok(self
                .requests
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.status == ApprovalStatus::Pending)
                .cloned()
                .collect())
        }

        async fn list_pending_for_execution(&self, execution_id: &Uuid) -> Result<Vec<ApprovalRequest>, RepositoryError> {
            Ok(self
                .requests
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.execution_id == *execution_id && r.status == ApprovalStatus::Pending)
                .cloned()
                .collect())
        }
    }

    fn manager() -> ApprovalManager<InMemoryApprovalRepo, LoggingNotifier> {
        ApprovalManager::new(
            InMemoryApprovalRepo::default(),
            LoggingNotifier,
            vec!["websocket".to_string(), "email".to_string()],
            3,
        )
    }

    fn sample_input() -> NewApprovalRequest {
        NewApprovalRequest {
            tenant_id: Uuid::now_v7(),
            execution_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            step_id: "s1".to_string(),
            approval_type: "manual".to_string(),
            requester: "system".to_string(),
            step_output: json!({"score": 80}),
            notify_channels: vec!["email".to_string()],
            notify_targets: HashMap::from([("email".to_string(), vec!["ops@example.com".to_string()])]),
            timeout_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_create_request_is_pending() {
        let mgr = manager();
        let req = mgr.create_request(sample_input()).await.unwrap();
        assert_eq!(req.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_approve_transitions_to_approved() {
        let mgr = manager();
        let req = mgr.create_request(sample_input()).await.unwrap();
        let resolved = mgr.approve(&req.id, "alice", Some("looks good")).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.approver.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_reject_transitions_to_rejected() {
        let mgr = manager();
        let req = mgr.create_request(sample_input()).await.unwrap();
        let resolved = mgr.reject(&req.id, "bob", None).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_double_resolve_errors_not_pending() {
        let mgr = manager();
        let req = mgr.create_request(sample_input()).await.unwrap();
        mgr.approve(&req.id, "alice", None).await.unwrap();
        let err = mgr.reject(&req.id, "bob", None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotPending(_)));
    }

    #[tokio::test]
    async fn test_check_auto_approval_true() {
        let mgr = manager();
        let output = json!({"score": 95});
        assert!(mgr.check_auto_approval(&output, "score >= 90").unwrap());
    }

    #[tokio::test]
    async fn test_check_auto_approval_false() {
        let mgr = manager();
        let output = json!({"score": 80});
        assert!(!mgr.check_auto_approval(&output, "score >= 90").unwrap());
    }

    #[tokio::test]
    async fn test_resend_limit_enforced() {
        let mgr = manager();
        let req = mgr.create_request(sample_input()).await.unwrap();
        let tenant = req.tenant_id;
        for _ in 0..3 {
            mgr.resend_notification(tenant, &req.id).await.unwrap();
        }
        let err = mgr.resend_notification(tenant, &req.id).await.unwrap_err();
        assert!(matches!(err, ApprovalError::ResendLimitExceeded));
    }

    #[tokio::test]
    async fn test_event_bus_delivers_pending_and_resolved() {
        let mgr = manager();
        let input = sample_input();
        // Subscribe before creating so we catch the Pending event too --
        // the real id isn't known until repo.create() returns, so subscribe
        // against the bus directly once we have the request id instead.
        let req = mgr.create_request(input).await.unwrap();
        let (mut rx, sub) = mgr.event_bus.subscribe(req.id, 4);
        mgr.approve(&req.id, "alice", None).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ApprovalEvent::Resolved(_)));
        sub.cancel();
    }

    #[tokio::test]
    async fn test_cancel_deregisters_and_closes_channel() {
        let bus = ApprovalEventBus::new();
        let id = Uuid::now_v7();
        let (mut rx, sub) = bus.subscribe(id, 4);
        assert_eq!(bus.subscribers.get(&id).unwrap().len(), 1);
        sub.cancel();
        assert_eq!(bus.subscribers.get(&id).map(|e| e.len()).unwrap_or(0), 0);
        assert!(rx.recv().await.is_none());
    }
}
