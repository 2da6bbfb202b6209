//! Approval repository trait definition.
//!
//! Defines the storage interface for human-approval gates. The Approval
//! Manager (`crate::workflow::approval`) is generic over this trait the
//! same way `CheckpointManager` used to be generic over `WorkflowRepository`.

use loomwork_types::error::RepositoryError;
use loomwork_types::workflow::{ApprovalRequest, ApprovalStatus, NewApprovalRequest};
use uuid::Uuid;

/// Repository trait for approval request persistence.
pub trait ApprovalRepository: Send + Sync {
    /// Create a new pending approval request.
    fn create(
        &self,
        req: NewApprovalRequest,
    ) -> impl std::future::Future<Output = Result<ApprovalRequest, RepositoryError>> + Send;

    /// Get an approval request by ID.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Transition a request to a terminal status, recording the approver and comment.
    fn resolve(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: Option<&str>,
        comment: Option<&str>,
    ) -> impl std::future::Future<Output = Result<ApprovalRequest, RepositoryError>> + Send;

    /// Increment `notification_attempts` and record the last dispatch error, if any.
    fn record_notification_attempt(
        &self,
        id: &Uuid,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all requests still `Pending` whose `expires_at` has passed.
    fn list_expired(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;

    /// List pending requests for an execution (used when resuming/inspecting state).
    fn list_pending_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;
}
