//! Event types for the Loomwork execution event bus.
//!
//! `WorkflowEvent` is the unified event type broadcast during execution.
//! All variants are Clone + Send + Sync for use with tokio broadcast
//! channels; this is the hook an HTTP/websocket layer or notifier
//! subscribes to, kept separate from the approval-specific event bus in
//! `loomwork-core::workflow::approval` which is keyed per approval id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted during workflow execution.
///
/// Used by the event bus to communicate execution lifecycle to
/// subscribers (UI, logging, external notifiers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A new execution has started running.
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        tenant_id: Uuid,
    },

    /// A step has been dispatched to a Task Executor.
    StepStarted {
        execution_id: Uuid,
        step_id: String,
    },

    /// A step completed successfully.
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    /// A step failed (after exhausting retries).
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },

    /// A step returned `paused` (approval gate or suspension point).
    StepPaused {
        execution_id: Uuid,
        step_id: String,
    },

    /// The execution halted at a suspension point; a snapshot was written.
    ExecutionPaused {
        execution_id: Uuid,
        step_id: String,
    },

    /// The execution reached a terminal successful state.
    ExecutionCompleted {
        execution_id: Uuid,
        duration_ms: u64,
    },

    /// The execution reached a terminal failed state.
    ExecutionFailed { execution_id: Uuid, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_event_serde_roundtrip() {
        let event = WorkflowEvent::StepCompleted {
            execution_id: Uuid::now_v7(),
            step_id: "s1".to_string(),
            duration_ms: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step_completed\""));
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            WorkflowEvent::StepCompleted { step_id, duration_ms, .. } => {
                assert_eq!(step_id, "s1");
                assert_eq!(duration_ms, 42);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
