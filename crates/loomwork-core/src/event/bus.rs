//! Broadcast event bus for distributing `WorkflowEvent`s to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op.

use loomwork_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Multi-consumer event bus for workflow lifecycle events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    ///
    /// A capacity of 1024 is recommended for typical workflow fan-out.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    /// Access the underlying broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<WorkflowEvent> {
        &self.sender
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
