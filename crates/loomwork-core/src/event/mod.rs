//! Event bus for workflow lifecycle communication.
//!
//! Provides an `EventBus` that distributes `WorkflowEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
