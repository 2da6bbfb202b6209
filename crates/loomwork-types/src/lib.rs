//! Shared domain types for Loomwork.
//!
//! This crate contains the core domain types used across the Loomwork
//! workflow execution platform: the workflow definition and step model,
//! task and approval records, snapshots, lifecycle events, and the
//! process-wide `EngineConfig`.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;

pub use config::EngineConfig;
pub use error::RepositoryError;
pub use event::WorkflowEvent;
pub use workflow::*;
