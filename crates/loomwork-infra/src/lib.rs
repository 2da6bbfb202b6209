//! Infrastructure layer for Loomwork.
//!
//! Contains the reference implementations of the trait boundaries defined in
//! `loomwork-core`: SQLite persistence for definitions/executions/approvals/
//! snapshots, and a reference `AgentRuntime`/`ToolHandler`/`Notifier` wiring
//! so the crate runs end to end without a real LLM/tool backend.

pub mod config;
pub mod sqlite;
pub mod workflow;
