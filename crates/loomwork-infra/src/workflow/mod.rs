//! Reference wiring for the "capability-set interfaces" the execution core
//! defines as external boundaries: `AgentRuntime`, `ToolHandler`, and
//! `Notifier`. None of these talk to a real LLM, tool registry, or delivery
//! backend -- they exist so the crate runs end to end without one, the same
//! way the teacher ships a `LoggingNotifier` in-core for tests.

pub mod agent_runtime;
pub mod notifier;
pub mod tool_handler;

pub use agent_runtime::EchoAgentRuntime;
pub use notifier::WebhookNotifier;
pub use tool_handler::EchoToolHandler;
