//! Reference `ToolHandler`.
//!
//! The built-in tool catalog is out of this crate's scope (see DESIGN.md);
//! this implementation logs and echoes so `Tool` steps still dispatch
//! somewhere concrete. A deployment wires its own tool registry against the
//! same trait.

use serde_json::{json, Value};

use loomwork_core::workflow::step_runner::{AgentContext, TaskExecutorError, ToolHandler};

/// Echoes the rendered input back as output, tagged with the tool name.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoToolHandler;

impl ToolHandler for EchoToolHandler {
    async fn execute(&self, tool_name: &str, input: &Value, ctx: &AgentContext) -> Result<Value, TaskExecutorError> {
        tracing::debug!(
            tool_name,
            step_id = %ctx.step_id,
            execution_id = %ctx.execution_id,
            "dispatching tool step to reference handler"
        );

        Ok(json!({
            "tool_name": tool_name,
            "input": input,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn echoes_tool_name_and_input() {
        let handler = EchoToolHandler;
        let ctx = AgentContext {
            execution_id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            step_id: "s1".to_string(),
            data_snapshot: HashMap::new(),
        };
        let input = json!({"query": "weather"});
        let output = handler.execute("web_search", &input, &ctx).await.unwrap();
        assert_eq!(output["tool_name"], json!("web_search"));
        assert_eq!(output["input"], input);
    }
}
