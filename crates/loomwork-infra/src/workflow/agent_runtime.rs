//! Reference `AgentRuntime`.
//!
//! Ships no LLM client: it logs the invocation and echoes the rendered
//! input back as the step's output, tagged with the requested agent type.
//! A deployment wires a real implementation (calling out to whatever agent
//! process or LLM API it runs) against the same trait; this one exists so
//! the engine runs end to end in tests and local experimentation.

use serde_json::{json, Value};

use loomwork_core::workflow::step_runner::{AgentContext, AgentRuntime, TaskExecutorError};

/// Echoes the rendered input back as output, tagged with the agent type.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAgentRuntime;

impl AgentRuntime for EchoAgentRuntime {
    async fn execute(
        &self,
        agent_type: &str,
        role: Option<&str>,
        prompt_override: Option<&str>,
        input: &Value,
        ctx: &AgentContext,
    ) -> Result<Value, TaskExecutorError> {
        tracing::debug!(
            agent_type,
            role,
            step_id = %ctx.step_id,
            execution_id = %ctx.execution_id,
            "dispatching agent step to reference runtime"
        );

        Ok(json!({
            "agent_type": agent_type,
            "role": role,
            "prompt_override": prompt_override,
            "input": input,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn ctx() -> AgentContext {
        AgentContext {
            execution_id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            step_id: "s1".to_string(),
            data_snapshot: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn echoes_agent_type_and_input() {
        let runtime = EchoAgentRuntime;
        let input = json!({"topic": "rust"});
        let output = runtime.execute("researcher", Some("lead"), None, &input, &ctx()).await.unwrap();
        assert_eq!(output["agent_type"], json!("researcher"));
        assert_eq!(output["input"], input);
    }
}
