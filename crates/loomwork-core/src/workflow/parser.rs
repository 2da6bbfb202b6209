//! Parser & DAG Builder: turns a raw `WorkflowDefinition` (nodes + edges)
//! into the internal `Vec<StepDefinition>` the Scheduler and Task Executor
//! operate on.
//!
//! Router (`NodeKind::Router`) nodes become `StepKind::Condition` steps whose
//! `on_true`/`on_false` branches are read off the outgoing edges carrying a
//! `"true"`/`"false"` condition label. Loop bodies are read from the loop
//! node's own `config["body"]` array rather than from edges, since a loop
//! body is private to its owning node.

use loomwork_types::workflow::{
    ApprovalConfig, ConditionBlock, Edge, LoopConfig, Node, NodeKind, QualityCheckConfig,
    RetryPolicy, StepDefinition, StepKind, WorkflowDefinition,
};

use super::definition::WorkflowError;

/// Build the internal step list from a validated `WorkflowDefinition`.
///
/// Assumes `validate_definition` has already run (exactly one start node,
/// all edges reference existing nodes). `Start`/`End` nodes do not become
/// steps; dependency edges originating at the start node are dropped since
/// every step they gate has no real upstream work to wait on.
pub fn build_steps(def: &WorkflowDefinition) -> Result<Vec<StepDefinition>, WorkflowError> {
    let start_id = def
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Start)
        .map(|n| n.id.clone())
        .ok_or_else(|| WorkflowError::ValidationError("missing start node".to_string()))?;

    let mut steps = Vec::with_capacity(def.nodes.len());
    for node in &def.nodes {
        if matches!(node.kind, NodeKind::Start | NodeKind::End) {
            continue;
        }
        steps.push(node_to_step(node, &def.edges, &start_id)?);
    }
    Ok(steps)
}

fn node_to_step(
    node: &Node,
    edges: &[Edge],
    start_id: &str,
) -> Result<StepDefinition, WorkflowError> {
    let depends_on: Vec<String> = edges
        .iter()
        .filter(|e| e.target == node.id && e.source != start_id)
        .map(|e| e.source.clone())
        .collect();

    let kind = match node.kind {
        NodeKind::Agent => StepKind::Agent,
        NodeKind::Tool => StepKind::Tool,
        NodeKind::Router => StepKind::Condition,
        NodeKind::Approval => StepKind::Approval,
        NodeKind::Loop => StepKind::Loop,
        NodeKind::Start | NodeKind::End => unreachable!("filtered out by caller"),
    };

    let config = &node.config;
    let agent_type = get_str(config, "agent_type");
    let role = get_str(config, "role");
    let prompt_override = get_str(config, "prompt_override");
    let output_var = get_str(config, "output_var");
    let parallel = config
        .get("parallel")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let timeout_secs = config.get("timeout_secs").and_then(|v| v.as_u64());

    let retry: Option<RetryPolicy> = config
        .get("retry")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| WorkflowError::ValidationError(format!("invalid retry policy: {e}")))?;

    let approval: Option<ApprovalConfig> = config
        .get("approval")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| WorkflowError::ValidationError(format!("invalid approval config: {e}")))?;

    let quality_check: Option<QualityCheckConfig> = config
        .get("quality_check")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| WorkflowError::ValidationError(format!("invalid quality_check config: {e}")))?;

    let agent_switch = config
        .get("agent_switch")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| WorkflowError::ValidationError(format!("invalid agent_switch policy: {e}")))?;

    let condition = if node.kind == NodeKind::Router {
        let expression = get_str(config, "expression").ok_or_else(|| {
            WorkflowError::ValidationError(format!(
                "router node '{}' is missing a config.expression",
                node.id
            ))
        })?;
        let on_true = edges
            .iter()
            .find(|e| e.source == node.id && e.condition.as_deref() == Some("true"))
            .map(|e| e.target.clone());
        let on_false = edges
            .iter()
            .find(|e| e.source == node.id && e.condition.as_deref() == Some("false"))
            .map(|e| e.target.clone());
        Some(ConditionBlock {
            expression,
            on_true,
            on_false,
        })
    } else {
        None
    };

    let loop_config = if node.kind == NodeKind::Loop {
        Some(parse_loop_config(node)?)
    } else {
        None
    };

    Ok(StepDefinition {
        id: node.id.clone(),
        name: node.name.clone().unwrap_or_else(|| node.id.clone()),
        kind,
        agent_type,
        role,
        prompt_override,
        input: node.inputs.clone(),
        output_var,
        depends_on,
        condition,
        retry,
        timeout_secs,
        parallel,
        approval,
        quality_check,
        loop_config,
        agent_switch,
    })
}

fn parse_loop_config(node: &Node) -> Result<LoopConfig, WorkflowError> {
    let loop_cfg_value = node.config.get("loop").cloned().ok_or_else(|| {
        WorkflowError::ValidationError(format!(
            "loop node '{}' is missing a config.loop block",
            node.id
        ))
    })?;

    let body_nodes: Vec<Node> = loop_cfg_value
        .get("body")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| WorkflowError::ValidationError(format!("invalid loop body: {e}")))?
        .unwrap_or_default();

    if body_nodes.iter().any(|n| n.kind == NodeKind::Loop) {
        return Err(WorkflowError::NestedLoopNotSupported(node.id.clone()));
    }

    let body_edges: Vec<Edge> = loop_cfg_value
        .get("body_edges")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| WorkflowError::ValidationError(format!("invalid loop body edges: {e}")))?
        .unwrap_or_default();

    let mut body = Vec::with_capacity(body_nodes.len());
    for body_node in &body_nodes {
        body.push(node_to_step(body_node, &body_edges, "")?);
    }

    let loop_type = serde_json::from_value(loop_cfg_value.clone())
        .map_err(|e| WorkflowError::ValidationError(format!("invalid loop_type: {e}")))?;

    Ok(LoopConfig {
        loop_type,
        break_condition: loop_cfg_value
            .get("break_condition")
            .and_then(|v| v.as_str())
            .map(String::from),
        continue_on_error: loop_cfg_value
            .get("continue_on_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        delay_between_iterations_secs: loop_cfg_value
            .get("delay_between_iterations_secs")
            .and_then(|v| v.as_u64()),
        body,
    })
}

fn get_str(config: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loomwork_types::workflow::WorkflowVisibility;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn node(id: &str, kind: NodeKind, config: serde_json::Map<String, serde_json::Value>) -> Node {
        Node {
            id: id.to_string(),
            kind,
            name: None,
            ui: None,
            config,
            inputs: HashMap::new(),
        }
    }

    fn wf(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "test-wf".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            visibility: WorkflowVisibility::Private,
            nodes,
            edges,
            max_concurrency: None,
            automation: None,
            soft_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_steps_drops_start_end_and_start_edges() {
        let def = wf(
            vec![
                node("start", NodeKind::Start, serde_json::Map::new()),
                node("gather", NodeKind::Agent, serde_json::Map::new()),
                node("end", NodeKind::End, serde_json::Map::new()),
            ],
            vec![
                Edge {
                    source: "start".to_string(),
                    target: "gather".to_string(),
                    condition: None,
                },
                Edge {
                    source: "gather".to_string(),
                    target: "end".to_string(),
                    condition: None,
                },
            ],
        );
        let steps = build_steps(&def).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, "gather");
        assert!(steps[0].depends_on.is_empty());
    }

    #[test]
    fn test_build_steps_depends_on_from_edges() {
        let def = wf(
            vec![
                node("start", NodeKind::Start, serde_json::Map::new()),
                node("a", NodeKind::Agent, serde_json::Map::new()),
                node("b", NodeKind::Agent, serde_json::Map::new()),
            ],
            vec![
                Edge {
                    source: "start".to_string(),
                    target: "a".to_string(),
                    condition: None,
                },
                Edge {
                    source: "a".to_string(),
                    target: "b".to_string(),
                    condition: None,
                },
            ],
        );
        let steps = build_steps(&def).unwrap();
        let b = steps.iter().find(|s| s.id == "b").unwrap();
        assert_eq!(b.depends_on, vec!["a".to_string()]);
    }

    #[test]
    fn test_router_node_condition_branches() {
        let mut config = serde_json::Map::new();
        config.insert("expression".to_string(), json!("a.output.ok == true"));
        let def = wf(
            vec![
                node("start", NodeKind::Start, serde_json::Map::new()),
                node("route", NodeKind::Router, config),
                node("yes", NodeKind::Agent, serde_json::Map::new()),
                node("no", NodeKind::Agent, serde_json::Map::new()),
            ],
            vec![
                Edge {
                    source: "start".to_string(),
                    target: "route".to_string(),
                    condition: None,
                },
                Edge {
                    source: "route".to_string(),
                    target: "yes".to_string(),
                    condition: Some("true".to_string()),
                },
                Edge {
                    source: "route".to_string(),
                    target: "no".to_string(),
                    condition: Some("false".to_string()),
                },
            ],
        );
        let steps = build_steps(&def).unwrap();
        let route = steps.iter().find(|s| s.id == "route").unwrap();
        let cond = route.condition.as_ref().unwrap();
        assert_eq!(cond.expression, "a.output.ok == true");
        assert_eq!(cond.on_true.as_deref(), Some("yes"));
        assert_eq!(cond.on_false.as_deref(), Some("no"));
    }

    #[test]
    fn test_router_node_missing_expression_is_error() {
        let def = wf(
            vec![
                node("start", NodeKind::Start, serde_json::Map::new()),
                node("route", NodeKind::Router, serde_json::Map::new()),
            ],
            vec![Edge {
                source: "start".to_string(),
                target: "route".to_string(),
                condition: None,
            }],
        );
        let err = build_steps(&def).unwrap_err();
        assert!(err.to_string().contains("config.expression"));
    }

    #[test]
    fn test_loop_node_parses_body_and_rejects_nesting() {
        let mut loop_cfg = serde_json::Map::new();
        loop_cfg.insert("loop_type".to_string(), json!("count"));
        loop_cfg.insert("max_iterations".to_string(), json!(3));
        loop_cfg.insert(
            "body".to_string(),
            json!([{ "id": "inner", "kind": "agent" }]),
        );
        let mut config = serde_json::Map::new();
        config.insert("loop".to_string(), serde_json::Value::Object(loop_cfg));

        let def = wf(
            vec![
                node("start", NodeKind::Start, serde_json::Map::new()),
                node("loop", NodeKind::Loop, config),
            ],
            vec![Edge {
                source: "start".to_string(),
                target: "loop".to_string(),
                condition: None,
            }],
        );
        let steps = build_steps(&def).unwrap();
        let loop_step = steps.iter().find(|s| s.id == "loop").unwrap();
        let loop_config = loop_step.loop_config.as_ref().unwrap();
        assert_eq!(loop_config.body.len(), 1);
        assert_eq!(loop_config.body[0].id, "inner");
    }

    #[test]
    fn test_nested_loop_body_rejected() {
        let mut loop_cfg = serde_json::Map::new();
        loop_cfg.insert("loop_type".to_string(), json!("count"));
        loop_cfg.insert("max_iterations".to_string(), json!(3));
        loop_cfg.insert(
            "body".to_string(),
            json!([{ "id": "inner", "kind": "loop" }]),
        );
        let mut config = serde_json::Map::new();
        config.insert("loop".to_string(), serde_json::Value::Object(loop_cfg));

        let def = wf(
            vec![
                node("start", NodeKind::Start, serde_json::Map::new()),
                node("loop", NodeKind::Loop, config),
            ],
            vec![Edge {
                source: "start".to_string(),
                target: "loop".to_string(),
                condition: None,
            }],
        );
        let err = build_steps(&def).unwrap_err();
        assert!(matches!(err, WorkflowError::NestedLoopNotSupported(_)));
    }
}
