//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and the canonical `WorkflowDefinition` IR
//! (nodes + edges), and validates the structural constraints a definition
//! must satisfy before the Parser can turn it into `StepDefinition`s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use loomwork_types::workflow::{NodeKind, WorkflowDefinition};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur anywhere in the workflow execution core.
///
/// Shared across definition parsing, DAG building, and step dispatch so
/// callers one layer up (the Scheduler, the Engine) can match on a single
/// error shape regardless of which stage raised it.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dependency graph contains a cycle.
    #[error("cyclic dependency: {0}")]
    CycleDetected(String),

    /// A step references an unknown dependency.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// Expression or template evaluation error.
    #[error("expression error: {0}")]
    ExpressionError(String),

    /// Runtime execution failure.
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Step or workflow exceeded its timeout.
    #[error("timeout exceeded")]
    TimeoutError,

    /// Concurrency limit for this workflow was reached.
    #[error("concurrency limit reached")]
    ConcurrencyLimitReached,

    /// Loop step nesting is not supported.
    #[error("nested loop bodies are not supported: {0}")]
    NestedLoopNotSupported(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters and hyphens
/// - At least one node exists, and exactly one node has kind `Start`
/// - All node IDs are unique
/// - All edges reference existing node IDs
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(WorkflowError::ValidationError(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            def.name
        )));
    }

    if def.nodes.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one node".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for node in &def.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate node ID: '{}'",
                node.id
            )));
        }
    }

    let start_count = def
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Start)
        .count();
    if start_count != 1 {
        return Err(WorkflowError::ValidationError(format!(
            "workflow must have exactly one start node, found {}",
            start_count
        )));
    }

    for edge in &def.edges {
        if !seen_ids.contains(edge.source.as_str()) {
            return Err(WorkflowError::UnknownDependency(format!(
                "edge references unknown source node '{}'",
                edge.source
            )));
        }
        if !seen_ids.contains(edge.target.as_str()) {
            return Err(WorkflowError::UnknownDependency(format!(
                "edge references unknown target node '{}'",
                edge.target
            )));
        }
    }

    if let Some(c) = def.max_concurrency {
        if c < 1 {
            return Err(WorkflowError::ValidationError(
                "max_concurrency must be >= 1".to_string(),
            ));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively. Each file is parsed and
/// returned alongside its path. Files that fail to parse are silently
/// skipped (logged, but not returned as errors) since they may not be
/// workflow files at all.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    let entries = std::fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_workflow_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(_) => {
                        tracing::warn!(?path, "skipping unparseable workflow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
