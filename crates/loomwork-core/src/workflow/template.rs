//! Template Renderer: `{{ expression }}` interpolation for prompts, tool
//! inputs, and approval messages.
//!
//! Templates are parsed once into a sequence of literal/placeholder
//! segments and cached by source string, so a prompt referenced by every
//! iteration of a loop body is only tokenized once per process. Within a
//! placeholder, a dotted path resolves against the execution context the
//! same way `expression::WorkflowEvaluator` does; an optional pipeline of
//! `| function` calls post-processes the resolved value.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use super::context::ExecutionContext;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    #[error("empty placeholder")]
    EmptyPlaceholder,

    #[error("unknown template function: {0}")]
    UnknownFunction(String),

    #[error("function '{0}' requires an argument")]
    MissingArgument(String),
}

// ---------------------------------------------------------------------------
// Compiled template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder { path: Vec<String>, pipeline: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    segments: Arc<Vec<Segment>>,
}

impl CompiledTemplate {
    fn compile(src: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let bytes = src.as_bytes();
        let mut cursor = 0;

        while cursor < bytes.len() {
            match src[cursor..].find("{{") {
                None => {
                    segments.push(Segment::Literal(src[cursor..].to_string()));
                    break;
                }
                Some(rel_start) => {
                    let start = cursor + rel_start;
                    if start > cursor {
                        segments.push(Segment::Literal(src[cursor..start].to_string()));
                    }
                    let after_open = start + 2;
                    let rel_end = src[after_open..]
                        .find("}}")
                        .ok_or(TemplateError::Unterminated(start))?;
                    let end = after_open + rel_end;
                    let inner = src[after_open..end].trim();
                    if inner.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder);
                    }
                    let (path_str, pipeline) = split_pipeline(inner);
                    let path = path_str
                        .trim()
                        .split('.')
                        .map(|s| s.to_string())
                        .collect();
                    segments.push(Segment::Placeholder { path, pipeline });
                    cursor = end + 2;
                }
            }
        }

        Ok(Self {
            segments: Arc::new(segments),
        })
    }

    /// Render this template to a typed JSON value.
    ///
    /// A template consisting of exactly one unpiped `{{path}}` placeholder
    /// and no surrounding literal text preserves the resolved value's type
    /// (a number stays a number, a mapping stays a mapping); anything else
    /// -- literal text, multiple placeholders, or a piped placeholder --
    /// renders to a string, matching the "leaf strings rendered, non-string
    /// values passed through untyped" contract.
    pub fn render_typed(&self, root: &Value) -> Result<Value, TemplateError> {
        if let [Segment::Placeholder { path, pipeline }] = self.segments.as_slice() {
            if pipeline.is_empty() {
                return Ok(resolve_path(root, path));
            }
        }
        Ok(Value::String(self.render(root)?))
    }

    /// Render this compiled template against a raw JSON root context.
    pub fn render(&self, root: &Value) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in self.segments.iter() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { path, pipeline } => {
                    let mut value = resolve_path(root, path);
                    for func in pipeline {
                        value = apply_function(func, &value)?;
                    }
                    out.push_str(&value_to_display(&value));
                }
            }
        }
        Ok(out)
    }
}

fn split_pipeline(inner: &str) -> (&str, Vec<String>) {
    let mut parts = inner.split('|');
    let path = parts.next().unwrap_or("");
    let pipeline = parts.map(|p| p.trim().to_string()).collect();
    (path, pipeline)
}

fn resolve_path(root: &Value, path: &[String]) -> Value {
    let mut current = root;
    for segment in path {
        match current.get(segment) {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Function library
// ---------------------------------------------------------------------------

fn apply_function(spec: &str, value: &Value) -> Result<Value, TemplateError> {
    let (name, arg) = match spec.split_once(':') {
        Some((n, a)) => (n.trim(), Some(a.trim().trim_matches(|c| c == '\'' || c == '"'))),
        None => (spec.trim(), None),
    };

    Ok(match name {
        "upper" => Value::String(value_to_display(value).to_uppercase()),
        "lower" => Value::String(value_to_display(value).to_lowercase()),
        "trim" => Value::String(value_to_display(value).trim().to_string()),
        "title" => Value::String(to_title_case(&value_to_display(value))),
        "json" => Value::String(serde_json::to_string(value).unwrap_or_default()),
        "default" => {
            let fallback = arg.ok_or_else(|| TemplateError::MissingArgument("default".to_string()))?;
            if matches!(value, Value::Null) {
                Value::String(fallback.to_string())
            } else {
                value.clone()
            }
        }
        "join" => {
            let sep = arg.unwrap_or(",");
            match value {
                Value::Array(items) => {
                    Value::String(items.iter().map(value_to_display).collect::<Vec<_>>().join(sep))
                }
                other => other.clone(),
            }
        }
        "first" => match value {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        },
        "last" => match value {
            Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        },
        "isnil" => Value::Bool(matches!(value, Value::Null)),
        other => return Err(TemplateError::UnknownFunction(other.to_string())),
    })
}

fn to_title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Renderer with a compiled-template cache
// ---------------------------------------------------------------------------

/// Renders `{{ ... }}` templates against an `ExecutionContext`, caching the
/// parsed form of each distinct template string for the lifetime of the
/// renderer (one per engine instance).
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    cache: DashMap<String, CompiledTemplate>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    fn compiled(&self, template: &str) -> Result<CompiledTemplate, TemplateError> {
        if let Some(cached) = self.cache.get(template) {
            return Ok(cached.clone());
        }
        let compiled = CompiledTemplate::compile(template)?;
        self.cache.insert(template.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Render a template string against an arbitrary JSON root context.
    pub fn render_value(&self, template: &str, root: &Value) -> Result<String, TemplateError> {
        self.compiled(template)?.render(root)
    }

    /// Render a template string against an `ExecutionContext`.
    pub fn render(&self, template: &str, ctx: &ExecutionContext) -> Result<String, TemplateError> {
        self.render_value(template, &ctx.to_expression_context())
    }

    /// Render a JSON value, recursing into mappings and sequences and
    /// rendering leaf strings against `root`; non-string leaves (numbers,
    /// bools, null) pass through untouched.
    pub fn render_json(&self, value: &Value, root: &Value) -> Result<Value, TemplateError> {
        Ok(match value {
            Value::String(s) => self.compiled(s)?.render_typed(root)?,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_json(v, root))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_json(v, root)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    /// Render a step's `input` map (template strings keyed by variable name)
    /// against an `ExecutionContext`, producing the effective input.
    pub fn render_input_map(
        &self,
        inputs: &std::collections::HashMap<String, String>,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Map<String, Value>, TemplateError> {
        let root = ctx.to_expression_context();
        let mut out = serde_json::Map::with_capacity(inputs.len());
        for (key, template) in inputs {
            out.insert(key.clone(), self.compiled(template)?.render_typed(&root)?);
        }
        Ok(out)
    }

    /// Drop every cached compiled template. Safe to call concurrently with
    /// in-flight renders; a render racing the clear simply recompiles.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "steps": { "gather": { "output": { "title": "hello world", "tags": ["a", "b", "c"] } } },
            "variables": { "name": null },
        })
    }

    #[test]
    fn test_literal_passthrough() {
        let r = TemplateRenderer::new();
        assert_eq!(r.render_value("no placeholders here", &ctx()).unwrap(), "no placeholders here");
    }

    #[test]
    fn test_simple_path_interpolation() {
        let r = TemplateRenderer::new();
        let out = r.render_value("Title: {{ steps.gather.output.title }}", &ctx()).unwrap();
        assert_eq!(out, "Title: hello world");
    }

    #[test]
    fn test_multiple_placeholders() {
        let r = TemplateRenderer::new();
        let out = r
            .render_value(
                "{{ steps.gather.output.title }} / {{ steps.gather.output.title | upper }}",
                &ctx(),
            )
            .unwrap();
        assert_eq!(out, "hello world / HELLO WORLD");
    }

    #[test]
    fn test_title_case_function() {
        let r = TemplateRenderer::new();
        let out = r
            .render_value("{{ steps.gather.output.title | title }}", &ctx())
            .unwrap();
        assert_eq!(out, "Hello World");
    }

    #[test]
    fn test_default_function_on_null() {
        let r = TemplateRenderer::new();
        let out = r.render_value("{{ variables.name | default:'anon' }}", &ctx()).unwrap();
        assert_eq!(out, "anon");
    }

    #[test]
    fn test_join_function() {
        let r = TemplateRenderer::new();
        let out = r
            .render_value("{{ steps.gather.output.tags | join:', ' }}", &ctx())
            .unwrap();
        assert_eq!(out, "a, b, c");
    }

    #[test]
    fn test_first_last_functions() {
        let r = TemplateRenderer::new();
        assert_eq!(
            r.render_value("{{ steps.gather.output.tags | first }}", &ctx()).unwrap(),
            "a"
        );
        assert_eq!(
            r.render_value("{{ steps.gather.output.tags | last }}", &ctx()).unwrap(),
            "c"
        );
    }

    #[test]
    fn test_missing_path_renders_empty() {
        let r = TemplateRenderer::new();
        assert_eq!(r.render_value("[{{ nope.nope }}]", &ctx()).unwrap(), "[]");
    }

    #[test]
    fn test_unterminated_placeholder_errors() {
        let r = TemplateRenderer::new();
        assert!(r.render_value("{{ steps.gather", &ctx()).is_err());
    }

    #[test]
    fn test_render_typed_preserves_type_for_bare_placeholder() {
        let r = TemplateRenderer::new();
        let scope = json!({ "variables": { "count": 5, "items": [1, 2] } });
        let rendered = r
            .render_json(&json!("{{ variables.count }}"), &scope)
            .unwrap();
        assert_eq!(rendered, json!(5));
        let rendered = r
            .render_json(&json!("{{ variables.items }}"), &scope)
            .unwrap();
        assert_eq!(rendered, json!([1, 2]));
    }

    #[test]
    fn test_render_json_recurses_into_mappings_and_sequences() {
        let r = TemplateRenderer::new();
        let scope = json!({ "steps": { "gather": { "output": { "title": "hi" } } } });
        let input = json!({
            "prompt": "Title: {{ steps.gather.output.title }}",
            "nested": { "again": "{{ steps.gather.output.title }}" },
            "list": ["{{ steps.gather.output.title }}", 42],
        });
        let rendered = r.render_json(&input, &scope).unwrap();
        assert_eq!(rendered["prompt"], json!("Title: hi"));
        assert_eq!(rendered["nested"]["again"], json!("hi"));
        assert_eq!(rendered["list"][0], json!("hi"));
        assert_eq!(rendered["list"][1], json!(42));
    }

    #[test]
    fn test_clear_cache() {
        let r = TemplateRenderer::new();
        r.render_value("{{ steps.gather.output.title }}", &ctx()).unwrap();
        assert_eq!(r.cache.len(), 1);
        r.clear_cache();
        assert_eq!(r.cache.len(), 0);
    }

    #[test]
    fn test_cache_reused_across_calls() {
        let r = TemplateRenderer::new();
        let tmpl = "{{ steps.gather.output.title }}";
        r.render_value(tmpl, &ctx()).unwrap();
        assert_eq!(r.cache.len(), 1);
        r.render_value(tmpl, &ctx()).unwrap();
        assert_eq!(r.cache.len(), 1, "second call must hit the cache, not recompile");
    }
}
