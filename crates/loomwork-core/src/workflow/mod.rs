//! Workflow engine core: definition parsing, DAG execution, and durable checkpointing.
//!
//! This module contains the "brain" of the workflow engine:
//! - `definition` -- node/edge parsing, validation, filesystem load/save
//! - `parser` -- lowers a `WorkflowDefinition` into the internal `StepDefinition` list
//! - `dag` -- DAG builder, cycle detection, parallel wave computation
//! - `context` -- execution context with step output tracking and template resolution
//! - `expression` -- path/comparison/function evaluator for conditions and filters
//! - `template` -- `{{ path | func:'arg' }}` renderer with a compiled-template cache
//! - `retry` -- backoff-policy retry loop for the Automated Task Executor
//! - `checkpoint` -- durable `WorkflowSnapshot` store enabling resumption
//! - `approval` -- human-approval gate manager and notification dispatch
//! - `executor` -- dependency-counter scheduler dispatching ready steps
//! - `step_runner` -- base and automated Task Executors, one dispatcher per `StepKind`
//! - `engine` -- top-level `Engine`/`AutomationEngine` entry points
//!
//! Cron/webhook/file-watch triggers are out of scope: submissions arrive
//! already resolved to `(workflow_id, tenant_id, user_id, input)`.

pub mod approval;
pub mod checkpoint;
pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod expression;
pub mod parser;
pub mod retry;
pub mod step_runner;
pub mod template;
