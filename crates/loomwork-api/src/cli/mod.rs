//! CLI command definitions and dispatch for the `loomwork` binary.
//!
//! Uses clap derive macros for argument parsing. The CLI follows a verb-noun
//! pattern (e.g., `loomwork create workflow.yaml`, `loomwork list executions`).

pub mod approval;
pub mod status;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Submit, inspect, and approve workflow executions.
#[derive(Parser)]
#[command(name = "loomwork", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a new workflow definition from a YAML file.
    Create {
        /// Path to a workflow definition YAML file.
        file: String,

        /// Tenant the definition belongs to.
        #[arg(long)]
        tenant: uuid::Uuid,

        /// Owner (creating user) of the definition.
        #[arg(long)]
        owner: uuid::Uuid,
    },

    /// List workflow definitions visible to a tenant.
    #[command(alias = "ls")]
    Workflows {
        #[arg(long)]
        tenant: uuid::Uuid,
    },

    /// Remove (soft-delete) a workflow definition.
    #[command(alias = "rm")]
    Delete {
        #[arg(long)]
        tenant: uuid::Uuid,
        workflow_id: uuid::Uuid,
    },

    /// Submit a workflow for execution and drive it to completion or pause.
    Submit {
        workflow_id: uuid::Uuid,

        #[arg(long)]
        tenant: uuid::Uuid,

        #[arg(long)]
        user: uuid::Uuid,

        /// JSON input payload, e.g. '{"key": "value"}'.
        #[arg(long, default_value = "{}")]
        input: String,
    },

    /// Show one execution, its tasks, and any pending approvals.
    Get { execution_id: uuid::Uuid },

    /// List executions for a workflow.
    #[command(alias = "list")]
    Executions {
        #[arg(long)]
        tenant: uuid::Uuid,

        #[arg(long)]
        workflow: uuid::Uuid,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Approve a pending approval request and resume its execution.
    Approve {
        approval_id: uuid::Uuid,

        #[arg(long)]
        approver: String,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Reject a pending approval request.
    Reject {
        approval_id: uuid::Uuid,

        #[arg(long)]
        approver: String,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Re-fire notifications for a pending approval.
    Resend {
        approval_id: uuid::Uuid,

        #[arg(long)]
        tenant: uuid::Uuid,
    },

    /// System status summary (queue depth, running executions).
    Status,

    /// Start the REST API server (and the background execution worker).
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 4180)]
        port: u16,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
