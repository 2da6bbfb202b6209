//! Loomwork CLI and REST API entry point.
//!
//! Binary name: `loomwork`
//!
//! Parses CLI arguments, initializes the execution core (SQLite pool,
//! repositories, Engine/AutomationEngine), then dispatches to the
//! appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        let filter = match cli.verbose {
            0 if cli.quiet => "error",
            0 => "warn",
            1 => "info,loomwork=debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", filter);
    }

    let enable_otel = std::env::var("LOOMWORK_OTEL")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    loomwork_observe::init_tracing(enable_otel).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "loomwork", &mut std::io::stdout());
        return Ok(());
    }

    let (state, mut job_receiver) = AppState::init().await?;

    match cli.command {
        Commands::Create { file, tenant, owner } => {
            cli::workflow::create(&state, &file, tenant, owner, cli.json).await?;
        }

        Commands::Workflows { tenant } => {
            cli::workflow::list_workflows(&state, tenant, cli.json).await?;
        }

        Commands::Delete { tenant, workflow_id } => {
            cli::workflow::delete(&state, tenant, workflow_id, cli.json).await?;
        }

        Commands::Submit {
            workflow_id,
            tenant,
            user,
            input,
        } => {
            // One-shot CLI invocation: drain exactly the job this submit
            // enqueued, then exit. `serve` runs the worker loop continuously.
            cli::workflow::submit(&state, workflow_id, tenant, user, &input, cli.json).await?;
            job_receiver.close();
        }

        Commands::Get { execution_id } => {
            cli::workflow::get(&state, execution_id, cli.json).await?;
        }

        Commands::Executions {
            tenant,
            workflow,
            limit,
        } => {
            cli::workflow::list_executions(&state, tenant, workflow, limit, cli.json).await?;
        }

        Commands::Approve {
            approval_id,
            approver,
            comment,
        } => {
            cli::approval::approve(&state, approval_id, &approver, comment.as_deref(), cli.json).await?;
        }

        Commands::Reject {
            approval_id,
            approver,
            comment,
        } => {
            cli::approval::reject(&state, approval_id, &approver, comment.as_deref(), cli.json).await?;
        }

        Commands::Resend { approval_id, tenant } => {
            cli::approval::resend(&state, approval_id, tenant, cli.json).await?;
        }

        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }

        Commands::Serve { host, port } => {
            let api_key = http::extractors::auth::ensure_api_key(&state).await?;
            if api_key.starts_with("loomwork_") {
                println!();
                println!(
                    "  {} API key generated (save this -- it won't be shown again):",
                    console::style("🔑").bold()
                );
                println!();
                println!("  {}", console::style(&api_key).yellow().bold());
                println!();
            }

            // Background worker: drains queued executions submitted through
            // either the CLI or the HTTP `/executions` endpoint.
            let worker_state = state.clone();
            tokio::spawn(async move {
                while let Some(job) = job_receiver.recv().await {
                    let state = worker_state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = state.drive_execution(job.execution_id).await {
                            tracing::error!(execution_id = %job.execution_id, error = %e, "execution failed");
                        }
                    });
                }
            });

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} Loomwork API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    loomwork_observe::shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}
