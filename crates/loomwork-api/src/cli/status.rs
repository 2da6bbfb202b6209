//! System status summary command.

use console::style;
use loomwork_core::repository::workflow::WorkflowRepository;

use crate::state::AppState;

/// Display a summary of running executions and the configured concurrency.
pub async fn status(state: &AppState, json: bool) -> anyhow::Result<()> {
    let running = state.workflow_repo.list_running_executions().await?;

    if json {
        let body = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "max_concurrency": state.config.max_concurrency,
            "snapshot_ttl_secs": state.config.snapshot_ttl_secs,
            "running_executions": running.len(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!();
    println!("  {} Loomwork v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();
    println!("  {}", style("── Execution core ──").dim());
    println!("  Running executions: {}", style(running.len()).bold());
    println!("  Max concurrency:    {}", state.config.max_concurrency);
    println!("  Snapshot TTL:       {}s", state.config.snapshot_ttl_secs);
    println!();
    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
