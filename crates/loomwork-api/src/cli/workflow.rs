//! CLI workflow definition and execution subcommands.
//!
//! Provides create, list, delete, submit, get, and list-executions
//! operations backed directly by the `WorkflowRepository` and `Engine`.

use comfy_table::Table;
use console::style;
use loomwork_core::workflow::definition::load_workflow_file;
use loomwork_core::repository::workflow::WorkflowRepository;
use loomwork_types::workflow::{ExecutionStatus, WorkflowVisibility};
use uuid::Uuid;

use crate::state::AppState;

pub async fn create(
    state: &AppState,
    file: &str,
    tenant: Uuid,
    owner: Uuid,
    json: bool,
) -> anyhow::Result<()> {
    let mut def = load_workflow_file(std::path::Path::new(file))?;
    def.id = Uuid::now_v7();
    def.tenant_id = tenant;
    def.owner_id = owner;
    if def.visibility == WorkflowVisibility::Private && def.version.is_empty() {
        def.version = "1".to_string();
    }
    state.workflow_repo.create_definition(&def).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
    } else {
        println!(
            "  {} Created workflow {} ({})",
            style("✓").green().bold(),
            style(&def.name).bold(),
            def.id
        );
    }
    Ok(())
}

pub async fn list_workflows(state: &AppState, tenant: Uuid, json: bool) -> anyhow::Result<()> {
    let defs = state.workflow_repo.list_definitions(&tenant).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!("  No workflows found for tenant {tenant}.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Version", "Visibility", "Nodes"]);
    for def in &defs {
        table.add_row(vec![
            def.id.to_string(),
            def.name.clone(),
            def.version.clone(),
            format!("{:?}", def.visibility),
            def.nodes.len().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn delete(state: &AppState, tenant: Uuid, workflow_id: Uuid, json: bool) -> anyhow::Result<()> {
    let deleted = state
        .workflow_repo
        .soft_delete_definition(&tenant, &workflow_id)
        .await?;

    if json {
        println!("{}", serde_json::json!({"deleted": deleted}));
    } else if deleted {
        println!("  {} Deleted workflow {}", style("✓").green().bold(), workflow_id);
    } else {
        println!("  {} No such workflow for this tenant.", style("✗").red());
    }
    Ok(())
}

pub async fn submit(
    state: &AppState,
    workflow_id: Uuid,
    tenant: Uuid,
    user: Uuid,
    input: &str,
    json: bool,
) -> anyhow::Result<()> {
    let input: serde_json::Value = serde_json::from_str(input)
        .map_err(|e| anyhow::anyhow!("invalid --input JSON: {e}"))?;

    let record = state.engine.execute(workflow_id, tenant, user, input).await?;
    state.drive_execution(record.id).await?;
    let record = state
        .workflow_repo
        .get_execution(&record.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("execution vanished after submit"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_execution_summary(&record);
    }
    Ok(())
}

pub async fn get(state: &AppState, execution_id: Uuid, json: bool) -> anyhow::Result<()> {
    let record = state
        .workflow_repo
        .get_execution(&execution_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("execution {execution_id} not found"))?;
    let tasks = state.workflow_repo.list_tasks(&execution_id).await?;
    let automation_log = state.workflow_repo.list_automation_log(&execution_id).await?;
    let pending_approvals = state.approval_repo.list_pending_for_execution(&execution_id).await?;

    if json {
        let body = serde_json::json!({
            "execution": record,
            "tasks": tasks,
            "automation_log": automation_log,
            "pending_approvals": pending_approvals,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    print_execution_summary(&record);
    if !tasks.is_empty() {
        println!("  {}", style("── Tasks ──").dim());
        let mut table = Table::new();
        table.set_header(vec!["Step", "Status", "Retries"]);
        for task in &tasks {
            table.add_row(vec![
                task.step_id.clone(),
                format!("{:?}", task.status),
                task.retry_count.to_string(),
            ]);
        }
        println!("{table}");
    }
    if !pending_approvals.is_empty() {
        println!("  {}", style("── Pending approvals ──").dim());
        let mut table = Table::new();
        table.set_header(vec!["ID", "Step", "Requested"]);
        for approval in &pending_approvals {
            table.add_row(vec![
                approval.id.to_string(),
                approval.step_id.clone(),
                approval.created_at.to_rfc3339(),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

pub async fn list_executions(
    state: &AppState,
    tenant: Uuid,
    workflow_id: Uuid,
    limit: u32,
    json: bool,
) -> anyhow::Result<()> {
    let records = state
        .workflow_repo
        .list_executions(&tenant, &workflow_id, limit)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("  No executions found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Status", "Created"]);
    for record in &records {
        table.add_row(vec![
            record.id.to_string(),
            format_status(record.status),
            record.created_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn print_execution_summary(record: &loomwork_types::workflow::ExecutionRecord) {
    println!(
        "  Execution {}  [{}]",
        style(record.id).bold(),
        format_status(record.status)
    );
    if let Some(err) = &record.error {
        println!("  {} {}", style("error:").red(), err);
    }
}

fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Queued => style("queued").dim().to_string(),
        ExecutionStatus::Running => style("running").cyan().to_string(),
        ExecutionStatus::Paused => style("paused").yellow().to_string(),
        ExecutionStatus::Completed => style("completed").green().to_string(),
        ExecutionStatus::Failed => style("failed").red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status_does_not_panic_on_any_variant() {
        for status in [
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            assert!(!format_status(status).is_empty());
        }
    }
}
