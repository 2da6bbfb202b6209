//! CLI approval gate subcommands: approve, reject, resend notification.

use console::style;
use uuid::Uuid;

use crate::state::AppState;

pub async fn approve(
    state: &AppState,
    approval_id: Uuid,
    approver: &str,
    comment: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let resolved = state.approvals.approve(&approval_id, approver, comment).await?;

    // The approval manager only resolves the request row; resuming the
    // paused execution is the caller's job, same as `Resume` in the HTTP
    // layer. Per spec, a rejected approval does not resume anything --
    // the execution is left `paused` with no downstream progress.
    state.resume_execution(resolved.execution_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        println!(
            "  {} Approved {} by {}",
            style("✓").green().bold(),
            approval_id,
            approver
        );
    }
    Ok(())
}

pub async fn reject(
    state: &AppState,
    approval_id: Uuid,
    approver: &str,
    comment: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let resolved = state.approvals.reject(&approval_id, approver, comment).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        println!(
            "  {} Rejected {} by {}",
            style("✗").red().bold(),
            approval_id,
            approver
        );
    }
    Ok(())
}

pub async fn resend(state: &AppState, approval_id: Uuid, tenant: Uuid, json: bool) -> anyhow::Result<()> {
    state.approvals.resend_notification(tenant, &approval_id).await?;

    if json {
        println!("{}", serde_json::json!({"resent": true}));
    } else {
        println!("  {} Notification resent for {}", style("✓").green().bold(), approval_id);
    }
    Ok(())
}
