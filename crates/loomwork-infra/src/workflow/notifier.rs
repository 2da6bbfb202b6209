//! `WebhookNotifier`: delivers approval-gate notifications over HTTP POST.
//!
//! One of the channels listed in `EngineConfig::channel_fallback_order`
//! (alongside the in-core `LoggingNotifier`). `recipient` is the webhook URL
//! for the `webhook` channel; other channel names are rejected so a
//! misconfigured `notify_channels` entry fails loudly instead of silently
//! no-op'ing.

use std::time::Duration;

use loomwork_core::workflow::approval::Notifier;
use loomwork_types::workflow::ApprovalRequest;
use serde_json::json;

/// Posts a JSON payload describing the approval request to `recipient` when
/// `channel == "webhook"`.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, channel: &str, recipient: &str, request: &ApprovalRequest) -> Result<(), String> {
        if channel != "webhook" {
            return Err(format!("WebhookNotifier cannot deliver on channel '{channel}'"));
        }

        let payload = json!({
            "approval_id": request.id,
            "execution_id": request.execution_id,
            "workflow_id": request.workflow_id,
            "step_id": request.step_id,
            "approval_type": request.approval_type,
            "requester": request.requester,
            "step_output": request.step_output,
            "expires_at": request.expires_at,
        });

        let response = self
            .client
            .post(recipient)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("webhook request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("webhook endpoint returned {}", response.status()));
        }

        Ok(())
    }
}
