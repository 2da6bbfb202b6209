//! Global configuration types for Loomwork.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls the
//! process-wide knobs of the execution core: concurrency cap, snapshot TTL,
//! default approval timeout, and the notification channel fallback order.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Loomwork execution core.
///
/// Loaded from `~/.loomwork/config.toml`. All fields have sensible defaults
/// so a missing or partial file never prevents startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of Task Executor invocations in flight per execution.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// TTL, in seconds, applied to every `WorkflowSnapshot` row.
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: i64,

    /// Default approval timeout when a step's `ApprovalConfig` omits one.
    #[serde(default = "default_approval_timeout_secs")]
    pub default_approval_timeout_secs: i64,

    /// Notification channels attempted when a step requests none explicitly.
    #[serde(default = "default_notify_channels")]
    pub default_notify_channels: Vec<String>,

    /// Fallback order tried after a step's explicitly requested channels.
    #[serde(default = "default_channel_fallback_order")]
    pub channel_fallback_order: Vec<String>,

    /// Safety bound on loop-step iterations regardless of `MaxIterations`.
    #[serde(default = "default_loop_safety_cap")]
    pub loop_safety_cap: u32,

    /// Maximum `ResendNotification` calls per tenant per approval request.
    #[serde(default = "default_resend_limit")]
    pub resend_limit_per_tenant: u32,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_snapshot_ttl_secs() -> i64 {
    24 * 60 * 60
}

fn default_approval_timeout_secs() -> i64 {
    24 * 60 * 60
}

fn default_notify_channels() -> Vec<String> {
    vec!["websocket".to_string()]
}

fn default_channel_fallback_order() -> Vec<String> {
    vec![
        "websocket".to_string(),
        "email".to_string(),
        "webhook".to_string(),
    ]
}

fn default_loop_safety_cap() -> u32 {
    1000
}

fn default_resend_limit() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            default_approval_timeout_secs: default_approval_timeout_secs(),
            default_notify_channels: default_notify_channels(),
            channel_fallback_order: default_channel_fallback_order(),
            loop_safety_cap: default_loop_safety_cap(),
            resend_limit_per_tenant: default_resend_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.snapshot_ttl_secs, 86_400);
        assert_eq!(config.loop_safety_cap, 1000);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let toml_str = "";
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.default_notify_channels, vec!["websocket"]);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_concurrency = 10
snapshot_ttl_secs = 3600
default_approval_timeout_secs = 600
default_notify_channels = ["email"]
channel_fallback_order = ["email", "webhook"]
loop_safety_cap = 500
resend_limit_per_tenant = 5
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.snapshot_ttl_secs, 3600);
        assert_eq!(config.default_approval_timeout_secs, 600);
        assert_eq!(config.default_notify_channels, vec!["email"]);
        assert_eq!(config.loop_safety_cap, 500);
        assert_eq!(config.resend_limit_per_tenant, 5);
    }

    #[test]
    fn test_engine_config_serde_roundtrip() {
        let config = EngineConfig {
            max_concurrency: 8,
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_concurrency, 8);
    }
}
