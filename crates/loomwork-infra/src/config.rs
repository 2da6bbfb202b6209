//! Process-wide configuration loader for Loomwork.
//!
//! Reads `config.toml` from the data directory (`~/.loomwork/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to sensible defaults
//! when the file is missing or malformed.

use std::path::Path;

use loomwork_types::config::EngineConfig;

/// Load the engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_concurrency, EngineConfig::default().max_concurrency);
        assert_eq!(config.snapshot_ttl_secs, EngineConfig::default().snapshot_ttl_secs);
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(
            &config_path,
            r#"
max_concurrency = 16
snapshot_ttl_secs = 3600
default_approval_timeout_secs = 1800
default_notify_channels = ["log"]
channel_fallback_order = ["webhook", "log"]
loop_safety_cap = 500
resend_limit_per_tenant = 3
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.snapshot_ttl_secs, 3600);
        assert_eq!(config.resend_limit_per_tenant, 3);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(&config_path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_concurrency, EngineConfig::default().max_concurrency);
    }
}
