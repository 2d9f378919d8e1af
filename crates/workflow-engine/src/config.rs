//! Engine configuration storage
//!
//! Handles persistent storage of run defaults and the workflow store location.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::types::DEFAULT_MAX_ITERATIONS;

/// File name of the configuration inside its directory
pub const CONFIG_FILE: &str = "config.json";

/// What the interpreter does after a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure and follow the step's normal successor
    #[default]
    Continue,
    /// End the run with `workflow-failed`
    Abort,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Iteration cap for workflows that do not declare one
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Variable the run input is written to
    #[serde(default = "default_input_variable")]
    pub input_variable: String,
    /// Emit `workflow-cancelled` when a cancellation is observed
    #[serde(default = "default_true")]
    pub emit_cancellation_notice: bool,
    /// Directory for JSON persistence of workflows
    #[serde(default)]
    pub store_directory: Option<PathBuf>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_input_variable() -> String {
    "input".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: default_max_iterations(),
            failure_policy: FailurePolicy::default(),
            input_variable: default_input_variable(),
            emit_cancellation_notice: true,
            store_directory: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from disk
    ///
    /// A missing file yields the defaults.
    pub async fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            log::debug!("No config at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).await?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to disk
    pub async fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        // Ensure directory exists
        fs::create_dir_all(config_dir).await?;

        let config_path = config_dir.join(CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(&config_path, contents).await?;

        log::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.default_max_iterations, 100);
        assert_eq!(config.input_variable, "input");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let config = EngineConfig {
            default_max_iterations: 10,
            failure_policy: FailurePolicy::Abort,
            store_directory: Some(dir.path().join("workflows")),
            ..EngineConfig::default()
        };
        config.save(&nested).await.unwrap();

        let raw = std::fs::read_to_string(nested.join(CONFIG_FILE)).unwrap();
        assert!(raw.contains("\"failurePolicy\": \"abort\""));

        let loaded = EngineConfig::load(&nested).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"inputVariable":"message"}"#).unwrap();
        let config = EngineConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.input_variable, "message");
        assert!(config.emit_cancellation_notice);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        assert!(matches!(
            EngineConfig::load(dir.path()).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
