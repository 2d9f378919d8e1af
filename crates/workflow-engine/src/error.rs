//! Error types for the workflow engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the workflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow, step or variable lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// The workflow cannot run in its current shape (e.g. disabled start step)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A step handler failed
    #[error("Step execution failed: {0}")]
    StepFailed(String),

    /// The external agent capability returned an error
    #[error("Agent invocation failed: {0}")]
    Agent(String),

    /// A step's config is missing a required key or has the wrong shape
    #[error("Invalid config for step '{step_id}': {message}")]
    InvalidConfig { step_id: String, message: String },

    /// Run was cancelled
    #[error("Workflow cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl EngineError {
    /// Create a step failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::StepFailed(msg.into())
    }

    /// Create a not-found error with a message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid-config error for a step
    pub fn invalid_config(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            step_id: step_id.into(),
            message: message.into(),
        }
    }
}
