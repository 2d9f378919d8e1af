//! Error types for workflow text import and export

use thiserror::Error;

/// Result type alias using CodecError
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while translating workflow text
///
/// Import errors abort before any model is produced.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The text is not well-formed; carries the raw parser message
    #[error("Failed to parse workflow text: {0}")]
    Yaml(String),

    /// The document's top-level `kind` is not `Workflow`
    #[error("Document is not a workflow (kind: '{0}')")]
    NotAWorkflow(String),

    /// Neither a trigger nor a step list was found
    #[error("Unrecognized workflow structure: {0}")]
    UnrecognizedStructure(String),

    /// A field has the wrong shape
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    /// Two steps share an id
    #[error("Duplicate step id '{0}'")]
    DuplicateStep(String),

    /// Graph model JSON could not be read or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Create an invalid-field error
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for CodecError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}
