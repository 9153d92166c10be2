//! Error types for the resource model.

use thiserror::Error;

/// Errors raised while interpreting resources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The group/kind pair is not one the agent handles.
    #[error("unsupported resource kind: {group}/{kind}")]
    UnsupportedKind { group: String, kind: String },

    /// A sub-resource or spec could not be decoded into its typed form.
    #[error("invalid {kind} resource {name}: {reason}")]
    Invalid {
        kind: String,
        name: String,
        reason: String,
    },

    /// A required field is absent.
    #[error("missing field {field} on {name}")]
    MissingField { name: String, field: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::Serialization(err.to_string())
    }
}
