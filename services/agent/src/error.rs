//! Agent error type.
//!
//! Every variant maps to a stable numeric code so that failures can be
//! matched in logs and status messages without parsing text.

use agentsdk_events::EventError;
use agentsdk_resource::ResourceError;
use thiserror::Error;

use crate::cache::store::CacheStoreError;
use crate::config::ConfigError;
use crate::source::harvester::HarvesterError;

/// Errors raised by the reconciliation engine.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connectivity failure talking to the control plane.
    #[error("transport error: {0}")]
    Transport(String),

    /// The control plane answered with a non-success status.
    #[error("{operation} failed: {status} - {body}")]
    Remote {
        operation: String,
        status: u16,
        body: String,
    },

    /// A resource the agent expected does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// Startup configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A migration step failed during catch-up.
    #[error("migration of {name} failed: {reason}")]
    Migration { name: String, reason: String },

    /// A resource could not be interpreted (includes unsupported kinds).
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Store(#[from] CacheStoreError),

    #[error(transparent)]
    Harvester(#[from] HarvesterError),

    /// The operation was stopped before it completed.
    #[error("cancelled")]
    Cancelled,
}

impl AgentError {
    /// Stable numeric code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::Transport(_) => 1001,
            Self::Remote { .. } => 1002,
            Self::NotFound(_) => 1003,
            Self::Config(_) => 1100,
            Self::Migration { .. } => 1200,
            Self::Resource(ResourceError::UnsupportedKind { .. }) => 1300,
            Self::Resource(_) => 1301,
            Self::Event(_) => 1400,
            Self::Store(_) => 1500,
            Self::Harvester(HarvesterError::SequenceGone { .. }) => 1601,
            Self::Harvester(_) => 1600,
            Self::Cancelled => 1900,
        }
    }

    /// Whether retrying the same call later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            Self::Harvester(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Resource(ResourceError::from(err))
    }
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            AgentError::Transport("x".into()),
            AgentError::Remote {
                operation: "list".into(),
                status: 500,
                body: String::new(),
            },
            AgentError::NotFound("x".into()),
            AgentError::Config(ConfigError::Missing("CENTRAL_URL")),
            AgentError::Migration {
                name: "svc".into(),
                reason: "x".into(),
            },
            AgentError::Resource(ResourceError::UnsupportedKind {
                group: "g".into(),
                kind: "k".into(),
            }),
            AgentError::Resource(ResourceError::Serialization("x".into())),
            AgentError::Cancelled,
        ];
        let mut codes: Vec<u32> = errors.iter().map(AgentError::code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_transient_classification() {
        assert!(AgentError::Transport("reset".into()).is_transient());
        assert!(AgentError::Remote {
            operation: "get".into(),
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!AgentError::Remote {
            operation: "get".into(),
            status: 404,
            body: String::new()
        }
        .is_transient());
        assert!(!AgentError::Cancelled.is_transient());
    }
}
