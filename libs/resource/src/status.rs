//! Agent status values reported to the control plane.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of the agent as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Stopped,
    Failed,
    Unhealthy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Unhealthy => "unhealthy",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of an agent `status` sub-resource update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub state: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<AgentStatus>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_activity_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_serialization() {
        let update = StatusUpdate {
            state: AgentStatus::Unhealthy,
            previous_state: Some(AgentStatus::Running),
            message: "central unreachable".to_string(),
            last_activity_time: Utc::now(),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["state"], "unhealthy");
        assert_eq!(value["previousState"], "running");
        assert!(value.get("lastActivityTime").is_some());
    }
}
