//! Event envelope - the common wrapper for watch events.

use agentsdk_resource::{GroupKind, ResourceInstance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    #[serde(rename = "SUBRESOURCEUPDATED")]
    SubresourceUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Updated => "UPDATED",
            EventType::Deleted => "DELETED",
            EventType::SubresourceUpdated => "SUBRESOURCEUPDATED",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, EventType::Deleted)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(EventType::Created),
            "UPDATED" => Ok(EventType::Updated),
            "DELETED" => Ok(EventType::Deleted),
            "SUBRESOURCEUPDATED" => Ok(EventType::SubresourceUpdated),
            other => Err(EventError::UnknownEventType(other.to_string())),
        }
    }
}

/// Ordering and origin of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    #[serde(default, rename = "watchTopicID")]
    pub watch_topic_id: String,
    #[serde(default)]
    pub watch_topic_self_link: String,
    #[serde(rename = "sequenceID")]
    pub sequence_id: i64,
    /// Sub-resource name for `SUBRESOURCEUPDATED` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subresource: Option<String>,
}

/// A single watch event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(default)]
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub metadata: EventMeta,
    /// Reference to the affected resource. Only delete events can be applied
    /// from the payload alone.
    pub payload: ResourceInstance,
}

impl WatchEvent {
    pub fn sequence_id(&self) -> i64 {
        self.metadata.sequence_id
    }

    pub fn group_kind(&self) -> GroupKind {
        self.payload.group_kind()
    }

    /// Decode an event from JSON.
    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(raw)?)
    }
}
