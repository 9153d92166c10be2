//! Credential lifecycle view.
//!
//! A credential carries an optional expiry under `policies.expiry.timestamp`,
//! a desired `state` and a `status` reported by the provisioner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResourceError;
use crate::instance::ResourceInstance;

pub const STATUS: &str = "status";
pub const STATE: &str = "state";
pub const POLICIES: &str = "policies";

/// Reason recorded when a credential is expired by the agent.
pub const EXPIRED_REASON: &str = "agent.credential.expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStateName {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialState {
    pub name: CredentialStateName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusLevel {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReason {
    #[serde(rename = "type")]
    pub reason_type: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub level: StatusLevel,
    #[serde(default)]
    pub reasons: Vec<StatusReason>,
}

/// Typed view over a cached credential resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub resource: ResourceInstance,
    pub expires_at: Option<DateTime<Utc>>,
    pub state: Option<CredentialState>,
    pub status: Option<ResourceStatus>,
}

impl Credential {
    pub fn from_resource(resource: ResourceInstance) -> Result<Self, ResourceError> {
        let expires_at = parse_expiry(&resource)?;
        let state = decode_optional(&resource, STATE)?;
        let status = decode_optional(&resource, STATUS)?;
        Ok(Self {
            resource,
            expires_at,
            state,
            status,
        })
    }

    pub fn is_inactive(&self) -> bool {
        matches!(
            self.state,
            Some(CredentialState {
                name: CredentialStateName::Inactive,
                ..
            })
        )
    }

    /// A credential without an expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t < now)
    }

    /// Mark the credential inactive with the expiry reason and a pending status.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        let state = CredentialState {
            name: CredentialStateName::Inactive,
            reason: EXPIRED_REASON.to_string(),
        };
        let status = ResourceStatus {
            level: StatusLevel::Pending,
            reasons: vec![StatusReason {
                reason_type: "Pending".to_string(),
                detail: EXPIRED_REASON.to_string(),
                timestamp: now,
            }],
        };
        self.resource
            .set_sub_resource(STATE, serde_json::json!(state));
        self.resource
            .set_sub_resource(STATUS, serde_json::json!(status));
        self.state = Some(state);
        self.status = Some(status);
    }
}

fn parse_expiry(resource: &ResourceInstance) -> Result<Option<DateTime<Utc>>, ResourceError> {
    let raw = resource
        .sub_resource(POLICIES)
        .and_then(|p| p.get("expiry"))
        .and_then(|e| e.get("timestamp"));

    let Some(raw) = raw else {
        return Ok(None);
    };

    match raw {
        Value::Null => Ok(None),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => {
            let ts = DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3f%z"))
                .map_err(|e| invalid(resource, format!("bad expiry timestamp {s}: {e}")))?
                .with_timezone(&Utc);
            // The zero time from the API server means no expiry.
            if ts.timestamp() <= 0 {
                Ok(None)
            } else {
                Ok(Some(ts))
            }
        }
        other => Err(invalid(resource, format!("bad expiry timestamp {other}"))),
    }
}

fn decode_optional<T: serde::de::DeserializeOwned>(
    resource: &ResourceInstance,
    name: &str,
) -> Result<Option<T>, ResourceError> {
    match resource.sub_resource(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| invalid(resource, format!("bad {name}: {e}"))),
    }
}

fn invalid(resource: &ResourceInstance, reason: String) -> ResourceError {
    ResourceError::Invalid {
        kind: resource.kind.clone(),
        name: resource.name.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::KnownKind;
    use chrono::Duration;
    use serde_json::json;

    fn credential(expiry: Value) -> ResourceInstance {
        let mut ri = ResourceInstance::new(KnownKind::Credential, "cred", "prod");
        ri.set_sub_resource(POLICIES, json!({"expiry": {"timestamp": expiry}}));
        ri.set_sub_resource(STATE, json!({"name": "active"}));
        ri
    }

    #[test]
    fn test_zero_expiry_never_expires() {
        for raw in [json!(null), json!(0), json!(""), json!("0001-01-01T00:00:00Z")] {
            let cred = Credential::from_resource(credential(raw)).unwrap();
            assert_eq!(cred.expires_at, None);
            assert!(!cred.is_expired(Utc::now()));
        }
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let cred = Credential::from_resource(credential(json!(past))).unwrap();
        assert!(cred.is_expired(Utc::now()));
        assert!(!cred.is_inactive());
    }

    #[test]
    fn test_api_server_time_format() {
        let cred =
            Credential::from_resource(credential(json!("2020-01-01T00:00:00.000+0000"))).unwrap();
        assert!(cred.is_expired(Utc::now()));
    }

    #[test]
    fn test_expire_sets_state_and_status() {
        let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let mut cred = Credential::from_resource(credential(json!(past))).unwrap();
        cred.expire(Utc::now());

        assert!(cred.is_inactive());
        assert_eq!(cred.status.as_ref().unwrap().level, StatusLevel::Pending);
        assert_eq!(cred.resource.sub_resource(STATE).unwrap()["name"], "inactive");
        assert_eq!(
            cred.resource.sub_resource(STATE).unwrap()["reason"],
            EXPIRED_REASON
        );
        assert_eq!(cred.resource.sub_resource(STATUS).unwrap()["level"], "Pending");
    }

    #[test]
    fn test_invalid_expiry_is_error() {
        assert!(Credential::from_resource(credential(json!("yesterday"))).is_err());
    }
}
