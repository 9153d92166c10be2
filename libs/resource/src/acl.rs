//! Access control list resources.
//!
//! Two ACLs are maintained per environment:
//!
//! - `{env}-agent-acl` grants environment scope to every team that owns a
//!   service the agent published
//! - `{env}-agent-kinds-acl` grants scoped-kind access for each agent kind

use serde::{Deserialize, Serialize};

use crate::error::ResourceError;
use crate::instance::{Owner, ResourceInstance};
use crate::kind::KnownKind;

pub const LEVEL_SCOPE: &str = "scope";
pub const LEVEL_SCOPED_KIND: &str = "scopedKind";

/// Agent kinds the kinds ACL must grant.
pub const AGENT_KINDS: [KnownKind; 3] = [
    KnownKind::DiscoveryAgent,
    KnownKind::TraceabilityAgent,
    KnownKind::ComplianceAgent,
];

pub fn team_acl_name(environment: &str) -> String {
    format!("{}-agent-acl", environment)
}

pub fn agent_kinds_acl_name(environment: &str) -> String {
    format!("{}-agent-kinds-acl", environment)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLevel {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    #[serde(default)]
    pub access: Vec<AccessLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlListSpec {
    #[serde(default)]
    pub rules: Vec<AccessRule>,
    #[serde(default)]
    pub subjects: Vec<Owner>,
}

impl AccessControlListSpec {
    /// Decode the spec of an ACL resource.
    pub fn from_resource(ri: &ResourceInstance) -> Result<Self, ResourceError> {
        if ri.spec.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(ri.spec.clone()).map_err(|e| ResourceError::Invalid {
            kind: ri.kind.clone(),
            name: ri.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Team ids among the subjects, sorted and deduplicated.
    pub fn team_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .subjects
            .iter()
            .filter(|s| s.owner_type == Owner::TEAM)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Whether every access level in `required` is granted by some rule.
    pub fn grants_all(&self, required: &[AccessLevel]) -> bool {
        required.iter().all(|want| {
            self.rules
                .iter()
                .flat_map(|r| r.access.iter())
                .any(|have| have == want)
        })
    }
}

/// Desired access levels for the agent kinds ACL.
pub fn agent_kinds_access() -> Vec<AccessLevel> {
    AGENT_KINDS
        .iter()
        .map(|k| AccessLevel {
            level: LEVEL_SCOPED_KIND.to_string(),
            kind: Some(k.kind().to_string()),
        })
        .collect()
}

/// Build the team ACL resource with the given subjects.
pub fn team_acl(environment: &str, team_ids: &[String]) -> ResourceInstance {
    let spec = AccessControlListSpec {
        rules: vec![AccessRule {
            access: vec![AccessLevel {
                level: LEVEL_SCOPE.to_string(),
                kind: None,
            }],
        }],
        subjects: team_ids.iter().map(Owner::team).collect(),
    };
    with_spec(team_acl_name(environment), environment, &spec)
}

/// Build the agent kinds ACL resource from its fixed definition.
pub fn agent_kinds_acl(environment: &str) -> ResourceInstance {
    let spec = AccessControlListSpec {
        rules: vec![AccessRule {
            access: agent_kinds_access(),
        }],
        subjects: Vec::new(),
    };
    with_spec(agent_kinds_acl_name(environment), environment, &spec)
}

fn with_spec(name: String, environment: &str, spec: &AccessControlListSpec) -> ResourceInstance {
    let mut ri = ResourceInstance::new(KnownKind::AccessControlList, name, environment);
    ri.spec = serde_json::json!({
        "rules": spec.rules,
        "subjects": spec.subjects,
    });
    ri
}
