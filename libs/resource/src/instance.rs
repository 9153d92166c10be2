//! The generic resource envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ResourceError;
use crate::hash::ContentHash;
use crate::kind::{GroupKind, KnownKind};

/// Name of the sub-resource carrying agent-owned identity.
pub const X_AGENT_DETAILS: &str = "x-agent-details";

/// Keys stored in the `x-agent-details` sub-resource.
pub mod details {
    pub const EXTERNAL_API_ID: &str = "externalAPIID";
    pub const EXTERNAL_API_PRIMARY_KEY: &str = "externalAPIPrimaryKey";
    pub const EXTERNAL_API_NAME: &str = "externalAPIName";
    pub const EXTERNAL_API_STAGE: &str = "externalAPIStage";
    pub const CREATED_BY: &str = "createdBy";

    /// Every key an agent historically wrote as a plain attribute.
    pub const ALL: [&str; 5] = [
        EXTERNAL_API_ID,
        EXTERNAL_API_PRIMARY_KEY,
        EXTERNAL_API_NAME,
        EXTERNAL_API_STAGE,
        CREATED_BY,
    ];
}

/// Scope of a scoped resource (usually an environment).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub kind: String,
    pub name: String,
}

/// A reference from one resource to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default)]
    pub id: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,
}

/// Server-assigned metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub self_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

/// Resource owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(rename = "type")]
    pub owner_type: String,
    pub id: String,
}

impl Owner {
    pub const TEAM: &'static str = "team";

    pub fn team(id: impl Into<String>) -> Self {
        Self {
            owner_type: Self::TEAM.to_string(),
            id: id.into(),
        }
    }
}

/// Agent identity read from `x-agent-details`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentDetails {
    pub external_api_id: Option<String>,
    pub primary_key: Option<String>,
    pub name: Option<String>,
    pub stage: Option<String>,
}

/// A remote resource as the agent sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInstance {
    pub group: String,
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
    /// Named sub-resources (`status`, `state`, `x-agent-details`, ...).
    #[serde(flatten)]
    pub sub_resources: BTreeMap<String, Value>,
}

impl ResourceInstance {
    /// Build an empty resource of the given kind, scoped to `environment`
    /// when the kind is environment-scoped.
    pub fn new(kind: KnownKind, name: impl Into<String>, environment: &str) -> Self {
        let name = name.into();
        let scope = kind.is_environment_scoped().then(|| Scope {
            kind: KnownKind::Environment.kind().to_string(),
            name: environment.to_string(),
        });
        let self_link = format!("{}/{}", kind.collection_path(environment), name);

        Self {
            group: kind.group().to_string(),
            api_version: kind.api_version().to_string(),
            kind: kind.kind().to_string(),
            title: name.clone(),
            name,
            metadata: Metadata {
                id: String::new(),
                self_link,
                scope,
                references: Vec::new(),
            },
            attributes: BTreeMap::new(),
            tags: Vec::new(),
            owner: None,
            spec: Value::Null,
            sub_resources: BTreeMap::new(),
        }
    }

    /// Decode a resource from a JSON document.
    pub fn from_value(value: Value) -> Result<Self, ResourceError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(&self.group, &self.kind)
    }

    pub fn known_kind(&self) -> Result<KnownKind, ResourceError> {
        KnownKind::try_from(&self.group_kind())
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn self_link(&self) -> &str {
        &self.metadata.self_link
    }

    /// Title when set, otherwise name.
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }

    pub fn sub_resource(&self, name: &str) -> Option<&Value> {
        self.sub_resources.get(name)
    }

    pub fn set_sub_resource(&mut self, name: impl Into<String>, value: Value) {
        self.sub_resources.insert(name.into(), value);
    }

    /// Read a single string from `x-agent-details`.
    pub fn agent_detail(&self, key: &str) -> Option<&str> {
        self.sub_resource(X_AGENT_DETAILS)?
            .get(key)?
            .as_str()
            .filter(|v| !v.is_empty())
    }

    pub fn set_agent_detail(&mut self, key: &str, value: impl Into<String>) {
        let entry = self
            .sub_resources
            .entry(X_AGENT_DETAILS.to_string())
            .or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        if let Some(map) = entry.as_object_mut() {
            map.insert(key.to_string(), Value::String(value.into()));
        }
    }

    pub fn agent_details(&self) -> AgentDetails {
        let get = |key| self.agent_detail(key).map(str::to_string);
        AgentDetails {
            external_api_id: get(details::EXTERNAL_API_ID),
            primary_key: get(details::EXTERNAL_API_PRIMARY_KEY),
            name: get(details::EXTERNAL_API_NAME),
            stage: get(details::EXTERNAL_API_STAGE),
        }
    }

    /// Team id of the owner, if the resource is owned by a team.
    pub fn owner_team_id(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .filter(|o| o.owner_type == Owner::TEAM && !o.id.is_empty())
            .map(|o| o.id.as_str())
    }

    /// First reference to a resource of the given kind name.
    pub fn reference(&self, kind: &str) -> Option<&Reference> {
        self.metadata.references.iter().find(|r| r.kind == kind)
    }

    /// Hash over the user-visible content, excluding server metadata.
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::from_json(&json!({
            "group": self.group,
            "kind": self.kind,
            "name": self.name,
            "title": self.title,
            "attributes": self.attributes,
            "tags": self.tags,
            "owner": self.owner,
            "spec": self.spec,
            "subResources": self.sub_resources,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_json() -> Value {
        json!({
            "group": "management",
            "apiVersion": "v1alpha1",
            "kind": "APIService",
            "name": "petstore",
            "title": "Pet Store",
            "metadata": {
                "id": "svc-1",
                "selfLink": "/management/v1alpha1/environments/prod/apiservices/petstore",
                "scope": {"kind": "Environment", "name": "prod"}
            },
            "owner": {"type": "team", "id": "team-a"},
            "spec": {"description": "pets"},
            "x-agent-details": {
                "externalAPIID": "ext-1",
                "externalAPIPrimaryKey": "pk-1",
                "externalAPIStage": ""
            },
            "status": {"level": "Success"}
        })
    }

    #[test]
    fn test_deserialize_collects_sub_resources() {
        let ri = ResourceInstance::from_value(service_json()).unwrap();
        assert_eq!(ri.id(), "svc-1");
        assert_eq!(ri.known_kind().unwrap(), KnownKind::ApiService);
        assert!(ri.sub_resource("status").is_some());
        assert!(ri.sub_resource(X_AGENT_DETAILS).is_some());
        assert_eq!(ri.owner_team_id(), Some("team-a"));
    }

    #[test]
    fn test_agent_details_treats_empty_as_absent() {
        let ri = ResourceInstance::from_value(service_json()).unwrap();
        let d = ri.agent_details();
        assert_eq!(d.external_api_id.as_deref(), Some("ext-1"));
        assert_eq!(d.primary_key.as_deref(), Some("pk-1"));
        assert_eq!(d.stage, None);
    }

    #[test]
    fn test_serialize_flattens_sub_resources() {
        let ri = ResourceInstance::from_value(service_json()).unwrap();
        let value = serde_json::to_value(&ri).unwrap();
        assert_eq!(value["x-agent-details"]["externalAPIID"], "ext-1");
        assert_eq!(value["status"]["level"], "Success");
    }

    #[test]
    fn test_content_hash_ignores_metadata() {
        let a = ResourceInstance::from_value(service_json()).unwrap();
        let mut b = a.clone();
        b.metadata.id = "svc-2".to_string();
        assert_eq!(a.content_hash(), b.content_hash());

        b.attributes.insert("k".to_string(), "v".to_string());
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_new_sets_scope_and_self_link() {
        let ri = ResourceInstance::new(KnownKind::AccessControlList, "prod-agent-acl", "prod");
        assert_eq!(
            ri.self_link(),
            "/management/v1alpha1/environments/prod/accesscontrollists/prod-agent-acl"
        );
        assert_eq!(ri.metadata.scope.as_ref().unwrap().name, "prod");
    }

    #[test]
    fn test_set_agent_detail_creates_sub_resource() {
        let mut ri = ResourceInstance::new(KnownKind::ApiService, "svc", "prod");
        ri.set_agent_detail(details::EXTERNAL_API_ID, "ext-9");
        assert_eq!(ri.agent_detail(details::EXTERNAL_API_ID), Some("ext-9"));
    }
}
