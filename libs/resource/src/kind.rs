//! Resource kinds known to the agent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResourceError;

pub const MANAGEMENT_GROUP: &str = "management";
pub const CATALOG_GROUP: &str = "catalog";
pub const API_VERSION: &str = "v1alpha1";

/// A group/kind pair as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.kind)
    }
}

/// The closed set of resource kinds the agent caches or writes.
///
/// Merge paths match on this exhaustively; anything else is rejected when
/// converting from a [`GroupKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KnownKind {
    ApiService,
    ApiServiceInstance,
    Category,
    AccessRequestDefinition,
    CredentialRequestDefinition,
    ManagedApplication,
    AccessRequest,
    Credential,
    AccessControlList,
    Environment,
    DiscoveryAgent,
    TraceabilityAgent,
    ComplianceAgent,
}

impl KnownKind {
    pub const ALL: [KnownKind; 13] = [
        KnownKind::ApiService,
        KnownKind::ApiServiceInstance,
        KnownKind::Category,
        KnownKind::AccessRequestDefinition,
        KnownKind::CredentialRequestDefinition,
        KnownKind::ManagedApplication,
        KnownKind::AccessRequest,
        KnownKind::Credential,
        KnownKind::AccessControlList,
        KnownKind::Environment,
        KnownKind::DiscoveryAgent,
        KnownKind::TraceabilityAgent,
        KnownKind::ComplianceAgent,
    ];

    /// Kind name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiService => "APIService",
            Self::ApiServiceInstance => "APIServiceInstance",
            Self::Category => "Category",
            Self::AccessRequestDefinition => "AccessRequestDefinition",
            Self::CredentialRequestDefinition => "CredentialRequestDefinition",
            Self::ManagedApplication => "ManagedApplication",
            Self::AccessRequest => "AccessRequest",
            Self::Credential => "Credential",
            Self::AccessControlList => "AccessControlList",
            Self::Environment => "Environment",
            Self::DiscoveryAgent => "DiscoveryAgent",
            Self::TraceabilityAgent => "TraceabilityAgent",
            Self::ComplianceAgent => "ComplianceAgent",
        }
    }

    pub fn group(&self) -> &'static str {
        match self {
            Self::Category => CATALOG_GROUP,
            _ => MANAGEMENT_GROUP,
        }
    }

    pub fn api_version(&self) -> &'static str {
        API_VERSION
    }

    /// Plural path segment used in resource URLs.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::ApiService => "apiservices",
            Self::ApiServiceInstance => "apiserviceinstances",
            Self::Category => "categories",
            Self::AccessRequestDefinition => "accessrequestdefinitions",
            Self::CredentialRequestDefinition => "credentialrequestdefinitions",
            Self::ManagedApplication => "managedapplications",
            Self::AccessRequest => "accessrequests",
            Self::Credential => "credentials",
            Self::AccessControlList => "accesscontrollists",
            Self::Environment => "environments",
            Self::DiscoveryAgent => "discoveryagents",
            Self::TraceabilityAgent => "traceabilityagents",
            Self::ComplianceAgent => "complianceagents",
        }
    }

    /// Whether resources of this kind live inside an environment.
    pub fn is_environment_scoped(&self) -> bool {
        !matches!(self, Self::Category | Self::Environment)
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group(), self.kind())
    }

    /// Collection path relative to the API root, e.g.
    /// `/management/v1alpha1/environments/prod/apiservices`.
    pub fn collection_path(&self, environment: &str) -> String {
        if self.is_environment_scoped() {
            format!(
                "/{}/{}/environments/{}/{}",
                self.group(),
                self.api_version(),
                environment,
                self.plural()
            )
        } else {
            format!("/{}/{}/{}", self.group(), self.api_version(), self.plural())
        }
    }
}

impl fmt::Display for KnownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl TryFrom<&GroupKind> for KnownKind {
    type Error = ResourceError;

    fn try_from(gk: &GroupKind) -> Result<Self, Self::Error> {
        KnownKind::ALL
            .into_iter()
            .find(|k| k.group() == gk.group && k.kind() == gk.kind)
            .ok_or_else(|| ResourceError::UnsupportedKind {
                group: gk.group.clone(),
                kind: gk.kind.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_kinds() {
        for kind in KnownKind::ALL {
            let gk = kind.group_kind();
            assert_eq!(KnownKind::try_from(&gk).unwrap(), kind);
        }
    }

    #[test]
    fn test_unsupported_kind() {
        let gk = GroupKind::new("management", "Widget");
        let err = KnownKind::try_from(&gk).unwrap_err();
        assert_eq!(
            err,
            ResourceError::UnsupportedKind {
                group: "management".to_string(),
                kind: "Widget".to_string(),
            }
        );
    }

    #[test]
    fn test_group_mismatch_is_unsupported() {
        let gk = GroupKind::new("management", "Category");
        assert!(KnownKind::try_from(&gk).is_err());
    }

    #[test]
    fn test_collection_path() {
        assert_eq!(
            KnownKind::ApiService.collection_path("prod"),
            "/management/v1alpha1/environments/prod/apiservices"
        );
        assert_eq!(
            KnownKind::Category.collection_path("prod"),
            "/catalog/v1alpha1/categories"
        );
    }
}
