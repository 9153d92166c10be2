//! Resource migrations applied during catch-up.
//!
//! A [`Migrator`] takes a resource and returns it, possibly rewritten (and
//! written back to the control plane). [`MigrateAll`] runs a fixed chain in
//! order; the first failure aborts the chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentsdk_resource::{details, ResourceInstance, X_AGENT_DETAILS};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::client::CentralClient;
use crate::error::{AgentError, Result};

#[async_trait]
pub trait Migrator: Send + Sync {
    fn name(&self) -> &str;

    async fn migrate(&self, resource: ResourceInstance) -> Result<ResourceInstance>;
}

/// Ordered migration chain.
#[derive(Default, Clone)]
pub struct MigrateAll {
    migrators: Vec<Arc<dyn Migrator>>,
}

impl MigrateAll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, migrator: Arc<dyn Migrator>) -> Self {
        self.migrators.push(migrator);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.migrators.is_empty()
    }
}

#[async_trait]
impl Migrator for MigrateAll {
    fn name(&self) -> &str {
        "all"
    }

    async fn migrate(&self, mut resource: ResourceInstance) -> Result<ResourceInstance> {
        for migrator in &self.migrators {
            let name = resource.name.clone();
            resource = migrator.migrate(resource).await.map_err(|e| match e {
                e @ AgentError::Migration { .. } => e,
                other => AgentError::Migration {
                    name,
                    reason: format!("{}: {}", migrator.name(), other),
                },
            })?;
        }
        Ok(resource)
    }
}

/// Moves agent identity from plain attributes into `x-agent-details`.
///
/// Older agents stored external ids as attributes. Resources that have
/// nothing left to move are returned untouched, without a remote write.
pub struct AgentDetailsMigration {
    client: Arc<dyn CentralClient>,
}

impl AgentDetailsMigration {
    pub fn new(client: Arc<dyn CentralClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Migrator for AgentDetailsMigration {
    fn name(&self) -> &str {
        "agent-details"
    }

    async fn migrate(&self, mut resource: ResourceInstance) -> Result<ResourceInstance> {
        let moved: Vec<(&str, String)> = details::ALL
            .iter()
            .filter_map(|key| resource.attributes.remove(*key).map(|v| (*key, v)))
            .collect();

        if moved.is_empty() {
            return Ok(resource);
        }

        for (key, value) in &moved {
            if resource.agent_detail(key).is_none() {
                resource.set_agent_detail(key, value.clone());
            }
        }

        debug!(name = %resource.name, moved = moved.len(), "Migrating agent attributes");
        self.client.update(&resource).await?;

        let details = resource
            .sub_resource(X_AGENT_DETAILS)
            .cloned()
            .unwrap_or(Value::Null);
        let mut subs = BTreeMap::new();
        subs.insert(X_AGENT_DETAILS.to_string(), details);
        self.client.create_sub_resource(&resource, subs).await?;

        info!(kind = %resource.kind, name = %resource.name, "Migrated agent attributes to x-agent-details");
        Ok(resource)
    }
}
