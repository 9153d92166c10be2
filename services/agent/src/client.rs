//! Control plane API client for the agent.
//!
//! [`CentralClient`] is the seam every component writes through. The
//! reqwest-backed [`HttpCentralClient`] talks to the resource API:
//! - Listing, fetching, creating, updating and deleting resources
//! - Writing and patching sub-resources
//! - Reporting the agent's own status

use std::collections::BTreeMap;
use std::time::Duration;

use agentsdk_resource::status::StatusUpdate;
use agentsdk_resource::{KnownKind, Patch, ResourceInstance};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, ConfigError};
use crate::error::{AgentError, Result};

/// Parameters for a list call.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Field projection; empty means the full resource.
    pub fields: Vec<String>,

    /// Optional filter expression, passed through verbatim.
    pub query: Option<String>,

    /// 1-based page number.
    pub page: usize,

    pub page_size: usize,
}

impl ListQuery {
    pub fn new(page_size: usize) -> Self {
        Self {
            fields: Vec::new(),
            query: None,
            page: 1,
            page_size,
        }
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Operations the engine needs from the control plane.
#[async_trait]
pub trait CentralClient: Send + Sync {
    /// List one page of resources of `kind` in the agent's environment.
    async fn list(&self, kind: KnownKind, query: &ListQuery) -> Result<Vec<ResourceInstance>>;

    /// Fetch a resource by self link.
    async fn get(&self, self_link: &str) -> Result<ResourceInstance>;

    async fn create(&self, resource: &ResourceInstance) -> Result<ResourceInstance>;

    async fn update(&self, resource: &ResourceInstance) -> Result<ResourceInstance>;

    /// Delete a resource; sub-resources go with it.
    async fn delete(&self, resource: &ResourceInstance) -> Result<()>;

    /// Write the given sub-resources, replacing their current values.
    async fn create_sub_resource(
        &self,
        resource: &ResourceInstance,
        sub_resources: BTreeMap<String, Value>,
    ) -> Result<()>;

    /// Apply patch operations to a resource and return the result.
    async fn patch_sub_resources(
        &self,
        resource: &ResourceInstance,
        patches: &[Patch],
    ) -> Result<ResourceInstance>;

    /// Write the agent resource's `status` sub-resource.
    async fn update_agent_status(&self, update: &StatusUpdate) -> Result<()>;
}

/// Fetch every page of `kind`, stopping at the first short page.
pub async fn list_all(
    client: &dyn CentralClient,
    kind: KnownKind,
    fields: &[&str],
    page_size: usize,
) -> Result<Vec<ResourceInstance>> {
    let mut query = ListQuery::new(page_size.max(1)).with_fields(fields);
    let mut all = Vec::new();

    loop {
        let page = client.list(kind, &query).await?;
        let count = page.len();
        all.extend(page);
        if count < query.page_size {
            break;
        }
        query.page += 1;
    }

    debug!(kind = %kind, count = all.len(), pages = query.page, "Listed resources");
    Ok(all)
}

/// Update the resource, creating it if it does not exist yet.
pub async fn create_or_update(
    client: &dyn CentralClient,
    resource: &ResourceInstance,
) -> Result<ResourceInstance> {
    match client.update(resource).await {
        Err(AgentError::NotFound(_)) => client.create(resource).await,
        other => other,
    }
}

/// Control plane API client over HTTP.
pub struct HttpCentralClient {
    client: reqwest::Client,
    base_url: String,
    environment: String,
    agent_kind: KnownKind,
    agent_name: Option<String>,
}

impl HttpCentralClient {
    /// Create a new control plane client.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.central.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                ConfigError::Invalid {
                    name: "CENTRAL_AUTH_TOKEN",
                    reason: e.to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        if !config.central.tenant_id.is_empty() {
            let value = HeaderValue::from_str(&config.central.tenant_id).map_err(|e| {
                ConfigError::Invalid {
                    name: "CENTRAL_TENANT_ID",
                    reason: e.to_string(),
                }
            })?;
            headers.insert("X-Axway-Tenant-Id", value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.central.client_timeout)
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.central.url.trim_end_matches('/').to_string(),
            environment: config.central.environment.clone(),
            agent_kind: config.agent_type.resource_kind(),
            agent_name: config.central.agent_name.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/apis{}", self.base_url, path)
    }

    fn collection_url(&self, resource: &ResourceInstance) -> Result<String> {
        let kind = resource.known_kind()?;
        let scope = resource
            .metadata
            .scope
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or(&self.environment);
        Ok(self.url(&kind.collection_path(scope)))
    }

    fn self_link_url(&self, resource: &ResourceInstance) -> Result<String> {
        if !resource.self_link().is_empty() {
            return Ok(self.url(resource.self_link()));
        }
        Ok(format!("{}/{}", self.collection_url(resource)?, resource.name))
    }
}

/// Turn a non-success response into an error, keeping the body for context.
async fn check(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        debug!(operation, "Resource not found");
        return Err(AgentError::NotFound(operation.to_string()));
    }

    warn!(operation, status = %status, body = %body, "Control plane call failed");
    Err(AgentError::Remote {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CentralClient for HttpCentralClient {
    async fn list(&self, kind: KnownKind, query: &ListQuery) -> Result<Vec<ResourceInstance>> {
        let url = self.url(&kind.collection_path(&self.environment));
        let mut params: Vec<(&str, String)> = vec![
            ("page", query.page.to_string()),
            ("pageSize", query.page_size.to_string()),
        ];
        if !query.fields.is_empty() {
            params.push(("fields", query.fields.join(",")));
        }
        if let Some(q) = &query.query {
            params.push(("query", q.clone()));
        }

        debug!(url = %url, page = query.page, "Listing resources");
        let response = self.client.get(&url).query(&params).send().await?;
        let response = check(response, &format!("list {}", kind)).await?;
        Ok(response.json().await?)
    }

    async fn get(&self, self_link: &str) -> Result<ResourceInstance> {
        let response = self.client.get(self.url(self_link)).send().await?;
        let response = check(response, &format!("get {}", self_link)).await?;
        Ok(response.json().await?)
    }

    async fn create(&self, resource: &ResourceInstance) -> Result<ResourceInstance> {
        let url = self.collection_url(resource)?;
        debug!(kind = %resource.kind, name = %resource.name, "Creating resource");
        let response = self.client.post(&url).json(resource).send().await?;
        let response = check(response, &format!("create {}", resource.name)).await?;
        Ok(response.json().await?)
    }

    async fn update(&self, resource: &ResourceInstance) -> Result<ResourceInstance> {
        let url = self.self_link_url(resource)?;
        debug!(kind = %resource.kind, name = %resource.name, "Updating resource");
        let response = self.client.put(&url).json(resource).send().await?;
        let response = check(response, &format!("update {}", resource.name)).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, resource: &ResourceInstance) -> Result<()> {
        let url = self.self_link_url(resource)?;
        debug!(kind = %resource.kind, name = %resource.name, "Deleting resource");
        let response = self.client.delete(&url).send().await?;
        check(response, &format!("delete {}", resource.name)).await?;
        Ok(())
    }

    async fn create_sub_resource(
        &self,
        resource: &ResourceInstance,
        sub_resources: BTreeMap<String, Value>,
    ) -> Result<()> {
        let base = self.self_link_url(resource)?;
        for (name, value) in sub_resources {
            let mut body = serde_json::Map::new();
            body.insert(name.clone(), value);
            let response = self
                .client
                .put(format!("{}/{}", base, name))
                .json(&body)
                .send()
                .await?;
            check(response, &format!("write {} of {}", name, resource.name)).await?;
        }
        Ok(())
    }

    async fn patch_sub_resources(
        &self,
        resource: &ResourceInstance,
        patches: &[Patch],
    ) -> Result<ResourceInstance> {
        let url = self.self_link_url(resource)?;
        let response = self
            .client
            .patch(&url)
            .header(CONTENT_TYPE, "application/json-patch+json")
            .json(patches)
            .send()
            .await?;
        let response = check(response, &format!("patch {}", resource.name)).await?;
        Ok(response.json().await?)
    }

    async fn update_agent_status(&self, update: &StatusUpdate) -> Result<()> {
        let name = self
            .agent_name
            .as_deref()
            .ok_or(ConfigError::Missing("CENTRAL_AGENT_NAME"))?;
        let url = self.url(&format!(
            "{}/{}/status",
            self.agent_kind.collection_path(&self.environment),
            name
        ));

        debug!(state = %update.state, "Reporting agent status");
        let body = serde_json::json!({ "status": update });
        let response = self.client.put(&url).json(&body).send().await?;
        check(response, "update agent status").await?;
        Ok(())
    }
}
