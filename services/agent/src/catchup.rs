//! Full resynchronization of the resource cache.
//!
//! A pass lists every cached kind from the control plane, page by page, and
//! writes the results into the cache. Services go through the migration
//! chain first; a migration failure aborts the pass. Sub-caches that the
//! agent can run without (categories, request definitions) only log on
//! failure.

use std::sync::Arc;

use agentsdk_resource::{details, KnownKind, ResourceInstance, X_AGENT_DETAILS};
use futures_util::future::BoxFuture;
use tracing::{debug, info, instrument, warn};

use crate::cache::ResourceCache;
use crate::client::{list_all, CentralClient};
use crate::context::AgentContext;
use crate::error::Result;
use crate::migrate::{MigrateAll, Migrator};

/// Projection for services and instances.
const PUBLISHED_FIELDS: [&str; 6] = ["name", "title", "attributes", "metadata", "owner", X_AGENT_DETAILS];

/// Extra work run at the end of a pass.
pub type DiscoverHook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Counts from one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpReport {
    pub services: usize,
    pub instances: usize,
    pub skipped: usize,
    pub other: usize,
}

pub struct CatchUpSync {
    client: Arc<dyn CentralClient>,
    cache: Arc<ResourceCache>,
    migrations: MigrateAll,
    page_size: usize,
    discovery: bool,
    discover: Option<DiscoverHook>,
}

impl CatchUpSync {
    pub fn new(ctx: &AgentContext, migrations: MigrateAll) -> Self {
        Self {
            client: Arc::clone(&ctx.client),
            cache: Arc::clone(&ctx.cache),
            migrations,
            page_size: ctx.config.central.page_size,
            discovery: ctx.config.is_discovery(),
            discover: None,
        }
    }

    pub fn with_discover(mut self, hook: DiscoverHook) -> Self {
        self.discover = Some(hook);
        self
    }

    /// Run one pass. Safe to repeat.
    #[instrument(skip(self))]
    pub async fn execute(&self) -> Result<CatchUpReport> {
        let mut report = CatchUpReport::default();

        for service in self.fetch(KnownKind::ApiService, &PUBLISHED_FIELDS).await? {
            let service = self.migrations.migrate(service).await?;
            if external_api_id(&service).is_none() {
                debug!(name = %service.name, "Skipping service without external API id");
                report.skipped += 1;
                continue;
            }
            self.cache.add(service).await?;
            report.services += 1;
        }

        for instance in self.fetch(KnownKind::ApiServiceInstance, &PUBLISHED_FIELDS).await? {
            if external_api_id(&instance).is_none() {
                debug!(name = %instance.name, "Skipping instance without external API id");
                report.skipped += 1;
                continue;
            }
            self.cache.add(instance).await?;
            report.instances += 1;
        }

        for kind in [
            KnownKind::Category,
            KnownKind::AccessRequestDefinition,
            KnownKind::CredentialRequestDefinition,
        ] {
            match self.fetch(kind, &[]).await {
                Ok(items) => report.other += self.load(items).await?,
                Err(e) => warn!(kind = %kind, error = %e, code = e.code(), "Failed to load sub-cache"),
            }
        }

        if self.discovery {
            for kind in [KnownKind::ManagedApplication, KnownKind::Credential] {
                let items = self.fetch(kind, &[]).await?;
                report.other += self.load(items).await?;
            }

            let requests = self.fetch(KnownKind::AccessRequest, &[]).await?;
            for request in &requests {
                match request.reference("Subscription") {
                    Some(sub) => self.cache.link_subscription(request.id(), &sub.name).await,
                    None => debug!(name = %request.name, "Access request has no subscription reference"),
                }
            }
            report.other += self.load(requests).await?;
        }

        if let Some(discover) = &self.discover {
            discover().await?;
        }

        info!(
            services = report.services,
            instances = report.instances,
            skipped = report.skipped,
            other = report.other,
            "Catch-up pass complete"
        );
        Ok(report)
    }

    async fn fetch(&self, kind: KnownKind, fields: &[&str]) -> Result<Vec<ResourceInstance>> {
        list_all(self.client.as_ref(), kind, fields, self.page_size).await
    }

    async fn load(&self, items: Vec<ResourceInstance>) -> Result<usize> {
        let count = items.len();
        for item in items {
            self.cache.add(item).await?;
        }
        Ok(count)
    }
}

/// External id from `x-agent-details`, or the legacy attribute.
fn external_api_id(resource: &ResourceInstance) -> Option<String> {
    resource.agent_details().external_api_id.or_else(|| {
        resource
            .attributes
            .get(details::EXTERNAL_API_ID)
            .filter(|v| !v.is_empty())
            .cloned()
    })
}
