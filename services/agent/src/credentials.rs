//! Credential expiry job.
//!
//! Runs on the configured cron schedule (hourly by default). For discovery
//! agents with deprovisioning enabled, every cached credential whose expiry
//! is in the past and which is not already inactive is marked inactive:
//!
//! 1. state becomes `inactive` with reason `agent.credential.expired`
//! 2. status level becomes `Pending`
//! 3. the full resource is updated, then `status` and `state` are patched
//!
//! Credentials are processed concurrently with a fixed bound; the run
//! completes only after every credential has been handled.

use std::sync::Arc;

use agentsdk_resource::credential::{Credential, STATE, STATUS};
use agentsdk_resource::{KnownKind, Patch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument};

use crate::cache::ResourceCache;
use crate::client::CentralClient;
use crate::context::AgentContext;
use crate::error::Result;
use crate::jobs::Job;

/// Credentials updated at the same time.
const MAX_CONCURRENT: usize = 8;

/// Outcome of one scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryReport {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct CredentialExpiryJob {
    client: Arc<dyn CentralClient>,
    cache: Arc<ResourceCache>,
    enabled: bool,
}

impl CredentialExpiryJob {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            client: Arc::clone(&ctx.client),
            cache: Arc::clone(&ctx.cache),
            enabled: ctx.config.is_discovery() && ctx.config.central.credentials.deprovision_expired,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Scan every cached credential against `now`.
    #[instrument(skip(self))]
    pub async fn scan(&self, now: DateTime<Utc>) -> ExpiryReport {
        if !self.enabled {
            debug!("Credential deprovisioning disabled, skipping scan");
            return ExpiryReport::default();
        }

        let group = KnownKind::Credential.group();
        let keys = self
            .cache
            .watch_resource_keys(group, KnownKind::Credential.kind())
            .await;
        let scanned = keys.len();

        let outcomes: Vec<Outcome> = stream::iter(keys)
            .map(|key| self.validate(key, now))
            .buffer_unordered(MAX_CONCURRENT)
            .collect()
            .await;

        let report = ExpiryReport {
            scanned,
            expired: outcomes.iter().filter(|o| **o == Outcome::Expired).count(),
            failed: outcomes.iter().filter(|o| **o == Outcome::Failed).count(),
        };
        info!(
            scanned = report.scanned,
            expired = report.expired,
            failed = report.failed,
            "Credential expiry scan complete"
        );
        report
    }

    async fn validate(&self, key: String, now: DateTime<Utc>) -> Outcome {
        let Some(resource) = self.cache.get_watch_resource_by_key(&key).await else {
            error!(cache_key = %key, "Credential disappeared from cache");
            return Outcome::Failed;
        };

        let mut cred = match Credential::from_resource(resource) {
            Ok(cred) => cred,
            Err(e) => {
                error!(cache_key = %key, error = %e, "Could not read credential");
                return Outcome::Failed;
            }
        };

        if !cred.is_expired(now) || cred.is_inactive() {
            return Outcome::Untouched;
        }

        info!(
            cache_key = %key,
            credential = %cred.resource.name,
            expired_at = ?cred.expires_at,
            "Credential has expired, deprovisioning"
        );
        cred.expire(now);

        match self.push(&cred).await {
            Ok(()) => Outcome::Expired,
            Err(e) => {
                error!(cache_key = %key, error = %e, code = e.code(), "Failed to expire credential");
                Outcome::Failed
            }
        }
    }

    async fn push(&self, cred: &Credential) -> Result<()> {
        let updated = self.client.update(&cred.resource).await?;

        let mut patches = Vec::with_capacity(2);
        for name in [STATUS, STATE] {
            if let Some(value) = cred.resource.sub_resource(name) {
                patches.push(Patch::replace_sub_resource(name, value.clone()));
            }
        }
        let patched = self.client.patch_sub_resources(&updated, &patches).await?;

        // Keep local state authoritative for the sub-resources just written.
        let mut cached = patched;
        for name in [STATUS, STATE] {
            if let Some(value) = cred.resource.sub_resource(name) {
                cached.set_sub_resource(name, value.clone());
            }
        }
        self.cache.add(cached).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Untouched,
    Expired,
    Failed,
}

#[async_trait]
impl Job for CredentialExpiryJob {
    async fn execute(&self) -> Result<()> {
        self.scan(Utc::now()).await;
        Ok(())
    }
}
