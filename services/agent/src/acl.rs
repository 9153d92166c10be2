//! Access control list reconciliation.
//!
//! [`AclReconciler`] keeps the environment's team ACL in step with the teams
//! that own published services. New team ids are collected into a pending
//! set and pushed in one batch once a debounce window elapses:
//!
//! - `existing` holds subjects already pushed, `pending` those waiting
//! - both sets share one lock; the debounce timer has its own, so a new
//!   arrival never waits on an in-flight push
//! - a failed push leaves `pending` untouched; the next arrival retries
//!
//! [`AgentKindsAclJob`] checks the agent kinds ACL on an interval and
//! replaces it wholesale when any required rule is missing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agentsdk_resource::acl::{self, AccessControlListSpec};
use agentsdk_resource::{KnownKind, ResourceInstance};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::ResourceCache;
use crate::client::{create_or_update, CentralClient};
use crate::context::AgentContext;
use crate::error::{AgentError, Result};
use crate::healthcheck::{HealthRegistry, HealthStatus};
use crate::jobs::Job;

#[derive(Debug, Default)]
struct Subjects {
    existing: BTreeSet<String>,
    pending: BTreeSet<String>,
}

struct Inner {
    client: Arc<dyn CentralClient>,
    cache: Arc<ResourceCache>,
    environment: String,
    debounce: Duration,
    subjects: Mutex<Subjects>,
    timer: StdMutex<Option<JoinHandle<()>>>,
}

/// Debounced reconciler for the `{env}-agent-acl` resource.
#[derive(Clone)]
pub struct AclReconciler {
    inner: Arc<Inner>,
}

impl AclReconciler {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: Arc::clone(&ctx.client),
                cache: Arc::clone(&ctx.cache),
                environment: ctx.environment().to_string(),
                debounce: ctx.config.acl_debounce,
                subjects: Mutex::new(Subjects::default()),
                timer: StdMutex::new(None),
            }),
        }
    }

    pub fn acl_name(&self) -> String {
        acl::team_acl_name(&self.inner.environment)
    }

    /// Seed `existing` from the ACL currently on the control plane.
    #[instrument(skip(self), fields(acl = %self.acl_name()))]
    pub async fn initialize(&self) -> Result<()> {
        let name = self.acl_name();
        let current = match self.inner.cache.get_by_name(KnownKind::AccessControlList, &name).await {
            Some(acl) => Some(acl),
            None => {
                let link = ResourceInstance::new(KnownKind::AccessControlList, &name, &self.inner.environment);
                match self.inner.client.get(link.self_link()).await {
                    Ok(acl) => {
                        self.inner.cache.add(acl.clone()).await?;
                        Some(acl)
                    }
                    Err(AgentError::NotFound(_)) => None,
                    Err(e) => return Err(e),
                }
            }
        };

        let Some(current) = current else {
            debug!("No team ACL exists yet");
            return Ok(());
        };

        let team_ids = AccessControlListSpec::from_resource(&current)?.team_ids();
        let mut subjects = self.inner.subjects.lock().await;
        subjects.existing.extend(team_ids);
        info!(subjects = subjects.existing.len(), "Seeded team ACL subjects");
        Ok(())
    }

    /// Record a team id observed on a service.
    pub async fn add_team(&self, team_id: &str) {
        if team_id.is_empty() {
            return;
        }
        {
            let mut subjects = self.inner.subjects.lock().await;
            if subjects.existing.contains(team_id) || subjects.pending.contains(team_id) {
                return;
            }
            subjects.pending.insert(team_id.to_string());
            debug!(team_id, pending = subjects.pending.len(), "Queued ACL subject");
        }
        self.arm();
    }

    /// Queue every team owning a cached service.
    pub async fn sync_from_cache(&self) {
        for team_id in self.inner.cache.team_ids_in_services().await {
            self.add_team(&team_id).await;
        }
    }

    /// Start the debounce countdown unless one is already running.
    fn arm(&self) {
        let mut timer = self.inner.timer.lock().unwrap_or_else(|p| p.into_inner());
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let reconciler = self.clone();
        let debounce = self.inner.debounce;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Countdown over; arrivals from here on start a new one.
            reconciler
                .inner
                .timer
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();
            if let Err(e) = reconciler.flush().await {
                warn!(error = %e, code = e.code(), "Team ACL push failed, subjects stay pending");
            }
        }));
    }

    /// Push `existing ∪ pending` as one create-or-update.
    ///
    /// Returns false when there was nothing pending.
    #[instrument(skip(self), fields(acl = %self.acl_name()))]
    pub async fn flush(&self) -> Result<bool> {
        let (merged, flushed) = {
            let subjects = self.inner.subjects.lock().await;
            if subjects.pending.is_empty() {
                return Ok(false);
            }
            let merged: Vec<String> = subjects
                .existing
                .union(&subjects.pending)
                .cloned()
                .collect();
            (merged, subjects.pending.clone())
        };

        let desired = acl::team_acl(&self.inner.environment, &merged);
        let saved = create_or_update(self.inner.client.as_ref(), &desired).await?;

        {
            let mut subjects = self.inner.subjects.lock().await;
            for id in &flushed {
                subjects.pending.remove(id);
            }
            subjects.existing.extend(flushed);
        }
        self.inner.cache.add(saved).await?;

        info!(subjects = merged.len(), "Pushed team ACL");
        Ok(true)
    }

    pub async fn existing(&self) -> Vec<String> {
        self.inner.subjects.lock().await.existing.iter().cloned().collect()
    }

    pub async fn pending(&self) -> Vec<String> {
        self.inner.subjects.lock().await.pending.iter().cloned().collect()
    }

    /// Cancel a running countdown without pushing.
    pub fn stop(&self) {
        let timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = timer {
            handle.abort();
        }
    }
}

/// Keeps `{env}-agent-kinds-acl` granting every agent kind.
pub struct AgentKindsAclJob {
    client: Arc<dyn CentralClient>,
    cache: Arc<ResourceCache>,
    health: Arc<HealthRegistry>,
    environment: String,
}

impl AgentKindsAclJob {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            client: Arc::clone(&ctx.client),
            cache: Arc::clone(&ctx.cache),
            health: Arc::clone(&ctx.health),
            environment: ctx.environment().to_string(),
        }
    }

    async fn current(&self, name: &str) -> Result<Option<ResourceInstance>> {
        if let Some(acl) = self.cache.get_by_name(KnownKind::AccessControlList, name).await {
            return Ok(Some(acl));
        }
        let link = ResourceInstance::new(KnownKind::AccessControlList, name, &self.environment);
        match self.client.get(link.self_link()).await {
            Ok(acl) => Ok(Some(acl)),
            Err(AgentError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether `current` lacks any required rule.
    fn needs_replace(current: Option<&ResourceInstance>) -> bool {
        let Some(current) = current else {
            return true;
        };
        match AccessControlListSpec::from_resource(current) {
            Ok(spec) => !spec.grants_all(&acl::agent_kinds_access()),
            Err(e) => {
                warn!(error = %e, "Unreadable agent kinds ACL, replacing");
                true
            }
        }
    }
}

#[async_trait]
impl Job for AgentKindsAclJob {
    async fn ready(&self) -> bool {
        self.health.global_status().await.is_ok()
    }

    async fn status(&self) -> Result<()> {
        match self.health.global_status().await {
            HealthStatus::Ok => Ok(()),
            HealthStatus::Fail(reason) => Err(AgentError::Transport(reason)),
        }
    }

    async fn execute(&self) -> Result<()> {
        let name = acl::agent_kinds_acl_name(&self.environment);
        let current = self.current(&name).await?;
        if !Self::needs_replace(current.as_ref()) {
            return Ok(());
        }

        let desired = acl::agent_kinds_acl(&self.environment);
        let saved = create_or_update(self.client.as_ref(), &desired).await?;
        self.cache.add(saved).await?;
        info!(acl = %name, "Replaced agent kinds ACL");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_replace() {
        assert!(AgentKindsAclJob::needs_replace(None));

        let good = acl::agent_kinds_acl("prod");
        assert!(!AgentKindsAclJob::needs_replace(Some(&good)));

        let partial = acl::team_acl("prod", &["team-a".to_string()]);
        assert!(AgentKindsAclJob::needs_replace(Some(&partial)));
    }
}
