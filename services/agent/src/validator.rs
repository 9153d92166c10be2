//! Orphan instance and service cleanup.
//!
//! [`InstanceValidator`] asks a caller-supplied [`ApiValidator`] whether
//! each cached instance still exists on the dataplane. Instances that do not
//! are deleted, and services left with no instances are deleted after them
//! in the same run.
//!
//! [`PublishGate`] keeps validation and publishing mutually exclusive:
//! publishers hold a [`PublishGuard`] while writing, the validator holds a
//! [`ValidationGuard`] for the whole run.

use std::sync::Arc;
use std::time::Duration;

use agentsdk_resource::{KnownKind, ResourceInstance};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::cache::ResourceCache;
use crate::client::CentralClient;
use crate::context::AgentContext;
use crate::error::{AgentError, Result};
use crate::jobs::Job;

/// Returns whether the API with the given external id and stage still
/// exists on the dataplane.
pub type ApiValidator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Longest the validator waits for in-flight publishing.
pub const MAX_PUBLISH_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, Copy)]
struct GateState {
    publishing: usize,
    validating: bool,
}

/// Coordination between publishing and validation.
#[derive(Clone)]
pub struct PublishGate {
    tx: Arc<watch::Sender<GateState>>,
}

impl Default for PublishGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Wait until no validation is running, then register a publisher.
    pub async fn begin_publish(&self) -> PublishGuard {
        let mut rx = self.tx.subscribe();
        loop {
            if rx.wait_for(|s| !s.validating).await.is_err() {
                break;
            }
            let entered = self.tx.send_if_modified(|s| {
                if s.validating {
                    return false;
                }
                s.publishing += 1;
                true
            });
            if entered {
                break;
            }
        }
        PublishGuard {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Claim the validating slot.
    ///
    /// Returns `None` if another validation holds it, or if publishing did
    /// not drain within `max_wait`.
    pub async fn try_begin_validation(&self, max_wait: Duration) -> Option<ValidationGuard> {
        if self.tx.borrow().validating {
            return None;
        }

        let mut rx = self.tx.subscribe();
        let claim = async {
            loop {
                rx.wait_for(|s| s.publishing == 0 || s.validating).await.ok()?;
                let mut already_validating = false;
                let claimed = self.tx.send_if_modified(|s| {
                    if s.validating {
                        already_validating = true;
                        return false;
                    }
                    if s.publishing > 0 {
                        return false;
                    }
                    s.validating = true;
                    true
                });
                if claimed {
                    return Some(());
                }
                if already_validating {
                    return None;
                }
            }
        };

        match tokio::time::timeout(max_wait, claim).await {
            Ok(Some(())) => Some(ValidationGuard {
                tx: Arc::clone(&self.tx),
            }),
            Ok(None) => None,
            Err(_) => {
                warn!(max_wait_secs = max_wait.as_secs(), "Timed out waiting for publishing to finish");
                None
            }
        }
    }

    pub fn is_validating(&self) -> bool {
        self.tx.borrow().validating
    }

    pub fn publishing(&self) -> usize {
        self.tx.borrow().publishing
    }
}

/// Held while publishing.
pub struct PublishGuard {
    tx: Arc<watch::Sender<GateState>>,
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|s| s.publishing = s.publishing.saturating_sub(1));
    }
}

/// Held while validating.
pub struct ValidationGuard {
    tx: Arc<watch::Sender<GateState>>,
}

impl Drop for ValidationGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|s| s.validating = false);
    }
}

/// Outcome of one validation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub skipped: bool,
    pub instances_removed: Vec<String>,
    pub services_removed: Vec<String>,
}

pub struct InstanceValidator {
    client: Arc<dyn CentralClient>,
    cache: Arc<ResourceCache>,
    gate: Arc<PublishGate>,
    api_validator: ApiValidator,
    max_wait: Duration,
}

impl InstanceValidator {
    pub fn new(ctx: &AgentContext, api_validator: ApiValidator) -> Self {
        Self {
            client: Arc::clone(&ctx.client),
            cache: Arc::clone(&ctx.cache),
            gate: Arc::clone(&ctx.publish_gate),
            api_validator,
            max_wait: MAX_PUBLISH_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Run both passes once.
    #[instrument(skip(self))]
    pub async fn validate(&self) -> Result<ValidationReport> {
        let Some(_guard) = self.gate.try_begin_validation(self.max_wait).await else {
            debug!("Validation already running or publishing busy, skipping");
            return Ok(ValidationReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = ValidationReport::default();

        for instance in self.cache.list(KnownKind::ApiServiceInstance).await {
            let details = instance.agent_details();
            let Some(api_id) = details.external_api_id else {
                continue;
            };
            let stage = details.stage.unwrap_or_default();
            if (self.api_validator)(&api_id, &stage) {
                continue;
            }

            info!(instance = %instance.name, api_id = %api_id, stage = %stage, "API no longer on dataplane, removing instance");
            if self.remove(KnownKind::ApiServiceInstance, &instance).await {
                report.instances_removed.push(instance.name.clone());
            }
        }

        for service in self.cache.list(KnownKind::ApiService).await {
            if self.cache.instance_count_for_service(&service).await > 0 {
                continue;
            }
            info!(service = %service.name, "Service has no instances, removing");
            if self.remove(KnownKind::ApiService, &service).await {
                report.services_removed.push(service.name.clone());
            }
        }

        Ok(report)
    }

    /// Delete remotely, then from cache. A remote 404 still clears the cache.
    async fn remove(&self, kind: KnownKind, resource: &ResourceInstance) -> bool {
        match self.client.delete(resource).await {
            Ok(()) | Err(AgentError::NotFound(_)) => {}
            Err(e) => {
                warn!(kind = %kind, name = %resource.name, error = %e, code = e.code(), "Failed to delete resource");
                return false;
            }
        }

        let key = if resource.id().is_empty() {
            resource.name.as_str()
        } else {
            resource.id()
        };
        self.cache.delete(kind, key).await;
        true
    }
}

#[async_trait]
impl Job for InstanceValidator {
    async fn execute(&self) -> Result<()> {
        let report = self.validate().await?;
        if !report.skipped {
            debug!(
                instances_removed = report.instances_removed.len(),
                services_removed = report.services_removed.len(),
                "Instance validation complete"
            );
        }
        Ok(())
    }
}
