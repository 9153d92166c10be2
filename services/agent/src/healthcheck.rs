//! Named health checks and the agent's global health.
//!
//! Components register a check under an endpoint name. A detached job calls
//! [`HealthRegistry::run_checks`] periodically; the global status is `Ok`
//! only when every registered check last passed.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentsdk_resource::AgentStatus;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::jobs::Job;

/// Result of a single health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Fail(String),
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }
}

/// Something whose health can be probed.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, name: &str) -> HealthStatus;
}

struct CheckEntry {
    check: Arc<dyn HealthCheck>,
    last: HealthStatus,
}

/// Registry of named health checks.
#[derive(Default)]
pub struct HealthRegistry {
    checks: RwLock<BTreeMap<String, CheckEntry>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check and run it once so its initial state is known.
    pub async fn register(&self, name: &str, check: Arc<dyn HealthCheck>) {
        let last = check.check(name).await;
        debug!(endpoint = %name, healthy = last.is_ok(), "Registered health check");
        let mut checks = self.checks.write().await;
        checks.insert(name.to_string(), CheckEntry { check, last });
    }

    pub async fn unregister(&self, name: &str) {
        self.checks.write().await.remove(name);
    }

    /// Run every check and record the results.
    pub async fn run_checks(&self) -> HealthStatus {
        let snapshot: Vec<(String, Arc<dyn HealthCheck>)> = {
            let checks = self.checks.read().await;
            checks
                .iter()
                .map(|(name, e)| (name.clone(), Arc::clone(&e.check)))
                .collect()
        };

        let mut results = Vec::with_capacity(snapshot.len());
        for (name, check) in snapshot {
            let status = check.check(&name).await;
            if let HealthStatus::Fail(reason) = &status {
                warn!(endpoint = %name, reason = %reason, "Health check failed");
            }
            results.push((name, status));
        }

        {
            let mut checks = self.checks.write().await;
            for (name, status) in results {
                if let Some(entry) = checks.get_mut(&name) {
                    entry.last = status;
                }
            }
        }

        self.global_status().await
    }

    /// Status of a single endpoint, if registered.
    pub async fn status(&self, name: &str) -> Option<HealthStatus> {
        self.checks.read().await.get(name).map(|e| e.last.clone())
    }

    /// First failing endpoint, or `Ok`.
    pub async fn global_status(&self) -> HealthStatus {
        let checks = self.checks.read().await;
        checks
            .iter()
            .find_map(|(name, e)| match &e.last {
                HealthStatus::Fail(reason) => Some(HealthStatus::Fail(format!("{name}: {reason}"))),
                HealthStatus::Ok => None,
            })
            .unwrap_or(HealthStatus::Ok)
    }

    /// Agent status as seen by the healthcheck subsystem.
    pub async fn agent_status(&self) -> AgentStatus {
        match self.global_status().await {
            HealthStatus::Ok => AgentStatus::Running,
            HealthStatus::Fail(_) => AgentStatus::Unhealthy,
        }
    }
}

/// Periodic job that re-runs every registered check.
pub struct HealthCheckJob {
    registry: Arc<HealthRegistry>,
}

impl HealthCheckJob {
    pub fn new(registry: Arc<HealthRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Job for HealthCheckJob {
    async fn execute(&self) -> Result<()> {
        self.registry.run_checks().await;
        Ok(())
    }
}
