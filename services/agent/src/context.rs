//! Shared handles passed to every component.

use std::sync::Arc;

use crate::cache::ResourceCache;
use crate::client::CentralClient;
use crate::config::Config;
use crate::healthcheck::HealthRegistry;
use crate::jobs::JobPool;
use crate::status::Activity;
use crate::validator::PublishGate;

/// Everything a component needs from the running agent.
///
/// Built once at startup; cloning is cheap.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<Config>,
    pub cache: Arc<ResourceCache>,
    pub client: Arc<dyn CentralClient>,
    pub health: Arc<HealthRegistry>,
    pub jobs: Arc<JobPool>,
    pub publish_gate: Arc<PublishGate>,
    pub activity: Arc<Activity>,
}

impl AgentContext {
    pub fn new(config: Config, cache: Arc<ResourceCache>, client: Arc<dyn CentralClient>) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            client,
            health: Arc::new(HealthRegistry::new()),
            jobs: Arc::new(JobPool::new()),
            publish_gate: Arc::new(PublishGate::new()),
            activity: Arc::new(Activity::new()),
        }
    }

    pub fn environment(&self) -> &str {
        &self.config.central.environment
    }
}
