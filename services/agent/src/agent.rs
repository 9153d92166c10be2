//! Agent assembly and lifecycle.
//!
//! [`AgentBuilder`] wires the engine from a [`Config`] plus optional
//! collaborators; anything not supplied falls back to the HTTP
//! implementations. [`Agent::start`] syncs the cache and registers every
//! job; [`Agent::shutdown`] reports `Stopped` and stops the pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::acl::{AclReconciler, AgentKindsAclJob};
use crate::cache::store::CacheStore;
use crate::cache::ResourceCache;
use crate::catchup::{CatchUpSync, DiscoverHook};
use crate::client::{CentralClient, HttpCentralClient};
use crate::config::Config;
use crate::context::AgentContext;
use crate::credentials::CredentialExpiryJob;
use crate::error::Result;
use crate::healthcheck::HealthCheckJob;
use crate::jobs::Schedule;
use crate::migrate::{AgentDetailsMigration, MigrateAll, Migrator};
use crate::source::harvester::{Harvester, HttpHarvester};
use crate::source::listener::Handler;
use crate::source::stream::WatchTransport;
use crate::status::StatusReporter;
use crate::sync::EventSync;
use crate::validator::{ApiValidator, InstanceValidator};

/// How often registered health checks are re-run.
pub const HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(10);

pub struct AgentBuilder {
    config: Config,
    client: Option<Arc<dyn CentralClient>>,
    harvester: Option<Arc<dyn Harvester>>,
    transport: Option<Arc<dyn WatchTransport>>,
    api_validator: Option<ApiValidator>,
    migrations: Vec<Arc<dyn Migrator>>,
    handlers: Vec<Arc<dyn Handler>>,
    discover: Option<DiscoverHook>,
}

impl AgentBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: None,
            harvester: None,
            transport: None,
            api_validator: None,
            migrations: Vec::new(),
            handlers: Vec::new(),
            discover: None,
        }
    }

    pub fn client(mut self, client: Arc<dyn CentralClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn harvester(mut self, harvester: Arc<dyn Harvester>) -> Self {
        self.harvester = Some(harvester);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn WatchTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Enables orphan cleanup for discovery agents.
    pub fn api_validator(mut self, validator: ApiValidator) -> Self {
        self.api_validator = Some(validator);
        self
    }

    /// Runs after the built-in migrations.
    pub fn migration(mut self, migrator: Arc<dyn Migrator>) -> Self {
        self.migrations.push(migrator);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn discover(mut self, hook: DiscoverHook) -> Self {
        self.discover = Some(hook);
        self
    }

    pub fn build(self) -> Result<Agent> {
        self.config.validate()?;

        let topic = self.config.watch_topic_name();
        let cache = match &self.config.cache.persist_path {
            Some(path) => ResourceCache::with_store(topic, CacheStore::open(path)?)?,
            None => ResourceCache::new(topic),
        };

        let client: Arc<dyn CentralClient> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpCentralClient::new(&self.config)?),
        };
        let harvester: Arc<dyn Harvester> = match self.harvester {
            Some(harvester) => harvester,
            None => Arc::new(HttpHarvester::new(&self.config)?),
        };

        let ctx = AgentContext::new(self.config, Arc::new(cache), Arc::clone(&client));

        let mut migrations =
            MigrateAll::new().with(Arc::new(AgentDetailsMigration::new(Arc::clone(&client))));
        for migrator in self.migrations {
            migrations = migrations.with(migrator);
        }

        let mut catch_up = CatchUpSync::new(&ctx, migrations);
        if let Some(hook) = self.discover {
            catch_up = catch_up.with_discover(hook);
        }

        let acl = AclReconciler::new(&ctx);
        let mut sync = EventSync::new(&ctx, harvester, catch_up).with_acl(acl.clone());
        if let Some(transport) = self.transport {
            sync = sync.with_transport(transport);
        }
        for handler in self.handlers {
            sync = sync.with_handler(handler);
        }

        let status = Arc::new(StatusReporter::new(&ctx));

        Ok(Agent {
            ctx,
            sync: Arc::new(sync),
            acl,
            status,
            api_validator: self.api_validator,
        })
    }
}

pub struct Agent {
    ctx: AgentContext,
    sync: Arc<EventSync>,
    acl: AclReconciler,
    status: Arc<StatusReporter>,
    api_validator: Option<ApiValidator>,
}

impl Agent {
    pub fn builder(config: Config) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn acl(&self) -> &AclReconciler {
        &self.acl
    }

    pub fn status(&self) -> &Arc<StatusReporter> {
        &self.status
    }

    pub fn event_sync(&self) -> &Arc<EventSync> {
        &self.sync
    }

    /// Sync the cache, start the event source and register every job.
    pub async fn start(&self) -> Result<()> {
        let config = &self.ctx.config;
        let jobs = &self.ctx.jobs;

        if let Err(e) = self.acl.initialize().await {
            warn!(error = %e, code = e.code(), "Could not read existing team ACL");
        }

        self.sync.sync_cache().await?;

        jobs.register(
            "healthcheck",
            Schedule::Detached(HEALTHCHECK_INTERVAL),
            Arc::new(HealthCheckJob::new(Arc::clone(&self.ctx.health))),
        );
        jobs.register(
            "agent-kinds-acl",
            Schedule::Interval(config.central.poll_interval),
            Arc::new(AgentKindsAclJob::new(&self.ctx)),
        );

        let credentials = CredentialExpiryJob::new(&self.ctx);
        if credentials.is_enabled() {
            let schedule = Schedule::cron(&config.central.credentials.expiry_schedule)?;
            jobs.register("credential-expiry", schedule, Arc::new(credentials));
        }

        match (&self.api_validator, config.is_discovery()) {
            (Some(validator), true) => {
                jobs.register(
                    "instance-validator",
                    Schedule::Interval(config.central.api_validation_frequency),
                    Arc::new(InstanceValidator::new(&self.ctx, Arc::clone(validator))),
                );
            }
            (None, true) => info!("No API validator supplied, orphan cleanup disabled"),
            _ => {}
        }

        self.status.register(jobs);

        info!(
            agent_type = ?config.agent_type,
            event_mode = ?config.event_mode,
            environment = %config.central.environment,
            jobs = jobs.job_names().len(),
            "Agent started"
        );
        Ok(())
    }

    /// Report `Stopped`, persist the cache and stop every job.
    pub async fn shutdown(&self) {
        self.sync.stop();
        self.acl.stop();

        if let Err(e) = self.status.report_stopped().await {
            warn!(error = %e, code = e.code(), "Failed to report stopped status");
        }
        if let Err(e) = self.ctx.cache.save_cache().await {
            warn!(error = %e, "Failed to persist cache on shutdown");
        }

        self.ctx.jobs.stop().await;
        info!("Agent stopped");
    }
}
