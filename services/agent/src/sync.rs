//! Startup synchronization and event source wiring.
//!
//! On start, [`EventSync`] either resumes from a persisted cache or builds
//! one from scratch:
//!
//! 1. ask the replay endpoint for the newest sequence id
//! 2. set the cursor one before it, so the newest event is applied once the
//!    event source is listening
//! 3. run a catch-up pass and persist the result
//!
//! It then starts the configured event source under the supervisor. A
//! source that loses its place in the log triggers a full rebuild.

use std::sync::{Arc, Mutex, Weak};

use agentsdk_events::SequenceProvider;
use futures_util::FutureExt;
use tracing::{error, info, instrument, warn};

use crate::acl::AclReconciler;
use crate::catchup::CatchUpSync;
use crate::config::{ConfigError, EventMode};
use crate::context::AgentContext;
use crate::error::Result;
use crate::source::harvester::Harvester;
use crate::source::listener::{AclHandler, CacheHandler, EventListener, Handler};
use crate::source::poll::PollSource;
use crate::source::stream::{StreamSource, WatchTransport};
use crate::source::{EventSource, OnStop, SourceHealth};
use crate::supervisor::RetryingSupervisor;

/// Health endpoint name for the event source.
pub const SOURCE_HEALTH_ENDPOINT: &str = "event-source";

pub struct EventSync {
    ctx: AgentContext,
    harvester: Arc<dyn Harvester>,
    transport: Option<Arc<dyn WatchTransport>>,
    catch_up: CatchUpSync,
    acl: Option<AclReconciler>,
    handlers: Vec<Arc<dyn Handler>>,
    topic_self_link: String,
    supervisor: Mutex<Option<Arc<RetryingSupervisor>>>,
}

impl EventSync {
    pub fn new(ctx: &AgentContext, harvester: Arc<dyn Harvester>, catch_up: CatchUpSync) -> Self {
        Self {
            ctx: ctx.clone(),
            harvester,
            transport: None,
            catch_up,
            acl: None,
            handlers: Vec::new(),
            topic_self_link: ctx.config.watch_topic_self_link(),
            supervisor: Mutex::new(None),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn WatchTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_acl(mut self, acl: AclReconciler) -> Self {
        self.acl = Some(acl);
        self
    }

    /// Extra handler run after the cache and ACL handlers.
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Bring the cache up to date and start the event source.
    #[instrument(skip(self), fields(topic = %self.topic_self_link))]
    pub async fn sync_cache(self: &Arc<Self>) -> Result<()> {
        if self.ctx.cache.has_loaded_persisted_cache() {
            info!(
                sequence_id = self.ctx.cache.get_sequence(),
                "Resuming from persisted cache"
            );
            if let Some(acl) = &self.acl {
                acl.sync_from_cache().await;
            }
        } else {
            self.init_cache().await?;
        }

        let source = self.build_source()?;
        self.ctx
            .health
            .register(SOURCE_HEALTH_ENDPOINT, Arc::new(SourceHealth(Arc::clone(&source))))
            .await;

        let supervisor = Arc::new(RetryingSupervisor::new(source, Arc::clone(&self.ctx.jobs)));
        supervisor.start();
        *self.supervisor.lock().unwrap_or_else(|p| p.into_inner()) = Some(supervisor);
        Ok(())
    }

    /// Build the cache from scratch and persist it.
    pub async fn init_cache(&self) -> Result<()> {
        let latest = self
            .harvester
            .receive_sync_events(&self.topic_self_link, 0, None)
            .await?;
        self.ctx.cache.sequence().reset(latest - 1);
        info!(latest_sequence = latest, "Initializing cache");

        if let Err(e) = self.catch_up.execute().await {
            error!(error = %e, code = e.code(), "Catch-up failed, flushing cache");
            self.ctx.cache.flush().await;
            return Err(e);
        }

        if let Some(acl) = &self.acl {
            acl.sync_from_cache().await;
        }

        if let Err(e) = self.ctx.cache.save_cache().await {
            warn!(error = %e, "Failed to persist cache");
        }
        Ok(())
    }

    /// Drop the cache and build it again.
    pub async fn rebuild_cache(&self) -> Result<()> {
        warn!("Rebuilding cache");
        self.ctx.cache.flush().await;
        self.init_cache().await
    }

    /// Stop the event source and its restarts.
    pub fn stop(&self) {
        let supervisor = self.supervisor.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(supervisor) = supervisor {
            supervisor.stop();
        }
    }

    pub fn supervisor(&self) -> Option<Arc<RetryingSupervisor>> {
        self.supervisor.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn build_listener(&self) -> Arc<EventListener> {
        let sequence: Arc<dyn SequenceProvider> = self.ctx.cache.clone();
        let mut listener = EventListener::new(
            Arc::clone(&self.ctx.client),
            sequence,
            Arc::clone(&self.ctx.activity),
        )
        .with_handler(Arc::new(CacheHandler::new(Arc::clone(&self.ctx.cache))));
        if let Some(acl) = &self.acl {
            listener = listener.with_handler(Arc::new(AclHandler::new(acl.clone())));
        }
        for handler in &self.handlers {
            listener = listener.with_handler(Arc::clone(handler));
        }
        Arc::new(listener)
    }

    fn build_source(self: &Arc<Self>) -> Result<Arc<dyn EventSource>> {
        let listener = self.build_listener();
        let sequence: Arc<dyn SequenceProvider> = self.ctx.cache.clone();
        let on_stop = rebuild_hook(Arc::downgrade(self));

        let source: Arc<dyn EventSource> = match self.ctx.config.event_mode {
            EventMode::Poll => Arc::new(
                PollSource::new(
                    Arc::clone(&self.harvester),
                    listener,
                    sequence,
                    self.topic_self_link.clone(),
                    self.ctx.config.central.poll_interval,
                )
                .with_on_stop(on_stop),
            ),
            EventMode::Stream => {
                let transport = self
                    .transport
                    .clone()
                    .ok_or(ConfigError::Missing("watch transport for stream mode"))?;
                Arc::new(
                    StreamSource::new(
                        Arc::clone(&self.harvester),
                        transport,
                        listener,
                        sequence,
                        self.topic_self_link.clone(),
                    )
                    .with_on_stop(on_stop),
                )
            }
        };
        Ok(source)
    }
}

fn rebuild_hook(sync: Weak<EventSync>) -> OnStop {
    Arc::new(move || {
        let sync = sync.clone();
        async move {
            let Some(sync) = sync.upgrade() else {
                return;
            };
            if let Err(e) = sync.rebuild_cache().await {
                error!(error = %e, code = e.code(), "Cache rebuild failed");
            }
        }
        .boxed()
    })
}
