//! Applies watch events to the cache and to registered handlers.
//!
//! For every event except deletes, the full resource is fetched by self
//! link (the event payload is only a reference). The resource is passed to
//! each handler in registration order; the sequence advances only once all
//! handlers have succeeded.

use std::sync::Arc;

use agentsdk_events::{EventMeta, EventType, SequenceProvider, WatchEvent};
use agentsdk_resource::{KnownKind, ResourceInstance};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::acl::AclReconciler;
use crate::cache::ResourceCache;
use crate::client::CentralClient;
use crate::error::{AgentError, Result};
use crate::status::Activity;

/// Reacts to one applied event.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        action: EventType,
        meta: &EventMeta,
        resource: &ResourceInstance,
    ) -> Result<()>;
}

/// Mirrors events into the resource cache.
pub struct CacheHandler {
    cache: Arc<ResourceCache>,
}

impl CacheHandler {
    pub fn new(cache: Arc<ResourceCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Handler for CacheHandler {
    async fn handle(
        &self,
        action: EventType,
        _meta: &EventMeta,
        resource: &ResourceInstance,
    ) -> Result<()> {
        let kind = resource.known_kind()?;
        match action {
            EventType::Deleted => {
                let key = if resource.id().is_empty() {
                    &resource.name
                } else {
                    resource.id()
                };
                if self.cache.delete(kind, key).await.is_none() {
                    debug!(kind = %kind, key, "Deleted resource was not cached");
                }
            }
            EventType::Created | EventType::Updated | EventType::SubresourceUpdated => {
                self.cache.add(resource.clone()).await?;
                if kind == KnownKind::AccessRequest {
                    if let Some(sub) = resource.reference("Subscription") {
                        self.cache.link_subscription(resource.id(), &sub.name).await;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Feeds service owners to the team ACL.
pub struct AclHandler {
    acl: AclReconciler,
}

impl AclHandler {
    pub fn new(acl: AclReconciler) -> Self {
        Self { acl }
    }
}

#[async_trait]
impl Handler for AclHandler {
    async fn handle(
        &self,
        action: EventType,
        _meta: &EventMeta,
        resource: &ResourceInstance,
    ) -> Result<()> {
        if action.is_delete() || resource.known_kind().ok() != Some(KnownKind::ApiService) {
            return Ok(());
        }
        if let Some(team) = resource.owner_team_id() {
            self.acl.add_team(team).await;
        }
        Ok(())
    }
}

pub struct EventListener {
    client: Arc<dyn CentralClient>,
    sequence: Arc<dyn SequenceProvider>,
    activity: Arc<Activity>,
    handlers: Vec<Arc<dyn Handler>>,
}

impl EventListener {
    pub fn new(
        client: Arc<dyn CentralClient>,
        sequence: Arc<dyn SequenceProvider>,
        activity: Arc<Activity>,
    ) -> Self {
        Self {
            client,
            sequence,
            activity,
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Apply a single event.
    pub async fn handle_event(&self, event: &WatchEvent) -> Result<()> {
        let resource = if event.event_type.is_delete() {
            event.payload.clone()
        } else {
            match self.client.get(event.payload.self_link()).await {
                Ok(resource) => resource,
                Err(AgentError::NotFound(_)) => {
                    // Gone again before we could read it; a delete event follows.
                    debug!(
                        self_link = %event.payload.self_link(),
                        sequence_id = event.sequence_id(),
                        "Resource from event no longer exists"
                    );
                    self.sequence.set_sequence(event.sequence_id());
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        };

        for handler in &self.handlers {
            handler
                .handle(event.event_type, &event.metadata, &resource)
                .await?;
        }

        self.sequence.set_sequence(event.sequence_id());
        self.activity.record();
        Ok(())
    }

    /// Apply events until the channel closes.
    pub async fn listen(&self, mut rx: mpsc::Receiver<WatchEvent>) -> usize {
        let mut applied = 0;
        while let Some(event) = rx.recv().await {
            match self.handle_event(&event).await {
                Ok(()) => applied += 1,
                Err(e) => warn!(
                    event_type = %event.event_type,
                    kind = %event.payload.kind,
                    name = %event.payload.name,
                    sequence_id = event.sequence_id(),
                    error = %e,
                    code = e.code(),
                    "Failed to apply event"
                ),
            }
        }
        applied
    }
}
