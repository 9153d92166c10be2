//! Event sources.
//!
//! An [`EventSource`] runs one session against the control plane's event
//! feed: it first replays everything after the cached sequence, then keeps
//! applying new events until the session ends or it is stopped. Sessions
//! are restarted by the supervisor.
//!
//! - [`poll::PollSource`] asks the replay endpoint on a fixed interval
//! - [`stream::StreamSource`] holds a push connection open

pub mod harvester;
pub mod listener;
pub mod poll;
pub mod stream;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{info, warn};

use agentsdk_events::SequenceProvider;

use crate::error::{AgentError, Result};
use crate::healthcheck::{HealthCheck, HealthStatus};
use harvester::{Harvester, HarvesterError};
use listener::EventListener;

/// Invoked when a session fails in a way that invalidates the cache.
pub type OnStop = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Buffered events between fetcher and listener.
pub const EVENT_BUFFER: usize = 100;

#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    /// Run one session. Returns when the session ends or `stop` is called.
    async fn start(&self) -> Result<()>;

    /// `Ok` while a session is connected and healthy.
    async fn status(&self) -> Result<()>;

    /// Ask a running session to end.
    fn stop(&self);

    async fn healthcheck(&self, name: &str) -> HealthStatus {
        match self.status().await {
            Ok(()) => HealthStatus::Ok,
            Err(e) => HealthStatus::Fail(format!("{} is not connected: {}", name, e)),
        }
    }
}

/// Adapter registering an event source with the health registry.
pub struct SourceHealth(pub Arc<dyn EventSource>);

#[async_trait]
impl HealthCheck for SourceHealth {
    async fn check(&self, name: &str) -> HealthStatus {
        self.0.healthcheck(name).await
    }
}

/// Connection state shared by the source implementations.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    inner: Mutex<SessionInner>,
}

#[derive(Debug, Default)]
struct SessionInner {
    connected: bool,
    last_error: Option<String>,
}

impl SessionState {
    pub(crate) fn connected(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.connected = true;
        inner.last_error = None;
    }

    pub(crate) fn ended(&self, result: &Result<()>) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.connected = false;
        inner.last_error = result.as_ref().err().map(|e| e.to_string());
    }

    pub(crate) fn status(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.connected {
            return Ok(());
        }
        Err(AgentError::Transport(
            inner
                .last_error
                .clone()
                .unwrap_or_else(|| "session not running".to_string()),
        ))
    }
}

/// Replay every event after the current sequence through `listener`.
///
/// Fetching and applying run concurrently; the call returns once every
/// fetched event has been applied. A purged sequence moves the position to
/// the server's max and is not an error. Any other failure runs `on_stop`
/// and is returned.
pub async fn catch_up(
    harvester: &dyn Harvester,
    listener: &EventListener,
    sequence: &dyn SequenceProvider,
    topic_self_link: &str,
    on_stop: Option<&OnStop>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let from = sequence.get_sequence();

    let fetch = async move {
        let result = harvester
            .receive_sync_events(topic_self_link, from, Some(&tx))
            .await;
        drop(tx);
        result
    };
    let (fetched, applied) = tokio::join!(fetch, listener.listen(rx));

    match fetched {
        Ok(last) => {
            if applied > 0 {
                info!(from_sequence = from, last_sequence = last, applied, "Caught up on events");
            }
            Ok(())
        }
        Err(HarvesterError::SequenceGone { requested, max }) => {
            warn!(requested, max, "Sequence purged, resuming from server max");
            sequence.set_sequence(max);
            Ok(())
        }
        Err(e) => {
            warn!(from_sequence = from, error = %e, "Event replay failed");
            if let Some(hook) = on_stop {
                hook().await;
            }
            Err(e.into())
        }
    }
}
