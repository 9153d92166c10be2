//! Streaming event source.
//!
//! The push connection itself sits behind [`WatchTransport`]; the source
//! owns session lifecycle: replay first, then open the transport at the
//! caught-up sequence and apply whatever it delivers.

use std::sync::Arc;

use agentsdk_events::{SequenceProvider, WatchEvent};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::harvester::Harvester;
use super::listener::EventListener;
use super::{catch_up, EventSource, OnStop, SessionState};
use crate::error::{AgentError, Result};

/// Push connection to the watch topic.
#[async_trait]
pub trait WatchTransport: Send + Sync {
    /// Subscribe from `sequence`. The returned channel closes when the
    /// connection drops.
    async fn open(&self, topic_self_link: &str, sequence: i64) -> Result<mpsc::Receiver<WatchEvent>>;

    fn is_connected(&self) -> bool;

    async fn close(&self);
}

pub struct StreamSource {
    harvester: Arc<dyn Harvester>,
    transport: Arc<dyn WatchTransport>,
    listener: Arc<EventListener>,
    sequence: Arc<dyn SequenceProvider>,
    topic_self_link: String,
    on_stop: Option<OnStop>,
    stop_tx: watch::Sender<bool>,
    session: SessionState,
}

impl StreamSource {
    pub fn new(
        harvester: Arc<dyn Harvester>,
        transport: Arc<dyn WatchTransport>,
        listener: Arc<EventListener>,
        sequence: Arc<dyn SequenceProvider>,
        topic_self_link: impl Into<String>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            harvester,
            transport,
            listener,
            sequence,
            topic_self_link: topic_self_link.into(),
            on_stop: None,
            stop_tx,
            session: SessionState::default(),
        }
    }

    pub fn with_on_stop(mut self, on_stop: OnStop) -> Self {
        self.on_stop = Some(on_stop);
        self
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<()> {
        catch_up(
            self.harvester.as_ref(),
            &self.listener,
            self.sequence.as_ref(),
            &self.topic_self_link,
            self.on_stop.as_ref(),
        )
        .await?;

        let from = self.sequence.get_sequence();
        let rx = self.transport.open(&self.topic_self_link, from).await?;
        self.session.connected();
        info!(topic = %self.topic_self_link, sequence_id = from, "Watch stream connected");

        tokio::select! {
            applied = self.listener.listen(rx) => {
                warn!(applied, "Watch stream closed");
                Err(AgentError::Transport("watch stream closed".to_string()))
            }
            _ = async { stop.wait_for(|stopped| *stopped).await.map(|_| ()) } => {
                debug!("Stream session stopping");
                self.transport.close().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventSource for StreamSource {
    fn name(&self) -> &str {
        "stream"
    }

    async fn start(&self) -> Result<()> {
        self.stop_tx.send_replace(false);
        let stop = self.stop_tx.subscribe();

        let result = self.run(stop).await;
        self.session.ended(&result);
        result
    }

    async fn status(&self) -> Result<()> {
        self.session.status()?;
        if !self.transport.is_connected() {
            return Err(AgentError::Transport("watch stream disconnected".to_string()));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
