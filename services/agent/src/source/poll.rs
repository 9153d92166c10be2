//! Polling event source.

use std::sync::Arc;
use std::time::Duration;

use agentsdk_events::SequenceProvider;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::harvester::Harvester;
use super::listener::EventListener;
use super::{catch_up, EventSource, OnStop, SessionState};
use crate::error::Result;

/// Replays the event log on a fixed interval.
pub struct PollSource {
    harvester: Arc<dyn Harvester>,
    listener: Arc<EventListener>,
    sequence: Arc<dyn SequenceProvider>,
    topic_self_link: String,
    interval: Duration,
    on_stop: Option<OnStop>,
    stop_tx: watch::Sender<bool>,
    session: SessionState,
}

impl PollSource {
    pub fn new(
        harvester: Arc<dyn Harvester>,
        listener: Arc<EventListener>,
        sequence: Arc<dyn SequenceProvider>,
        topic_self_link: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            harvester,
            listener,
            sequence,
            topic_self_link: topic_self_link.into(),
            interval,
            on_stop: None,
            stop_tx,
            session: SessionState::default(),
        }
    }

    /// Hook run when a replay fails with anything but a purged sequence.
    pub fn with_on_stop(mut self, on_stop: OnStop) -> Self {
        self.on_stop = Some(on_stop);
        self
    }

    async fn poll(&self) -> Result<()> {
        catch_up(
            self.harvester.as_ref(),
            &self.listener,
            self.sequence.as_ref(),
            &self.topic_self_link,
            self.on_stop.as_ref(),
        )
        .await
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<()> {
        self.poll().await?;
        self.session.connected();
        info!(
            topic = %self.topic_self_link,
            sequence_id = self.sequence.get_sequence(),
            interval_secs = self.interval.as_secs(),
            "Polling for events"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll().await?;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("Poll session stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EventSource for PollSource {
    fn name(&self) -> &str {
        "poll"
    }

    async fn start(&self) -> Result<()> {
        self.stop_tx.send_replace(false);
        let stop = self.stop_tx.subscribe();

        let result = self.run(stop).await;
        self.session.ended(&result);
        result
    }

    async fn status(&self) -> Result<()> {
        self.session.status()
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
