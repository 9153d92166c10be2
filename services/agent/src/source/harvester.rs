//! Replay client for the event log ("harvester").
//!
//! Events after a sequence id are fetched page by page, oldest first, and
//! pushed into a channel. A request for sequence 0 fetches only the newest
//! event, which is how a fresh agent learns where the log currently ends.
//! A purged sequence is answered with HTTP 410 and the server's current
//! max sequence in `X-Axway-Max-Sequence-Id`.

use std::time::Duration;

use agentsdk_events::WatchEvent;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;

pub const MAX_SEQUENCE_HEADER: &str = "X-Axway-Max-Sequence-Id";

/// Errors from the replay endpoint.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// The requested sequence has been purged.
    #[error("sequence {requested} is gone, server max is {max}")]
    SequenceGone { requested: i64, max: i64 },

    #[error("harvester transport error: {0}")]
    Transport(String),

    #[error("harvester returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("invalid harvester response: {0}")]
    Invalid(String),

    /// The consumer stopped listening.
    #[error("event sink closed")]
    SinkClosed,
}

impl HarvesterError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for HarvesterError {
    fn from(err: reqwest::Error) -> Self {
        HarvesterError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait Harvester: Send + Sync {
    /// Deliver every event after `sequence` to `sink` (if any) and return
    /// the last sequence id seen, or 0 when the log is empty.
    async fn receive_sync_events(
        &self,
        topic_self_link: &str,
        sequence: i64,
        sink: Option<&mpsc::Sender<WatchEvent>>,
    ) -> Result<i64, HarvesterError>;
}

/// Replay client over HTTP.
pub struct HttpHarvester {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
}

impl HttpHarvester {
    pub fn new(config: &Config) -> Result<Self, HarvesterError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.central.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| HarvesterError::Invalid(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        if !config.central.tenant_id.is_empty() {
            let value = HeaderValue::from_str(&config.central.tenant_id)
                .map_err(|e| HarvesterError::Invalid(e.to_string()))?;
            headers.insert("X-Axway-Tenant-Id", value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.central.client_timeout)
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/events", config.central.harvester_url.trim_end_matches('/')),
            page_size: config.central.page_size,
        })
    }

    fn params(&self, sequence: i64, page: usize) -> Vec<(&'static str, String)> {
        if sequence > 0 {
            vec![
                ("page", page.to_string()),
                ("pageSize", self.page_size.to_string()),
                ("query", format!("sequenceID>{}", sequence)),
                ("sort", "sequenceID,ASC".to_string()),
            ]
        } else {
            vec![
                ("pageSize", "1".to_string()),
                ("sort", "sequenceID,DESC".to_string()),
            ]
        }
    }
}

#[async_trait]
impl Harvester for HttpHarvester {
    async fn receive_sync_events(
        &self,
        topic_self_link: &str,
        sequence: i64,
        sink: Option<&mpsc::Sender<WatchEvent>>,
    ) -> Result<i64, HarvesterError> {
        let url = format!("{}{}", self.base_url, topic_self_link);
        let mut last_id = 0;
        let mut page = 1;

        loop {
            debug!(url = %url, sequence_id = sequence, page, "Requesting sync events");
            let response = self
                .client
                .get(&url)
                .query(&self.params(sequence, page))
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::GONE && last_id == 0 {
                let max = response
                    .headers()
                    .get(MAX_SEQUENCE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok());
                if let Some(max) = max {
                    warn!(requested = sequence, max, "Requested sequence has been purged");
                    return Err(HarvesterError::SequenceGone {
                        requested: sequence,
                        max,
                    });
                }
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(HarvesterError::Remote {
                    status: status.as_u16(),
                    body,
                });
            }

            let events: Vec<WatchEvent> = response
                .json()
                .await
                .map_err(|e| HarvesterError::Invalid(e.to_string()))?;
            let count = events.len();

            for event in events {
                last_id = event.sequence_id();
                if let Some(sink) = sink {
                    sink.send(event).await.map_err(|_| HarvesterError::SinkClosed)?;
                }
            }

            // A sequence-0 request is a single newest-event lookup.
            if sequence <= 0 || count < self.page_size {
                break;
            }
            page += 1;
        }

        Ok(last_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harvester() -> HttpHarvester {
        let mut config = Config::default();
        config.central.environment = "prod".to_string();
        HttpHarvester::new(&config).unwrap()
    }

    #[test]
    fn test_params_for_replay() {
        let params = harvester().params(41, 2);
        assert!(params.contains(&("query", "sequenceID>41".to_string())));
        assert!(params.contains(&("sort", "sequenceID,ASC".to_string())));
        assert!(params.contains(&("page", "2".to_string())));
    }

    #[test]
    fn test_params_for_latest_lookup() {
        let params = harvester().params(0, 1);
        assert_eq!(
            params,
            vec![
                ("pageSize", "1".to_string()),
                ("sort", "sequenceID,DESC".to_string())
            ]
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(HarvesterError::Transport("reset".into()).is_transient());
        assert!(!HarvesterError::SequenceGone { requested: 1, max: 9 }.is_transient());
    }
}
