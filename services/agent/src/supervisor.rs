//! Restart supervision for the event source.
//!
//! Each session runs as a task in the job pool. When it ends, for any
//! reason, the task is unregistered and a new one is registered after an
//! exponential delay. A separate interval job checks the source's status
//! every few seconds; every healthy observation resets the delay.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::jobs::{Job, JobId, JobPool, Schedule};
use crate::source::EventSource;

/// How often the source's status is checked.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(3);

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Delay before restart number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }
}

pub struct RetryingSupervisor {
    source: Arc<dyn EventSource>,
    jobs: Arc<JobPool>,
    policy: BackoffPolicy,
    attempt: AtomicU32,
    restarts: AtomicUsize,
    registrations: Mutex<Vec<JobId>>,
}

impl RetryingSupervisor {
    pub fn new(source: Arc<dyn EventSource>, jobs: Arc<JobPool>) -> Self {
        Self {
            source,
            jobs,
            policy: BackoffPolicy::default(),
            attempt: AtomicU32::new(0),
            restarts: AtomicUsize::new(0),
            registrations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Begin supervising. Sessions and the status job live in the pool.
    pub fn start(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let loop_id = self
            .jobs
            .register_task("event-source-supervisor", move |stop| supervisor.supervise(stop));
        let status_id = self.jobs.register(
            "event-source-status",
            Schedule::Interval(STATUS_INTERVAL),
            Arc::new(SourceStatusJob(Arc::clone(self))),
        );

        let mut registrations = self.registrations.lock().unwrap_or_else(|p| p.into_inner());
        registrations.extend([loop_id, status_id]);
    }

    /// Stop the current session and all future restarts.
    pub fn stop(&self) {
        let ids: Vec<JobId> = {
            let mut registrations = self.registrations.lock().unwrap_or_else(|p| p.into_inner());
            registrations.drain(..).collect()
        };
        for id in ids {
            self.jobs.unregister(id);
        }
        self.source.stop();
    }

    /// Delay for the next restart; each call doubles the following one.
    pub fn next_delay(&self) -> Duration {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        self.policy.delay(attempt)
    }

    pub fn reset_backoff(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    /// Sessions ended so far.
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    async fn supervise(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            let (done_tx, done_rx) = oneshot::channel();
            let source = Arc::clone(&self.source);
            let session = self.jobs.register_task(
                &format!("event-source-{}", source.name()),
                move |mut task_stop| async move {
                    let run = source.start();
                    tokio::pin!(run);
                    let result = tokio::select! {
                        result = &mut run => result,
                        _ = stopped(&mut task_stop) => {
                            source.stop();
                            run.await
                        }
                    };
                    let _ = done_tx.send(result);
                },
            );

            let result = tokio::select! {
                result = done_rx => result.unwrap_or(Err(AgentError::Cancelled)),
                _ = stopped(&mut stop) => {
                    self.jobs.unregister(session);
                    info!("Event source supervision stopped");
                    return;
                }
            };
            self.jobs.unregister(session);
            self.restarts.fetch_add(1, Ordering::SeqCst);

            match result {
                Ok(()) => info!(source = %self.source.name(), "Event source session ended"),
                Err(e) => warn!(
                    source = %self.source.name(),
                    error = %e,
                    code = e.code(),
                    "Event source session failed"
                ),
            }

            let delay = self.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "Restarting event source");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut stop) => {
                    info!("Event source supervision stopped");
                    return;
                }
            }
        }
    }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Fails while the source is down; each healthy run resets the backoff.
struct SourceStatusJob(Arc<RetryingSupervisor>);

#[async_trait]
impl Job for SourceStatusJob {
    async fn status(&self) -> Result<()> {
        self.0.source.status().await
    }

    async fn execute(&self) -> Result<()> {
        self.0.reset_backoff();
        Ok(())
    }
}
