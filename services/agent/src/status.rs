//! Agent status reporting.
//!
//! The combined status is derived from two sources:
//!
//! - the healthcheck registry; a failing check makes the agent `Unhealthy`
//! - the job pool; a stopped pool makes the agent `Unhealthy`
//!
//! Two schedules share one state machine. The immediate schedule (every
//! 10s) reports transitions into or out of `Running` as soon as they are
//! seen and otherwise just records activity. The periodic schedule reports
//! whenever activity has moved since its last report, which also picks up
//! transitions between two non-running states.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agentsdk_resource::status::StatusUpdate;
use agentsdk_resource::AgentStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::CentralClient;
use crate::context::AgentContext;
use crate::error::Result;
use crate::healthcheck::{HealthRegistry, HealthStatus};
use crate::jobs::{Job, JobId, JobPool, PoolStatus, Schedule};

pub const IMMEDIATE_INTERVAL: Duration = Duration::from_secs(10);

/// Last time the agent did something worth reporting.
#[derive(Debug)]
pub struct Activity {
    last: StdMutex<DateTime<Utc>>,
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last: StdMutex::new(Utc::now()),
        }
    }

    pub fn record(&self) {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let now = Utc::now();
        if now > *last {
            *last = now;
        }
    }

    pub fn last(&self) -> DateTime<Utc> {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug)]
struct ReportState {
    current: AgentStatus,
    previous: Option<AgentStatus>,
    reported_activity: DateTime<Utc>,
}

/// Combines health signals into an agent status and reports it.
pub struct StatusReporter {
    client: Arc<dyn CentralClient>,
    health: Arc<HealthRegistry>,
    jobs: Arc<JobPool>,
    activity: Arc<Activity>,
    has_agent_name: bool,
    periodic_interval: Duration,
    started: AtomicBool,
    state: Mutex<ReportState>,
}

impl StatusReporter {
    pub fn new(ctx: &AgentContext) -> Self {
        Self {
            client: Arc::clone(&ctx.client),
            health: Arc::clone(&ctx.health),
            jobs: Arc::clone(&ctx.jobs),
            activity: Arc::clone(&ctx.activity),
            has_agent_name: ctx.config.central.agent_name.is_some(),
            periodic_interval: ctx.config.central.report_activity_frequency,
            started: AtomicBool::new(false),
            state: Mutex::new(ReportState {
                current: AgentStatus::Stopped,
                previous: None,
                reported_activity: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    /// Register the immediate and periodic schedules.
    pub fn register(self: &Arc<Self>, jobs: &JobPool) -> (JobId, JobId) {
        let immediate = jobs.register(
            "status-immediate",
            Schedule::Detached(IMMEDIATE_INTERVAL),
            Arc::new(ImmediateStatusJob(Arc::clone(self))),
        );
        let periodic = jobs.register(
            "status-periodic",
            Schedule::Detached(self.periodic_interval),
            Arc::new(PeriodicStatusJob(Arc::clone(self))),
        );
        (immediate, periodic)
    }

    /// Current combined status and an explanatory message.
    pub async fn combined_status(&self) -> (AgentStatus, String) {
        if let HealthStatus::Fail(reason) = self.health.global_status().await {
            return (AgentStatus::Unhealthy, reason);
        }
        if self.jobs.status() == PoolStatus::Stopped {
            return (AgentStatus::Unhealthy, "job pool is stopped".to_string());
        }
        (AgentStatus::Running, String::new())
    }

    /// Status most recently reported.
    pub async fn reported(&self) -> (AgentStatus, Option<AgentStatus>) {
        let state = self.state.lock().await;
        (state.current, state.previous)
    }

    pub fn record_activity(&self) {
        self.activity.record();
    }

    /// Cold-start gate: an agent name is configured and the agent has been
    /// `Running` at least once.
    pub async fn ready(&self) -> bool {
        if self.started.load(Ordering::SeqCst) {
            return true;
        }
        if !self.has_agent_name {
            return false;
        }
        let (status, _) = self.combined_status().await;
        if status.is_running() {
            self.started.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Fast path: report transitions involving `Running` right away.
    pub async fn immediate_tick(&self) -> Result<()> {
        let (status, message) = self.combined_status().await;
        let mut state = self.state.lock().await;

        let crosses_running = status.is_running() != state.current.is_running();
        if status != state.current && crosses_running {
            info!(from = %state.current, to = %status, "Agent status changed");
            self.send(&mut state, status, message).await?;
            state.reported_activity = self.activity.last();
        } else {
            self.activity.record();
        }
        Ok(())
    }

    /// Slow path: report when activity moved since the last report.
    pub async fn periodic_tick(&self) -> Result<()> {
        let last = self.activity.last();
        let mut state = self.state.lock().await;
        if last <= state.reported_activity {
            debug!("No activity since last status report");
            return Ok(());
        }

        let (status, message) = self.combined_status().await;
        self.send(&mut state, status, message).await?;
        state.reported_activity = last;
        Ok(())
    }

    /// Report `Stopped` on shutdown.
    pub async fn report_stopped(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.current == AgentStatus::Stopped {
            return Ok(());
        }
        self.send(&mut state, AgentStatus::Stopped, "agent shutting down".to_string())
            .await
    }

    async fn send(&self, state: &mut ReportState, status: AgentStatus, message: String) -> Result<()> {
        let update = StatusUpdate {
            state: status,
            previous_state: Some(state.current),
            message,
            last_activity_time: self.activity.last(),
        };

        if let Err(e) = self.client.update_agent_status(&update).await {
            warn!(state = %status, error = %e, code = e.code(), "Failed to report agent status");
            return Err(e);
        }

        state.previous = Some(state.current);
        state.current = status;
        Ok(())
    }
}

struct ImmediateStatusJob(Arc<StatusReporter>);

#[async_trait]
impl Job for ImmediateStatusJob {
    async fn ready(&self) -> bool {
        self.0.ready().await
    }

    async fn execute(&self) -> Result<()> {
        self.0.immediate_tick().await
    }
}

struct PeriodicStatusJob(Arc<StatusReporter>);

#[async_trait]
impl Job for PeriodicStatusJob {
    async fn ready(&self) -> bool {
        self.0.ready().await
    }

    async fn execute(&self) -> Result<()> {
        self.0.periodic_tick().await
    }
}
