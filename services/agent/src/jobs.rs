//! Job pool.
//!
//! Every recurring piece of work in the agent is a [`Job`] registered here
//! with a [`Schedule`]. Each registration runs in its own task and stops
//! when it is unregistered or the pool is stopped.
//!
//! The pool reports [`PoolStatus::Stopped`] once it has been stopped or
//! while any non-detached job's `status()` check is failing.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::normalize_cron;
use crate::error::{AgentError, Result};

pub type JobId = Uuid;

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Whether the job's prerequisites are met. Not-ready ticks are skipped.
    async fn ready(&self) -> bool {
        true
    }

    /// Health of the job's dependencies; a failure skips the run and marks
    /// the job unhealthy.
    async fn status(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self) -> Result<()>;
}

/// When a job runs.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Every `Duration`, starting immediately.
    Interval(Duration),
    /// On a cron schedule.
    Cron(cron::Schedule),
    /// Once, as soon as the job is ready.
    Once,
    /// Every `Duration`, without contributing to pool status.
    Detached(Duration),
}

impl Schedule {
    /// Parse a cron expression (five or six fields, or `hourly`/`daily`).
    pub fn cron(expr: &str) -> Result<Self> {
        cron::Schedule::from_str(&normalize_cron(expr))
            .map(Schedule::Cron)
            .map_err(|e| {
                AgentError::Config(crate::config::ConfigError::Invalid {
                    name: "schedule",
                    reason: format!("{expr}: {e}"),
                })
            })
    }

    fn affects_status(&self) -> bool {
        !matches!(self, Schedule::Detached(_))
    }
}

/// Aggregate status of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Running,
    Stopped,
}

struct Registration {
    name: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    healthy: Arc<AtomicBool>,
    affects_status: bool,
}

/// Runs registered jobs until they are unregistered or the pool stops.
#[derive(Default)]
pub struct JobPool {
    jobs: Mutex<HashMap<JobId, Registration>>,
    stopped: AtomicBool,
}

impl JobPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` under `name` with the given schedule.
    pub fn register<J: Job + ?Sized>(&self, name: &str, schedule: Schedule, job: Arc<J>) -> JobId {
        let affects_status = schedule.affects_status();
        let healthy = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run_job(
            name.to_string(),
            schedule.clone(),
            job,
            Arc::clone(&healthy),
            stop_rx,
        ));

        let id = Uuid::new_v4();
        self.insert(id, name, stop_tx, handle, healthy, affects_status);
        info!(job_id = %id, job_name = %name, schedule = ?schedule, "Registered job");
        id
    }

    /// Register a long-running task. `task` receives a stop signal and is
    /// expected to return promptly once it fires.
    pub fn register_task<F, Fut>(&self, name: &str, task: F) -> JobId
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(task(stop_rx));
        let id = Uuid::new_v4();
        self.insert(id, name, stop_tx, handle, Arc::new(AtomicBool::new(true)), false);
        info!(job_id = %id, job_name = %name, "Registered task");
        id
    }

    fn insert(
        &self,
        id: JobId,
        name: &str,
        stop_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
        healthy: Arc<AtomicBool>,
        affects_status: bool,
    ) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        jobs.insert(
            id,
            Registration {
                name: name.to_string(),
                stop_tx,
                handle,
                healthy,
                affects_status,
            },
        );
    }

    /// Stop and forget a registration. Returns false if `id` is unknown.
    pub fn unregister(&self, id: JobId) -> bool {
        let removed = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
            jobs.remove(&id)
        };
        match removed {
            Some(reg) => {
                let _ = reg.stop_tx.send(true);
                debug!(job_id = %id, job_name = %reg.name, "Unregistered job");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: JobId) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        jobs.get(&id).is_some_and(|r| !r.handle.is_finished())
    }

    pub fn job_names(&self) -> Vec<String> {
        let jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = jobs.values().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    pub fn status(&self) -> PoolStatus {
        if self.stopped.load(Ordering::SeqCst) {
            return PoolStatus::Stopped;
        }
        let jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        let failing = jobs
            .values()
            .any(|r| r.affects_status && !r.healthy.load(Ordering::SeqCst));
        if failing {
            PoolStatus::Stopped
        } else {
            PoolStatus::Running
        }
    }

    /// Stop every job and mark the pool stopped.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let registrations: Vec<Registration> = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
            jobs.drain().map(|(_, r)| r).collect()
        };

        info!(count = registrations.len(), "Stopping all jobs");
        for reg in &registrations {
            let _ = reg.stop_tx.send(true);
        }

        for reg in registrations {
            let abort = reg.handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), reg.handle)
                .await
                .is_err()
            {
                warn!(job_name = %reg.name, "Force aborting job");
                abort.abort();
            }
        }
    }
}

async fn run_job<J: Job + ?Sized>(
    name: String,
    schedule: Schedule,
    job: Arc<J>,
    healthy: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = match &schedule {
        Schedule::Interval(every) | Schedule::Detached(every) => {
            let mut interval = tokio::time::interval(*every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        }
        _ => None,
    };

    loop {
        let wait = async {
            match (&schedule, interval.as_mut()) {
                (_, Some(interval)) => {
                    interval.tick().await;
                }
                (Schedule::Cron(cron), _) => {
                    let delay = cron
                        .upcoming(Utc)
                        .next()
                        .and_then(|next| (next - Utc::now()).to_std().ok())
                        .unwrap_or(Duration::from_secs(1));
                    tokio::time::sleep(delay).await;
                }
                _ => {}
            }
        };

        tokio::select! {
            _ = wait => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!(job_name = %name, "Job stopping");
                    return;
                }
                continue;
            }
        }

        if !job.ready().await {
            debug!(job_name = %name, "Job not ready, skipping run");
            if matches!(schedule, Schedule::Once) {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            continue;
        }

        match job.status().await {
            Ok(()) => healthy.store(true, Ordering::SeqCst),
            Err(e) => {
                healthy.store(false, Ordering::SeqCst);
                warn!(job_name = %name, error = %e, code = e.code(), "Job status check failed");
                continue;
            }
        }

        if let Err(e) = job.execute().await {
            warn!(job_name = %name, error = %e, code = e.code(), "Job execution failed");
        }

        if matches!(schedule, Schedule::Once) {
            return;
        }
    }
}
