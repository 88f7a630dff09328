//! Recurring job scheduler.
//!
//! # Responsibilities
//! - Hold named jobs with a fixed cadence
//! - Run each job on its own task once started
//! - Contain job failures and panics at the task boundary
//!
//! # Design Decisions
//! - Always created during bootstrap, populated by the cache selector and
//!   application code
//! - Jobs added after `start` are spawned immediately
//! - A slow run delays the next tick rather than overlapping it

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// How often a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence(Duration);

impl Cadence {
    pub const DAILY: Cadence = Cadence(Duration::from_secs(24 * 60 * 60));
    pub const HOURLY: Cadence = Cadence(Duration::from_secs(60 * 60));

    pub fn every(period: Duration) -> Self {
        Cadence(period)
    }

    pub fn period(&self) -> Duration {
        self.0
    }
}

/// Error parsing a cadence expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid schedule `{0}` (expected @daily, @hourly or @every <n><s|m|h>)")]
pub struct CadenceError(String);

impl FromStr for Cadence {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "@daily" | "@midnight" => return Ok(Cadence::DAILY),
            "@hourly" => return Ok(Cadence::HOURLY),
            _ => {}
        }

        let err = || CadenceError(s.to_string());
        let expr = trimmed.strip_prefix("@every").ok_or_else(err)?.trim();
        let split = expr.find(|c: char| !c.is_ascii_digit()).ok_or_else(err)?;
        let (amount, unit) = expr.split_at(split);
        let amount: u64 = amount.parse().map_err(|_| err())?;
        let secs = match unit {
            "s" => Some(amount),
            "m" => amount.checked_mul(60),
            "h" => amount.checked_mul(60 * 60),
            _ => return Err(err()),
        }
        .filter(|secs| *secs > 0)
        .ok_or_else(err)?;
        let period = Duration::from_secs(secs);
        // The first tick is scheduled one period from now.
        std::time::Instant::now().checked_add(period).ok_or_else(err)?;
        Ok(Cadence(period))
    }
}

/// Failure reported by a job run.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(message: impl fmt::Display) -> Self {
        JobError(message.to_string())
    }
}

/// Identifier returned when a job is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(usize);

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

struct Job {
    id: JobId,
    name: String,
    cadence: Cadence,
    run: JobFn,
}

impl Clone for Job {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            cadence: self.cadence,
            run: self.run.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    running: Option<Shutdown>,
}

/// Recurring task runner. Clones share the same job list.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<Mutex<State>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.job_names())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a recurring job.
    pub fn add_job<F, Fut>(&self, name: impl Into<String>, cadence: Cadence, job: F) -> JobId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let run: JobFn = Arc::new(move || Box::pin(job()));
        let mut state = self.state();
        let job = Job {
            id: JobId(state.jobs.len()),
            name: name.into(),
            cadence,
            run,
        };
        let id = job.id;
        tracing::info!(job = %job.name, period_secs = cadence.period().as_secs(), "Job registered");
        if let Some(shutdown) = state.running.clone() {
            spawn_job(job.clone(), shutdown);
        }
        state.jobs.push(job);
        id
    }

    pub fn job_count(&self) -> usize {
        self.state().jobs.len()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.state().jobs.iter().map(|job| job.name.clone()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.state().running.is_some()
    }

    /// Start every registered job. Calling it again has no effect.
    pub fn start(&self, shutdown: &Shutdown) {
        let mut state = self.state();
        if state.running.is_some() {
            return;
        }
        state.running = Some(shutdown.clone());
        for job in &state.jobs {
            spawn_job(job.clone(), shutdown.clone());
        }
        tracing::info!(jobs = state.jobs.len(), "Scheduler started");
    }

    /// Run a job once, outside its cadence. Returns `false` for unknown ids.
    pub async fn run_once(&self, id: JobId) -> bool {
        let job = self.state().jobs.iter().find(|job| job.id == id).cloned();
        match job {
            Some(job) => {
                execute(&job).await;
                true
            }
            None => false,
        }
    }
}

fn spawn_job(job: Job, shutdown: Shutdown) {
    tokio::spawn(async move {
        let period = job.cadence.period();
        let Some(start) = Instant::now().checked_add(period) else {
            tracing::warn!(job = %job.name, period_secs = period.as_secs(), "Job period out of range, never scheduled");
            return;
        };
        let mut ticker = time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = shutdown.subscribe();
        if shutdown.is_triggered() {
            return;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => execute(&job).await,
                _ = stop.recv() => {
                    tracing::debug!(job = %job.name, "Job loop stopped");
                    break;
                }
            }
        }
    });
}

async fn execute(job: &Job) {
    let run = (job.run)();
    match tokio::spawn(run).await {
        Ok(Ok(())) => tracing::debug!(job = %job.name, "Job completed"),
        Ok(Err(err)) => {
            tracing::error!(job = %job.name, error = %err, "Job failed");
            metrics::record_job_failure(&job.name);
        }
        Err(err) => {
            tracing::error!(job = %job.name, error = %err, "Job panicked");
            metrics::record_job_failure(&job.name);
        }
    }
}
