//! Timed jobs.
//!
//! Each job owns a timer task that sleeps until the next firing of its cadence. A firing
//! starts a batch in its own task; while that batch is still running further firings of
//! the same job are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::batch::BatchRunner;
use crate::database::repositories::ScheduleRepository;
use crate::database::time::datetime_to_ms;
use crate::domain::Cadence;

/// Identity of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    /// The implicit interval job driven by `check_interval_minutes`.
    Default,
    /// A persisted schedule, by id.
    Named(String),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Stopped,
    Scheduled,
    Running,
}

/// Result of asking a job to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// The previous run of this job has not finished.
    AlreadyRunning,
    Stopped,
}

/// Shared collaborators of all job runs.
pub struct JobContext {
    pub runner: BatchRunner,
    pub schedules: Arc<dyn ScheduleRepository>,
    /// Batches started by any job.
    pub runs: TaskTracker,
}

impl JobContext {
    pub fn new(runner: BatchRunner, schedules: Arc<dyn ScheduleRepository>) -> Self {
        Self {
            runner,
            schedules,
            runs: TaskTracker::new(),
        }
    }

    /// Wait for in-flight batches, then for the phone checks they left running.
    pub async fn wait_for_runs(&self) {
        self.runs.close();
        self.runs.wait().await;
        self.runs.reopen();
        self.runner.wait_for_checks().await;
    }
}

pub struct ScheduledJob {
    key: JobKey,
    name: String,
    cadence: Cadence,
    running: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    token: CancellationToken,
}

impl ScheduledJob {
    /// Create the job and start its timer. The job stops when `parent` is cancelled or
    /// on [`cancel`](Self::cancel).
    pub fn spawn(
        key: JobKey,
        name: impl Into<String>,
        cadence: Cadence,
        last_run: Option<DateTime<Utc>>,
        context: Arc<JobContext>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let next_run = cadence.next_after(Utc::now());
        let job = Arc::new(Self {
            key,
            name: name.into(),
            cadence,
            running: AtomicBool::new(false),
            last_run: Mutex::new(last_run),
            next_run: Mutex::new(next_run),
            token: parent.child_token(),
        });

        let timer_job = job.clone();
        tokio::spawn(async move { timer_job.timer_loop(context).await });
        job
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn state(&self) -> JobState {
        if self.token.is_cancelled() {
            JobState::Stopped
        } else if self.running.load(Ordering::SeqCst) {
            JobState::Running
        } else {
            JobState::Scheduled
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock()
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        *self.next_run.lock()
    }

    /// Stop the timer. A batch already in flight observes the cancellation between phones.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wall-clock firings are mapped onto the runtime clock once; later deadlines advance
    /// by the gap between consecutive firings.
    async fn timer_loop(self: Arc<Self>, context: Arc<JobContext>) {
        let Some(mut next) = self.next_run() else {
            warn!(job = %self.name, "Cadence has no future firing, job idle");
            return;
        };
        let mut deadline = Instant::now() + until(Utc::now(), next);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let following = self.cadence.next_after(Utc::now().max(next));
            *self.next_run.lock() = following;
            Self::fire(&self, &context);

            let Some(following) = following else {
                warn!(job = %self.name, "Cadence has no future firing, job idle");
                break;
            };
            deadline += until(next, following);
            next = following;
        }
        debug!(job = %self.name, "Job timer stopped");
    }

    /// Start a run unless one is already in flight.
    pub fn fire(job: &Arc<Self>, context: &Arc<JobContext>) -> FireOutcome {
        if job.token.is_cancelled() {
            return FireOutcome::Stopped;
        }
        if job
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(job = %job.name, "Previous run still active, skipping firing");
            return FireOutcome::AlreadyRunning;
        }

        let guard = RunGuard(job.clone());
        let runs = context.runs.clone();
        let context = context.clone();
        runs.spawn(async move {
            let job = &guard.0;
            let started = Utc::now();
            *job.last_run.lock() = Some(started);

            context.runner.run(&job.name, &job.token).await;

            if let JobKey::Named(id) = &job.key {
                let next = job.next_run().map(datetime_to_ms);
                if let Err(e) = context
                    .schedules
                    .mark_run(id, datetime_to_ms(started), next)
                    .await
                {
                    warn!(job = %job.name, error = %e, "Failed to record schedule run");
                }
            }
        });

        FireOutcome::Started
    }
}

fn until(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard(Arc<ScheduledJob>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Status line of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    /// Schedule id; `None` for the default job.
    pub id: Option<String>,
    pub name: String,
    pub cadence: crate::domain::cadence::CadenceSummary,
    pub state: JobState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn of(job: &ScheduledJob) -> Self {
        Self {
            id: match job.key() {
                JobKey::Default => None,
                JobKey::Named(id) => Some(id.clone()),
            },
            name: job.name().to_string(),
            cadence: job.cadence().summary(),
            state: job.state(),
            last_run: job.last_run(),
            next_run: job.next_run(),
        }
    }
}
