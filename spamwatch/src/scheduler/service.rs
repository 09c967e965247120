//! Interval and cron scheduler.
//!
//! The scheduler owns one implicit default job, firing every `check_interval_minutes`,
//! plus one job per active persisted schedule. A reconciliation tick (every minute, and
//! on settings changes) swaps the default job when the interval setting changed and
//! brings the named jobs in line with the `schedules` table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batch::BatchRunner;
use super::job::{FireOutcome, JobContext, JobKey, JobState, JobStatus, ScheduledJob};
use crate::config::SettingsService;
use crate::database::models::ScheduleDbModel;
use crate::database::repositories::ScheduleRepository;
use crate::database::time::ms_to_datetime;
use crate::domain::Cadence;
use crate::{Error, Result};

const DEFAULT_JOB_NAME: &str = "default";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often settings and schedules are reconciled.
    pub reconcile_interval: Duration,
    /// Time budget of one phone within a batch.
    pub per_phone_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(60),
            per_phone_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Snapshot returned by [`Scheduler::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub default_interval_minutes: u64,
    /// Default job first, then named jobs by name.
    pub jobs: Vec<JobStatus>,
}

struct Inner {
    state: SchedulerState,
    token: Option<CancellationToken>,
    default_job: Option<Arc<ScheduledJob>>,
    default_minutes: u64,
    jobs: HashMap<String, Arc<ScheduledJob>>,
}

pub struct Scheduler {
    context: Arc<JobContext>,
    schedules: Arc<dyn ScheduleRepository>,
    settings: Arc<SettingsService>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    inner: Mutex<Inner>,
}

impl Scheduler {
    pub fn new(
        runner: BatchRunner,
        schedules: Arc<dyn ScheduleRepository>,
        settings: Arc<SettingsService>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context: Arc::new(JobContext::new(runner, schedules.clone())),
            schedules,
            settings,
            config,
            shutdown,
            inner: Mutex::new(Inner {
                state: SchedulerState::Stopped,
                token: None,
                default_job: None,
                default_minutes: 0,
                jobs: HashMap::new(),
            }),
        }
    }

    /// Start the default job, load active schedules and begin reconciling.
    ///
    /// Starting a running scheduler only logs a warning.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == SchedulerState::Running {
            warn!("Scheduler is already running");
            return Ok(());
        }

        let token = self.shutdown.child_token();
        inner.token = Some(token.clone());
        inner.state = SchedulerState::Running;

        let minutes = self.settings.check_interval_minutes().await;
        self.install_default_job(&mut inner, minutes, &token);
        if let Err(e) = self.sync_named_jobs(&mut inner, &token).await {
            warn!(error = %e, "Failed to load schedules, continuing with default job only");
        }
        let named = inner.jobs.len();
        drop(inner);

        self.spawn_reconciler(token);
        info!(
            interval_minutes = minutes,
            schedules = named,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop all jobs. Stopping a stopped scheduler only logs a warning.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SchedulerState::Stopped {
            warn!("Scheduler is not running");
            return;
        }

        if let Some(token) = inner.token.take() {
            token.cancel();
        }
        inner.default_job = None;
        inner.jobs.clear();
        inner.state = SchedulerState::Stopped;
        info!("Scheduler stopped");
    }

    /// Wait for batches that are still running, including after [`stop`](Self::stop).
    pub async fn wait_for_runs(&self) {
        self.context.wait_for_runs().await;
    }

    pub async fn state(&self) -> SchedulerState {
        self.inner.lock().await.state
    }

    /// Apply the current interval setting and schedule rows.
    pub async fn reconcile(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(token) = inner.token.clone().filter(|_| inner.state == SchedulerState::Running)
        else {
            return Ok(());
        };

        let minutes = self.settings.check_interval_minutes().await;
        if minutes != inner.default_minutes {
            info!(
                from = inner.default_minutes,
                to = minutes,
                "Check interval changed, replacing default job"
            );
            self.install_default_job(&mut inner, minutes, &token);
        }

        self.sync_named_jobs(&mut inner, &token).await
    }

    /// Persist a new named schedule and start it when the scheduler runs.
    ///
    /// Unparseable cadences are stored as given and run hourly.
    pub async fn add_schedule(&self, name: &str, cadence: &str) -> Result<ScheduleDbModel> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("schedule name must not be empty"));
        }

        let schedule = ScheduleDbModel::new(name, cadence.trim());
        self.schedules.create_schedule(&schedule).await?;
        info!(schedule = %schedule.name, cadence = %schedule.cadence, "Schedule added");

        let mut inner = self.inner.lock().await;
        if let Some(token) = inner.token.clone().filter(|_| inner.state == SchedulerState::Running)
        {
            self.install_named_job(&mut inner, &schedule, &token);
        }
        Ok(schedule)
    }

    /// Delete a named schedule and its job.
    pub async fn remove_schedule(&self, id: &str) -> Result<()> {
        let schedule = self.schedules.get_schedule(id).await?;
        self.schedules.delete_schedule(id).await?;

        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.remove(id) {
            job.cancel();
        }
        info!(schedule = %schedule.name, "Schedule removed");
        Ok(())
    }

    /// Enable or disable a named schedule; disabled rows are kept without a job.
    pub async fn set_schedule_active(&self, id: &str, active: bool) -> Result<()> {
        self.schedules.set_active(id, active).await?;
        self.reconcile().await
    }

    /// Fire a job now, as its timer would. `None` selects the default job.
    pub async fn trigger(&self, schedule_id: Option<&str>) -> Result<FireOutcome> {
        let inner = self.inner.lock().await;
        let job = match schedule_id {
            None => inner.default_job.clone(),
            Some(id) => inner.jobs.get(id).cloned(),
        };
        drop(inner);

        match job {
            Some(job) => Ok(ScheduledJob::fire(&job, &self.context)),
            None => Err(Error::not_found(
                "Job",
                schedule_id.unwrap_or(DEFAULT_JOB_NAME),
            )),
        }
    }

    /// Scheduler state plus each job's cadence, state and run times.
    ///
    /// While stopped, persisted schedules are listed as stopped jobs.
    pub async fn status(&self) -> Result<SchedulerStatus> {
        let inner = self.inner.lock().await;
        let state = inner.state;

        let mut jobs = Vec::new();
        let default_interval_minutes = match &inner.default_job {
            Some(job) => {
                jobs.push(JobStatus::of(job));
                inner.default_minutes
            }
            None => self.settings.check_interval_minutes().await,
        };

        if state == SchedulerState::Running {
            let mut named: Vec<JobStatus> = inner.jobs.values().map(|j| JobStatus::of(j)).collect();
            named.sort_by(|a, b| a.name.cmp(&b.name));
            jobs.extend(named);
        } else {
            drop(inner);
            for schedule in self.schedules.list_schedules().await? {
                jobs.push(JobStatus {
                    id: Some(schedule.id.clone()),
                    name: schedule.name.clone(),
                    cadence: Cadence::parse(&schedule.cadence).summary(),
                    state: JobState::Stopped,
                    last_run: schedule.last_run_at.map(ms_to_datetime),
                    next_run: schedule.next_run_at.map(ms_to_datetime),
                });
            }
        }

        Ok(SchedulerStatus {
            state,
            default_interval_minutes,
            jobs,
        })
    }

    fn spawn_reconciler(self: &Arc<Self>, token: CancellationToken) {
        let scheduler = Arc::downgrade(self);
        let mut settings_events = self.settings.subscribe();
        let period = self.config.reconcile_interval;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {}
                    event = settings_events.recv() => match event {
                        Ok(event) => debug!(?event, "Settings changed, reconciling schedules"),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Settings events lagged, reconciling schedules");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }

                let Some(scheduler) = scheduler.upgrade() else { break };
                if let Err(e) = scheduler.reconcile().await {
                    warn!(error = %e, "Schedule reconciliation failed");
                }
            }
            debug!("Scheduler reconciler stopped");
        });
    }

    fn install_default_job(&self, inner: &mut Inner, minutes: u64, token: &CancellationToken) {
        if let Some(old) = inner.default_job.take() {
            old.cancel();
        }
        inner.default_job = Some(ScheduledJob::spawn(
            JobKey::Default,
            DEFAULT_JOB_NAME,
            Cadence::every_minutes(minutes),
            None,
            self.context.clone(),
            token,
        ));
        inner.default_minutes = minutes;
    }

    fn install_named_job(
        &self,
        inner: &mut Inner,
        schedule: &ScheduleDbModel,
        token: &CancellationToken,
    ) {
        if let Some(old) = inner.jobs.remove(&schedule.id) {
            old.cancel();
        }
        let last_run: Option<DateTime<Utc>> = schedule.last_run_at.map(ms_to_datetime);
        let job = ScheduledJob::spawn(
            JobKey::Named(schedule.id.clone()),
            schedule.name.clone(),
            Cadence::parse(&schedule.cadence),
            last_run,
            self.context.clone(),
            token,
        );
        debug!(schedule = %schedule.name, next_run = ?job.next_run(), "Schedule job installed");
        inner.jobs.insert(schedule.id.clone(), job);
    }

    /// Add jobs for new active rows, drop jobs of inactive or deleted rows, and restart
    /// jobs whose cadence changed.
    async fn sync_named_jobs(&self, inner: &mut Inner, token: &CancellationToken) -> Result<()> {
        let active = self.schedules.list_active_schedules().await?;
        let active_ids: HashSet<&str> = active.iter().map(|s| s.id.as_str()).collect();

        let stale: Vec<String> = inner
            .jobs
            .keys()
            .filter(|id| !active_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(job) = inner.jobs.remove(&id) {
                job.cancel();
                info!(schedule = %job.name(), "Schedule job removed");
            }
        }

        for schedule in &active {
            let unchanged = inner
                .jobs
                .get(&schedule.id)
                .is_some_and(|job| job.cadence().expression() == schedule.cadence.trim());
            if !unchanged {
                self.install_named_job(inner, schedule, token);
            }
        }
        Ok(())
    }
}
