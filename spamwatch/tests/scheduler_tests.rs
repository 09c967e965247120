mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use common::{FakeDevice, Harness, eventually};
use spamwatch::config::SettingKey;
use spamwatch::database::models::PhoneDbModel;
use spamwatch::database::repositories::PhoneRepository;
use spamwatch::scheduler::{
    BatchRunner, FireOutcome, JobState, Scheduler, SchedulerConfig, SchedulerState,
    SchedulerStatus,
};
use spamwatch::{Error, Result};

fn scheduler_for(h: &Harness) -> Arc<Scheduler> {
    let config = SchedulerConfig {
        reconcile_interval: Duration::from_secs(3600),
        per_phone_timeout: Duration::from_secs(5),
    };
    Arc::new(Scheduler::new(
        h.runner(config.per_phone_timeout),
        h.repos.schedules.clone(),
        h.settings.clone(),
        config,
        CancellationToken::new(),
    ))
}

/// Counts batches by their phone listing, without touching the database.
#[derive(Default)]
struct CountingPhones {
    listed: AtomicUsize,
}

impl CountingPhones {
    fn batches(&self) -> usize {
        self.listed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhoneRepository for CountingPhones {
    async fn get_phone(&self, id: &str) -> Result<PhoneDbModel> {
        Err(Error::not_found("Phone", id))
    }

    async fn find_by_number(&self, _number: &str) -> Result<Option<PhoneDbModel>> {
        Ok(None)
    }

    async fn list_active_phones(&self) -> Result<Vec<PhoneDbModel>> {
        self.listed.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn create_phone(&self, _phone: &PhoneDbModel) -> Result<()> {
        Ok(())
    }

    async fn set_active(&self, _id: &str, _active: bool) -> Result<()> {
        Ok(())
    }

    async fn soft_delete_phone(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn purge_phone(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn list_clean_phones(&self) -> Result<Vec<PhoneDbModel>> {
        Ok(Vec::new())
    }
}

/// A scheduler whose batches only count themselves. Reconciliation ticks are rare so
/// that advancing the paused clock fires job timers alone.
fn counting_scheduler(h: &Harness) -> (Arc<Scheduler>, Arc<CountingPhones>) {
    let phones = Arc::new(CountingPhones::default());
    let runner = BatchRunner::new(
        h.checker.clone(),
        phones.clone(),
        h.notifier.clone(),
        Duration::from_secs(5),
    );
    let scheduler = Arc::new(Scheduler::new(
        runner,
        h.repos.schedules.clone(),
        h.settings.clone(),
        SchedulerConfig {
            reconcile_interval: Duration::from_secs(30 * 24 * 3600),
            per_phone_timeout: Duration::from_secs(5),
        },
        CancellationToken::new(),
    ));
    (scheduler, phones)
}

/// Advance the paused clock one minute at a time, letting woken tasks run.
async fn advance_minutes(minutes: u64) {
    for _ in 0..minutes {
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}

fn default_jobs(status: &SchedulerStatus) -> Vec<&spamwatch::scheduler::JobStatus> {
    status.jobs.iter().filter(|j| j.id.is_none()).collect()
}

#[tokio::test]
async fn test_interval_change_replaces_default_job() {
    let h = Harness::new().await;
    let scheduler = scheduler_for(&h);
    scheduler.start().await.unwrap();

    let status = scheduler.status().await.unwrap();
    assert_eq!(status.state, SchedulerState::Running);
    assert_eq!(status.default_interval_minutes, 60);
    let jobs = default_jobs(&status);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].cadence.expression, "every 60 minutes");

    h.set(SettingKey::CheckIntervalMinutes, "15").await;
    scheduler.reconcile().await.unwrap();

    let status = scheduler.status().await.unwrap();
    assert_eq!(status.default_interval_minutes, 15);
    let jobs = default_jobs(&status);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].cadence.expression, "every 15 minutes");
    assert_eq!(jobs[0].state, JobState::Scheduled);
    let next = jobs[0].next_run.unwrap();
    assert!(next <= Utc::now() + chrono::Duration::minutes(15));
    assert!(next > Utc::now() + chrono::Duration::minutes(14));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let h = Harness::new().await;
    let scheduler = scheduler_for(&h);

    scheduler.stop().await;
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);

    scheduler.start().await.unwrap();
    scheduler.start().await.unwrap();
    let status = scheduler.status().await.unwrap();
    assert_eq!(default_jobs(&status).len(), 1);

    scheduler.stop().await;
    scheduler.stop().await;
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}

#[tokio::test]
async fn test_named_schedules_follow_their_rows() {
    let h = Harness::new().await;
    let scheduler = scheduler_for(&h);
    scheduler.start().await.unwrap();

    let nightly = scheduler
        .add_schedule("nightly", "daily at 02:00")
        .await
        .unwrap();
    let weird = scheduler.add_schedule("weird", "whenever").await.unwrap();
    assert!(scheduler.add_schedule("  ", "hourly").await.is_err());

    let status = scheduler.status().await.unwrap();
    assert_eq!(status.jobs.len(), 3);
    let weird_job = status
        .jobs
        .iter()
        .find(|j| j.id.as_deref() == Some(weird.id.as_str()))
        .unwrap();
    assert!(weird_job.cadence.fell_back);
    assert!(weird_job.next_run.is_some());

    scheduler
        .set_schedule_active(&nightly.id, false)
        .await
        .unwrap();
    let status = scheduler.status().await.unwrap();
    assert!(
        status
            .jobs
            .iter()
            .all(|j| j.id.as_deref() != Some(nightly.id.as_str()))
    );

    scheduler.remove_schedule(&weird.id).await.unwrap();
    let status = scheduler.status().await.unwrap();
    assert_eq!(status.jobs.len(), 1);
    assert!(scheduler.remove_schedule(&weird.id).await.unwrap_err().is_not_found());

    scheduler.stop().await;
    let status = scheduler.status().await.unwrap();
    assert_eq!(status.state, SchedulerState::Stopped);
    let stopped: Vec<_> = status.jobs.iter().filter(|j| j.id.is_some()).collect();
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].state, JobState::Stopped);
}

#[tokio::test]
async fn test_overlapping_trigger_is_skipped() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::with_device(FakeDevice::default().gated(gate.clone())).await;
    h.add_phone("+15550700001").await;
    h.add_gateway("tc-1", "truecaller").await;

    let scheduler = scheduler_for(&h);
    scheduler.start().await.unwrap();
    let schedule = scheduler
        .add_schedule("nightly", "daily at 02:00")
        .await
        .unwrap();

    let first = scheduler.trigger(Some(&schedule.id)).await.unwrap();
    assert_eq!(first, FireOutcome::Started);
    let second = scheduler.trigger(Some(&schedule.id)).await.unwrap();
    assert_eq!(second, FireOutcome::AlreadyRunning);

    let status = scheduler.status().await.unwrap();
    let job = status
        .jobs
        .iter()
        .find(|j| j.id.as_deref() == Some(schedule.id.as_str()))
        .unwrap();
    assert_eq!(job.state, JobState::Running);

    gate.add_permits(1);
    let schedules = h.repos.schedules.clone();
    let id = schedule.id.clone();
    assert!(
        eventually(|| {
            let schedules = schedules.clone();
            let id = id.clone();
            async move {
                schedules
                    .get_schedule(&id)
                    .await
                    .map(|s| s.last_run_at.is_some())
                    .unwrap_or(false)
            }
        })
        .await
    );
    assert_eq!(h.device.calls(), 1);

    let sched = scheduler.clone();
    let id = schedule.id.clone();
    assert!(
        eventually(|| {
            let sched = sched.clone();
            let id = id.clone();
            async move { sched.trigger(Some(&id)).await.ok() == Some(FireOutcome::Started) }
        })
        .await
    );
    gate.add_permits(1);

    assert!(scheduler.trigger(Some("missing")).await.unwrap_err().is_not_found());
    scheduler.stop().await;
}

#[tokio::test]
async fn test_trigger_after_stop_is_not_found() {
    let h = Harness::new().await;
    let scheduler = scheduler_for(&h);
    scheduler.start().await.unwrap();
    scheduler.stop().await;

    let err = scheduler.trigger(None).await.unwrap_err();
    assert!(err.is_not_found());
}

// The database is only used before the clock is paused; sqlx waits on its worker
// thread would otherwise let the paused clock jump to the next job deadline.
#[tokio::test]
async fn test_default_job_fires_once_per_interval() {
    let h = Harness::new().await;
    let (scheduler, phones) = counting_scheduler(&h);
    scheduler.start().await.unwrap();
    tokio::time::pause();

    advance_minutes(59).await;
    assert_eq!(phones.batches(), 0);

    advance_minutes(2).await;
    assert_eq!(phones.batches(), 1);

    advance_minutes(30).await;
    assert_eq!(phones.batches(), 1);

    advance_minutes(30).await;
    assert_eq!(phones.batches(), 2);

    scheduler.stop().await;
    advance_minutes(120).await;
    assert_eq!(phones.batches(), 2);
}

#[tokio::test]
async fn test_replaced_default_timer_no_longer_fires() {
    let h = Harness::new().await;
    let (scheduler, phones) = counting_scheduler(&h);
    scheduler.start().await.unwrap();

    h.set(SettingKey::CheckIntervalMinutes, "15").await;
    let sched = scheduler.clone();
    assert!(
        eventually(|| {
            let sched = sched.clone();
            async move {
                sched
                    .status()
                    .await
                    .map(|s| s.default_interval_minutes == 15)
                    .unwrap_or(false)
            }
        })
        .await
    );
    tokio::time::pause();

    advance_minutes(16).await;
    assert_eq!(phones.batches(), 1);

    // New timer at 30, 45 and 60 minutes; the 60-minute timer must stay silent.
    advance_minutes(45).await;
    assert_eq!(phones.batches(), 4);
    assert_eq!(default_jobs(&scheduler.status().await.unwrap()).len(), 1);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_oversized_interval_schedule_runs_hourly() {
    let h = Harness::new().await;
    let scheduler = scheduler_for(&h);
    scheduler.start().await.unwrap();

    let schedule = scheduler
        .add_schedule("big", "every 10000000000000 minutes")
        .await
        .unwrap();
    let status = scheduler.status().await.unwrap();
    let job = status
        .jobs
        .iter()
        .find(|j| j.id.as_deref() == Some(schedule.id.as_str()))
        .unwrap();
    assert!(job.cadence.fell_back);
    assert_eq!(job.state, JobState::Scheduled);
    let next = job.next_run.unwrap();
    assert!(next <= Utc::now() + chrono::Duration::hours(1));

    scheduler.reconcile().await.unwrap();
    assert_eq!(scheduler.status().await.unwrap().jobs.len(), 2);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_wait_for_runs_outlasts_stop() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::with_device(FakeDevice::default().gated(gate.clone())).await;
    h.add_phone("+15550700002").await;
    h.add_gateway("tc-1", "truecaller").await;

    let scheduler = scheduler_for(&h);
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.trigger(None).await.unwrap(), FireOutcome::Started);
    let device = h.device.clone();
    assert!(
        eventually(|| {
            let device = device.clone();
            async move { device.calls() == 1 }
        })
        .await
    );

    scheduler.stop().await;
    let waited = tokio::time::timeout(Duration::from_millis(200), scheduler.wait_for_runs()).await;
    assert!(waited.is_err(), "a gated check is still running");

    gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), scheduler.wait_for_runs())
        .await
        .unwrap();
    assert_eq!(h.device.ended(), 1);
    assert_eq!(h.count("check_results").await, 1);
}
