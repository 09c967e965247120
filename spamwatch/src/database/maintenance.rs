//! Database maintenance.
//!
//! Runs once a day inside a UTC maintenance window:
//! - allocation retention cleanup (never below the retention floor)
//! - `PRAGMA optimize`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{MIN_ALLOCATION_RETENTION_DAYS, SettingsService};
use crate::database::DbPool;
use crate::database::repositories::AllocationRepository;
use crate::database::time::days_ago_ms;

/// Configuration for the maintenance scheduler.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often the window is checked (default: 1 hour).
    pub check_interval: Duration,
    /// Start of maintenance window (default: 03:00).
    pub window_start: NaiveTime,
    /// End of maintenance window (default: 05:00).
    pub window_end: NaiveTime,
    /// Minimum time between two runs (default: 20 hours).
    pub min_run_spacing: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60 * 60),
            window_start: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN),
            window_end: NaiveTime::from_hms_opt(5, 0, 0).unwrap_or(NaiveTime::MIN),
            min_run_spacing: Duration::from_secs(20 * 60 * 60),
        }
    }
}

/// Daily database maintenance.
pub struct MaintenanceScheduler {
    pool: DbPool,
    allocations: Arc<dyn AllocationRepository>,
    settings: Arc<SettingsService>,
    config: MaintenanceConfig,
    running: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl MaintenanceScheduler {
    pub fn new(
        pool: DbPool,
        allocations: Arc<dyn AllocationRepository>,
        settings: Arc<SettingsService>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            pool,
            allocations,
            settings,
            config,
            running: AtomicBool::new(false),
            last_run: Mutex::new(None),
        }
    }

    /// Start the maintenance loop; it exits when `cancellation_token` fires or on [`stop`].
    ///
    /// [`stop`]: Self::stop
    pub fn start(self: Arc<Self>, cancellation_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.running.store(true, Ordering::SeqCst);
            self.run_loop(cancellation_token).await;
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_loop(&self, cancellation_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = interval.tick() => {}
            }

            if !self.is_in_maintenance_window(Utc::now().time()) || !self.is_due().await {
                continue;
            }
            if let Err(e) = self.run_maintenance().await {
                tracing::error!("Maintenance error: {}", e);
            }
        }
        tracing::debug!("Maintenance scheduler stopped");
    }

    fn is_in_maintenance_window(&self, now: NaiveTime) -> bool {
        if self.config.window_start <= self.config.window_end {
            now >= self.config.window_start && now <= self.config.window_end
        } else {
            now >= self.config.window_start || now <= self.config.window_end
        }
    }

    async fn is_due(&self) -> bool {
        match *self.last_run.lock().await {
            Some(last) => {
                let spacing = chrono::Duration::from_std(self.config.min_run_spacing)
                    .unwrap_or_else(|_| chrono::Duration::hours(20));
                Utc::now().signed_duration_since(last) >= spacing
            }
            None => true,
        }
    }

    /// Run all maintenance tasks now.
    pub async fn run_maintenance(&self) -> Result<(), crate::Error> {
        tracing::info!("Starting database maintenance");

        let deleted = self.cleanup_allocations().await?;
        if deleted > 0 {
            tracing::info!("Cleaned up {} old allocations", deleted);
        }

        sqlx::query("PRAGMA optimize")
            .execute(&self.pool)
            .await
            .map_err(|e| crate::Error::Database(e.to_string()))?;

        *self.last_run.lock().await = Some(Utc::now());
        tracing::info!("Database maintenance completed");
        Ok(())
    }

    async fn cleanup_allocations(&self) -> Result<u64, crate::Error> {
        let days = self
            .settings
            .allocation_retention_days()
            .await
            .max(MIN_ALLOCATION_RETENTION_DAYS);
        self.allocations
            .delete_older_than(days_ago_ms(days))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AllocationDbModel, PhoneDbModel};
    use crate::database::repositories::{
        PhoneRepository, SqlxAllocationRepository, SqlxPhoneRepository, SqlxSettingsRepository,
    };
    use crate::database::time::{DAY_MS, now_ms};
    use crate::database::{init_pool_with_size, run_migrations};

    async fn setup() -> (DbPool, MaintenanceScheduler) {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let settings = Arc::new(SettingsService::new(Arc::new(SqlxSettingsRepository::new(
            pool.clone(),
        ))));
        let scheduler = MaintenanceScheduler::new(
            pool.clone(),
            Arc::new(SqlxAllocationRepository::new(pool.clone())),
            settings,
            MaintenanceConfig::default(),
        );
        (pool, scheduler)
    }

    #[tokio::test]
    async fn test_maintenance_window() {
        let (_pool, scheduler) = setup().await;
        assert!(scheduler.is_in_maintenance_window(NaiveTime::from_hms_opt(4, 0, 0).unwrap()));
        assert!(!scheduler.is_in_maintenance_window(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let (pool, scheduler) = setup().await;
        let phones = SqlxPhoneRepository::new(pool.clone());
        let phone = PhoneDbModel::new("+15550100", "desk");
        phones.create_phone(&phone).await.unwrap();

        let allocations = SqlxAllocationRepository::new(pool.clone());
        let mut old = AllocationDbModel::new(&phone.id, "pbx", "outbound", &serde_json::json!({}));
        old.allocated_at = now_ms() - 200 * DAY_MS;
        let recent = AllocationDbModel::new(&phone.id, "pbx", "outbound", &serde_json::json!({}));
        allocations.insert_allocation(&old).await.unwrap();
        allocations.insert_allocation(&recent).await.unwrap();

        scheduler.run_maintenance().await.unwrap();

        let left = allocations.list_for_phone(&phone.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, recent.id);
        assert!(!scheduler.is_due().await);
    }
}
