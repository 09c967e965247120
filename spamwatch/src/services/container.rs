//! Service container.
//!
//! Builds repositories and services once at startup and owns the shutdown token that
//! every background task observes.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::allocator::NumberAllocator;
use crate::api_check::HttpApiChecker;
use crate::checker::{CheckCapabilities, CheckQueue, CheckRepositories, CheckService};
use crate::config::{AppConfig, SettingsService};
use crate::database::repositories::{
    AllocationRepository, CheckResultRepository, GatewayRepository, PhoneRepository,
    ScheduleRepository, ServiceRepository, SettingsRepository, SqlxAllocationRepository,
    SqlxCheckResultRepository, SqlxGatewayRepository, SqlxPhoneRepository,
    SqlxScheduleRepository, SqlxServiceRepository, SqlxSettingsRepository,
};
use crate::database::{MaintenanceConfig, MaintenanceScheduler};
use crate::device::{AdbDriver, TesseractExtractor};
use crate::notification::{LogNotifier, Notifier, WebhookNotifier};
use crate::resource::ResourceManager;
use crate::scheduler::{BatchRunner, Scheduler, SchedulerConfig};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the background check queue.
const CHECK_QUEUE_CAPACITY: usize = 256;

/// Every repository, built over one pool.
#[derive(Clone)]
pub struct Repositories {
    pub phones: Arc<dyn PhoneRepository>,
    pub gateways: Arc<dyn GatewayRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub results: Arc<dyn CheckResultRepository>,
    pub allocations: Arc<dyn AllocationRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub settings: Arc<dyn SettingsRepository>,
}

impl Repositories {
    pub fn sqlx(pool: &SqlitePool) -> Self {
        Self {
            phones: Arc::new(SqlxPhoneRepository::new(pool.clone())),
            gateways: Arc::new(SqlxGatewayRepository::new(pool.clone())),
            services: Arc::new(SqlxServiceRepository::new(pool.clone())),
            results: Arc::new(SqlxCheckResultRepository::new(pool.clone())),
            allocations: Arc::new(SqlxAllocationRepository::new(pool.clone())),
            schedules: Arc::new(SqlxScheduleRepository::new(pool.clone())),
            settings: Arc::new(SqlxSettingsRepository::new(pool.clone())),
        }
    }
}

/// Service container holding all application services.
pub struct ServiceContainer {
    pub pool: SqlitePool,
    pub repositories: Repositories,
    pub settings: Arc<SettingsService>,
    pub resources: Arc<ResourceManager>,
    pub checker: Arc<CheckService>,
    pub check_queue: CheckQueue,
    pub scheduler: Arc<Scheduler>,
    pub allocator: Arc<NumberAllocator>,
    pub maintenance: Arc<MaintenanceScheduler>,
    cancellation_token: CancellationToken,
    background: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Build the container with the ADB, Tesseract, HTTP and webhook implementations.
    pub fn new(pool: SqlitePool, config: &AppConfig) -> Result<Self> {
        let capabilities = CheckCapabilities {
            device: Arc::new(AdbDriver::new(&config.adb_path)),
            extractor: Arc::new(TesseractExtractor::new(&config.tesseract_path)),
            api: Arc::new(HttpApiChecker::new(config.api_check_timeout)?),
        };
        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)?),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::with_capabilities(
            pool,
            capabilities,
            notifier,
            config.check_workers,
        ))
    }

    /// Build the container around the given capabilities.
    pub fn with_capabilities(
        pool: SqlitePool,
        capabilities: CheckCapabilities,
        notifier: Arc<dyn Notifier>,
        check_workers: usize,
    ) -> Self {
        info!("Initializing service container");

        let cancellation_token = CancellationToken::new();
        let repositories = Repositories::sqlx(&pool);
        let settings = Arc::new(SettingsService::new(repositories.settings.clone()));
        let resources = Arc::new(ResourceManager::new());

        let checker = Arc::new(CheckService::new(
            CheckRepositories {
                phones: repositories.phones.clone(),
                gateways: repositories.gateways.clone(),
                services: repositories.services.clone(),
                results: repositories.results.clone(),
            },
            capabilities,
            settings.clone(),
            resources.clone(),
        ));

        let check_queue = CheckQueue::start(
            checker.clone(),
            check_workers,
            CHECK_QUEUE_CAPACITY,
            cancellation_token.clone(),
        );

        let scheduler_config = SchedulerConfig::default();
        let runner = BatchRunner::new(
            checker.clone(),
            repositories.phones.clone(),
            notifier,
            scheduler_config.per_phone_timeout,
        );
        let scheduler = Arc::new(Scheduler::new(
            runner,
            repositories.schedules.clone(),
            settings.clone(),
            scheduler_config,
            cancellation_token.clone(),
        ));

        let allocator = Arc::new(NumberAllocator::new(
            repositories.phones.clone(),
            repositories.allocations.clone(),
        ));

        let maintenance = Arc::new(MaintenanceScheduler::new(
            pool.clone(),
            repositories.allocations.clone(),
            settings.clone(),
            MaintenanceConfig::default(),
        ));

        info!("Service container initialized");

        Self {
            pool,
            repositories,
            settings,
            resources,
            checker,
            check_queue,
            scheduler,
            allocator,
            maintenance,
            cancellation_token,
            background: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start the scheduler and database maintenance.
    pub async fn initialize(&self) -> Result<()> {
        self.scheduler.start().await?;
        let handle = self
            .maintenance
            .clone()
            .start(self.cancellation_token.clone());
        self.background.lock().push(handle);
        info!("Background services started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Cancel background work, wait up to `timeout` for running batches, queued checks
    /// and maintenance to finish, then close the pool.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        if self.scheduler.state().await == crate::scheduler::SchedulerState::Running {
            self.scheduler.stop().await;
        }
        self.maintenance.stop();
        self.cancellation_token.cancel();

        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        let drained = tokio::time::timeout(timeout, async {
            self.scheduler.wait_for_runs().await;
            self.check_queue.join().await;
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Closing database pool...");
        self.pool.close().await;
        info!("Services shut down");
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
