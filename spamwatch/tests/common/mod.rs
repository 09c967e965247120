//! Shared fixtures for the integration tests: an in-memory database and fake device,
//! OCR, HTTP and notification capabilities.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;

use spamwatch::api_check::{ApiCheckResponse, ApiChecker};
use spamwatch::checker::{CheckCapabilities, CheckRepositories, CheckService, CheckServiceConfig};
use spamwatch::config::{SettingKey, SettingsService};
use spamwatch::database::models::{
    ApiServiceDbModel, GatewayDbModel, GatewayStatus, PhoneDbModel,
};
use spamwatch::database::{init_pool_with_size, run_migrations};
use spamwatch::device::{DeviceDriver, TextExtractor};
use spamwatch::domain::PhoneNumber;
use spamwatch::notification::Notifier;
use spamwatch::resource::ResourceManager;
use spamwatch::scheduler::BatchRunner;
use spamwatch::services::Repositories;
use spamwatch::{Error, Result};

/// Caller-ID text that matches none of the seeded keywords.
pub const CLEAN_TEXT: &str = "Incoming call, unknown caller";

pub async fn setup_test_db() -> SqlitePool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Scripted device driver.
///
/// Capture returns the configured text of the gateway's service as bytes. Calls can be
/// held at a gate and are counted, including the peak number in flight at once.
#[derive(Default)]
pub struct FakeDevice {
    texts: HashMap<String, String>,
    failing: HashSet<String>,
    hold: Duration,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    ended: AtomicUsize,
}

impl FakeDevice {
    pub fn with_text(mut self, service_code: &str, text: &str) -> Self {
        self.texts.insert(service_code.to_string(), text.to_string());
        self
    }

    /// Calls on the gateway named `gateway_name` fail.
    pub fn failing_on(mut self, gateway_name: &str) -> Self {
        self.failing.insert(gateway_name.to_string());
        self
    }

    /// Keep every call open for `hold`.
    pub fn holding(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Block every call until a permit is available on `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Calls that were hung up.
    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDriver for FakeDevice {
    async fn start_app(&self, _gateway: &GatewayDbModel, _app_package: &str) -> Result<()> {
        Ok(())
    }

    async fn simulate_inbound_call(
        &self,
        gateway: &GatewayDbModel,
        _number: &PhoneNumber,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&gateway.name) {
            return Err(Error::Other(format!("{} is unreachable", gateway.name)));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| Error::Other("gate closed".to_string()))?;
            permit.forget();
        }
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        Ok(())
    }

    async fn capture_evidence(&self, gateway: &GatewayDbModel) -> Result<Vec<u8>> {
        let text = self
            .texts
            .get(&gateway.service_code)
            .map(String::as_str)
            .unwrap_or(CLEAN_TEXT);
        Ok(text.as_bytes().to_vec())
    }

    async fn end_call(&self, _gateway: &GatewayDbModel, _number: &PhoneNumber) -> Result<()> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.ended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn probe_status(&self, gateway: &GatewayDbModel) -> GatewayStatus {
        if self.failing.contains(&gateway.name) {
            GatewayStatus::Offline
        } else {
            GatewayStatus::Online
        }
    }
}

/// Treats evidence bytes as the recognized text.
pub struct Utf8Extractor;

#[async_trait]
impl TextExtractor for Utf8Extractor {
    async fn extract_text(&self, evidence: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(evidence).into_owned())
    }
}

/// Scripted API checker keyed by service code.
#[derive(Default)]
pub struct FakeApi {
    texts: HashMap<String, String>,
    labels: HashMap<String, Vec<String>>,
    failing: bool,
    calls: AtomicUsize,
}

impl FakeApi {
    pub fn with_text(mut self, service_code: &str, text: &str) -> Self {
        self.texts.insert(service_code.to_string(), text.to_string());
        self
    }

    pub fn with_labels(mut self, service_code: &str, labels: &[&str]) -> Self {
        self.labels.insert(
            service_code.to_string(),
            labels.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiChecker for FakeApi {
    async fn check(&self, api: &ApiServiceDbModel, phone: &PhoneNumber) -> Result<ApiCheckResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::Other(format!("{} returned 503", api.name)));
        }
        let text = self
            .texts
            .get(&api.service_code)
            .cloned()
            .unwrap_or_else(|| CLEAN_TEXT.to_string());
        Ok(ApiCheckResponse {
            raw_response: format!(r#"{{"number":"{}","text":"{}"}}"#, phone, text),
            extracted_text: text,
            extracted_keywords: self.labels.get(&api.service_code).cloned().unwrap_or_default(),
        })
    }
}

/// Keeps every notification it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// A check service over an in-memory database and fake capabilities.
pub struct Harness {
    pub pool: SqlitePool,
    pub repos: Repositories,
    pub settings: Arc<SettingsService>,
    pub resources: Arc<ResourceManager>,
    pub device: Arc<FakeDevice>,
    pub api: Arc<FakeApi>,
    pub notifier: Arc<RecordingNotifier>,
    pub checker: Arc<CheckService>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_fakes(FakeDevice::default(), FakeApi::default()).await
    }

    pub async fn with_device(device: FakeDevice) -> Self {
        Self::with_fakes(device, FakeApi::default()).await
    }

    pub async fn with_fakes(device: FakeDevice, api: FakeApi) -> Self {
        let pool = setup_test_db().await;
        let repos = Repositories::sqlx(&pool);
        let settings = Arc::new(SettingsService::new(repos.settings.clone()));
        settings
            .set(SettingKey::CallWaitSeconds, "0")
            .await
            .expect("Failed to set call wait");

        let resources = Arc::new(ResourceManager::new());
        let device = Arc::new(device);
        let api = Arc::new(api);
        let checker = Arc::new(CheckService::with_config(
            CheckRepositories {
                phones: repos.phones.clone(),
                gateways: repos.gateways.clone(),
                services: repos.services.clone(),
                results: repos.results.clone(),
            },
            CheckCapabilities {
                device: device.clone(),
                extractor: Arc::new(Utf8Extractor),
                api: api.clone(),
            },
            settings.clone(),
            resources.clone(),
            CheckServiceConfig {
                realtime_retry_delay: Duration::from_millis(10),
                ..Default::default()
            },
        ));

        Self {
            pool,
            repos,
            settings,
            resources,
            device,
            api,
            notifier: Arc::new(RecordingNotifier::default()),
            checker,
        }
    }

    pub async fn set(&self, key: SettingKey, value: &str) {
        self.settings
            .set(key, value)
            .await
            .expect("Failed to update setting");
    }

    pub async fn add_phone(&self, number: &str) -> PhoneDbModel {
        let phone = PhoneDbModel::new(number, "test line");
        self.repos
            .phones
            .create_phone(&phone)
            .await
            .expect("Failed to create phone");
        phone
    }

    pub async fn add_gateway(&self, name: &str, service_code: &str) -> GatewayDbModel {
        let gateway = GatewayDbModel::new(name, service_code, "127.0.0.1", 5555);
        self.repos
            .gateways
            .create_gateway(&gateway)
            .await
            .expect("Failed to create gateway");
        gateway
    }

    pub async fn add_api(&self, name: &str, service_code: &str) -> ApiServiceDbModel {
        let api = ApiServiceDbModel::new(name, service_code, "https://lookup.invalid/{phone}");
        self.repos
            .services
            .create_api_service(&api)
            .await
            .expect("Failed to create API service");
        api
    }

    pub fn runner(&self, per_phone_timeout: Duration) -> BatchRunner {
        BatchRunner::new(
            self.checker.clone(),
            self.repos.phones.clone(),
            self.notifier.clone(),
            per_phone_timeout,
        )
    }

    pub async fn count(&self, table: &str) -> i64 {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count rows");
        count
    }
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
