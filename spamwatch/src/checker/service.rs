//! Check orchestration.
//!
//! A check of one phone fans out to every active device gateway and, depending on the
//! configured [`CheckMode`], every active API service. Each gateway probe holds that
//! gateway's lock for its whole duration; busy gateways are skipped rather than queued.
//! All checks of one phone are serialized by the phone lock.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::keywords::KeywordMatcher;
use super::outcome::{
    BatchSummary, CheckOutcome, GatewayStatusView, ProbeOutcome, ProbeSource, ProbeStatus,
    RealtimeCheckResult,
};
use crate::api_check::ApiChecker;
use crate::config::SettingsService;
use crate::database::models::{
    ApiServiceDbModel, CheckResultDbModel, GatewayDbModel, GatewayStatus, PhoneDbModel,
};
use crate::database::repositories::{
    CheckResultRepository, GatewayRepository, PhoneRepository, ServiceRepository,
};
use crate::database::time::now_ms;
use crate::device::{DeviceDriver, TextExtractor};
use crate::domain::{CheckMode, PhoneNumber};
use crate::resource::{ResourceGuard, ResourceKind, ResourceManager};
use crate::{Error, Result};

/// Tuning knobs for the check service.
#[derive(Debug, Clone)]
pub struct CheckServiceConfig {
    /// Results newer than this are served from storage by realtime checks.
    pub freshness_window: Duration,
    /// Extra gateway acquire attempts for realtime checks.
    pub realtime_retries: u32,
    pub realtime_retry_delay: Duration,
}

impl Default for CheckServiceConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(60 * 60),
            realtime_retries: 1,
            realtime_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Repositories the check service reads and writes.
#[derive(Clone)]
pub struct CheckRepositories {
    pub phones: Arc<dyn PhoneRepository>,
    pub gateways: Arc<dyn GatewayRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub results: Arc<dyn CheckResultRepository>,
}

/// External capabilities the check service drives.
#[derive(Clone)]
pub struct CheckCapabilities {
    pub device: Arc<dyn DeviceDriver>,
    pub extractor: Arc<dyn TextExtractor>,
    pub api: Arc<dyn ApiChecker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    Normal,
    Realtime,
}

pub struct CheckService {
    repos: CheckRepositories,
    capabilities: CheckCapabilities,
    settings: Arc<SettingsService>,
    resources: Arc<ResourceManager>,
    config: CheckServiceConfig,
}

impl CheckService {
    pub fn new(
        repos: CheckRepositories,
        capabilities: CheckCapabilities,
        settings: Arc<SettingsService>,
        resources: Arc<ResourceManager>,
    ) -> Self {
        Self::with_config(
            repos,
            capabilities,
            settings,
            resources,
            CheckServiceConfig::default(),
        )
    }

    pub fn with_config(
        repos: CheckRepositories,
        capabilities: CheckCapabilities,
        settings: Arc<SettingsService>,
        resources: Arc<ResourceManager>,
        config: CheckServiceConfig,
    ) -> Self {
        Self {
            repos,
            capabilities,
            settings,
            resources,
            config,
        }
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Check one phone with the configured mode.
    ///
    /// Fails only when every attempted probe failed, when every gateway was busy, or when
    /// nothing was available to probe.
    #[instrument(skip(self))]
    pub async fn check_one(&self, phone_id: &str) -> Result<CheckOutcome> {
        let phone = self.repos.phones.get_phone(phone_id).await?;
        let mode = self.settings.check_mode().await;
        self.check_phone(&phone, mode, Priority::Normal).await
    }

    /// Check every active phone, at most `max_concurrent_checks` at a time.
    pub async fn check_all(&self) -> Result<BatchSummary> {
        let phones = self.repos.phones.list_active_phones().await?;
        if phones.is_empty() {
            info!("No active phones to check");
            return Ok(BatchSummary::default());
        }

        let limit = self.settings.max_concurrent_checks().await;
        let mode = self.settings.check_mode().await;
        let gate = Semaphore::new(limit);
        info!(phones = phones.len(), limit, mode = %mode, "Checking all active phones");

        let checks = phones.iter().map(|phone| {
            let gate = &gate;
            async move {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|_| Error::Other("check admission gate closed".to_string()))?;
                self.check_phone(phone, mode, Priority::Normal).await
            }
        });
        let results = join_all(checks).await;

        let mut summary = BatchSummary {
            total: phones.len(),
            ..Default::default()
        };
        for (phone, result) in phones.iter().zip(results) {
            match result {
                Ok(outcome) => summary.outcomes.push(outcome),
                Err(e) => {
                    warn!(phone_id = %phone.id, error = %e, "Phone check failed");
                    summary.errors.push((phone.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded(),
            failed = summary.errors.len(),
            spam = summary.spam_count(),
            "Check-all finished"
        );
        Ok(summary)
    }

    /// Check an arbitrary number on demand.
    ///
    /// Known numbers with results inside the freshness window are answered from storage.
    /// Unknown numbers get a temporary inactive phone which is removed again when the
    /// check fails. Concurrent lookups of the same number run one after another, so a
    /// later caller sees the phone and results of an earlier one.
    #[instrument(skip(self))]
    pub async fn check_realtime(&self, raw_number: &str) -> Result<RealtimeCheckResult> {
        let number = PhoneNumber::new(raw_number)?;
        let _number_guard = self
            .resources
            .acquire(ResourceKind::Number, number.as_str())
            .await;

        let (phone, created) = match self.repos.phones.find_by_number(number.as_str()).await? {
            Some(phone) => {
                let since = now_ms() - self.config.freshness_window.as_millis() as i64;
                let fresh = self.repos.results.results_since(&phone.id, since).await?;
                if !fresh.is_empty() {
                    debug!(phone_id = %phone.id, "Serving realtime check from fresh results");
                    return self.realtime_result(&phone, true, None).await;
                }
                (phone, false)
            }
            None => {
                let phone = PhoneDbModel::temporary(number.as_str());
                self.repos.phones.create_phone(&phone).await?;
                debug!(phone_id = %phone.id, number = %number, "Created temporary phone");
                (phone, true)
            }
        };

        let mode = self.settings.check_mode().await;
        match self.check_phone(&phone, mode, Priority::Realtime).await {
            Ok(outcome) => self.realtime_result(&phone, false, Some(outcome)).await,
            Err(e) => {
                if created {
                    if let Err(cleanup) = self.repos.phones.purge_phone(&phone.id).await {
                        warn!(
                            phone_id = %phone.id,
                            error = %cleanup,
                            "Failed to remove temporary phone"
                        );
                    } else {
                        debug!(phone_id = %phone.id, "Removed temporary phone after failed check");
                    }
                }
                Err(e)
            }
        }
    }

    /// Run one probe of `phone_id` on `gateway_id`, failing with `ResourceBusy` when the
    /// gateway is in use.
    pub async fn check_on_gateway(
        &self,
        phone_id: &str,
        gateway_id: &str,
    ) -> Result<CheckResultDbModel> {
        let phone = self.repos.phones.get_phone(phone_id).await?;
        let gateway = self.repos.gateways.get_gateway(gateway_id).await?;
        let guard = self
            .resources
            .try_acquire(ResourceKind::Gateway, &gateway.id)
            .ok_or_else(|| Error::busy(ResourceKind::Gateway.as_ref(), &gateway.id))?;
        let number = PhoneNumber::from_trusted(phone.number.clone());
        self.run_on_gateway(&phone, &number, &gateway, guard).await
    }

    /// Probe every registered gateway and persist its status.
    ///
    /// Gateways held by a check are not probed and report `checking`.
    pub async fn refresh_gateway_statuses(&self) -> Result<Vec<GatewayStatusView>> {
        let gateways = self.repos.gateways.list_gateways().await?;
        let mut views = Vec::with_capacity(gateways.len());

        for gateway in gateways {
            if self.resources.is_busy(ResourceKind::Gateway, &gateway.id) {
                views.push(status_view(&gateway, GatewayStatus::Checking));
                continue;
            }

            let status = self.capabilities.device.probe_status(&gateway).await;
            if status != gateway.status() {
                info!(
                    gateway = %gateway.name,
                    from = %gateway.status(),
                    to = %status,
                    "Gateway status changed"
                );
            }
            self.repos.gateways.update_status(&gateway.id, status).await?;
            views.push(status_view(&gateway, status));
        }

        Ok(views)
    }

    /// Stored gateway statuses, with locked gateways shown as `checking`.
    pub async fn gateway_statuses(&self) -> Result<Vec<GatewayStatusView>> {
        let gateways = self.repos.gateways.list_gateways().await?;
        Ok(gateways
            .iter()
            .map(|gateway| {
                let status = if self.resources.is_busy(ResourceKind::Gateway, &gateway.id) {
                    GatewayStatus::Checking
                } else {
                    gateway.status()
                };
                status_view(gateway, status)
            })
            .collect())
    }

    async fn realtime_result(
        &self,
        phone: &PhoneDbModel,
        cached: bool,
        outcome: Option<CheckOutcome>,
    ) -> Result<RealtimeCheckResult> {
        let results = self.repos.results.latest_per_service(&phone.id).await?;
        let statistics = self.repos.results.statistics_for_phone(&phone.id).await?;
        Ok(RealtimeCheckResult {
            phone_id: phone.id.clone(),
            number: phone.number.clone(),
            cached,
            is_spam: results.iter().any(|r| r.is_spam),
            results,
            statistics,
            outcome,
        })
    }

    async fn check_phone(
        &self,
        phone: &PhoneDbModel,
        mode: CheckMode,
        priority: Priority,
    ) -> Result<CheckOutcome> {
        let _phone_guard = self.resources.acquire(ResourceKind::Phone, &phone.id).await;
        let number = PhoneNumber::from_trusted(phone.number.clone());

        let device_track = async {
            if mode.uses_devices() {
                self.device_track(phone, &number, priority).await
            } else {
                Ok(Vec::new())
            }
        };
        let api_track = async {
            if mode.uses_api() {
                self.api_track(phone, &number).await
            } else {
                Ok(Vec::new())
            }
        };
        let (device, api) = tokio::join!(device_track, api_track);

        let mut probes = Vec::new();
        let mut track_errors = Vec::new();
        for (track, result) in [("device", device), ("api", api)] {
            match result {
                Ok(p) => probes.extend(p),
                Err(e) => {
                    warn!(phone_id = %phone.id, track, error = %e, "Check track failed");
                    track_errors.push(format!("{track}: {e}"));
                }
            }
        }

        let outcome = CheckOutcome {
            phone_id: phone.id.clone(),
            number: phone.number.clone(),
            probes,
        };
        summarize(outcome, track_errors)
    }

    async fn device_track(
        &self,
        phone: &PhoneDbModel,
        number: &PhoneNumber,
        priority: Priority,
    ) -> Result<Vec<ProbeOutcome>> {
        let gateways = self.repos.gateways.list_active_gateways().await?;
        let probes = gateways
            .iter()
            .map(|gateway| self.dispatch_gateway(phone, number, gateway, priority));
        Ok(join_all(probes).await)
    }

    async fn dispatch_gateway(
        &self,
        phone: &PhoneDbModel,
        number: &PhoneNumber,
        gateway: &GatewayDbModel,
        priority: Priority,
    ) -> ProbeOutcome {
        let source = ProbeSource::Gateway(gateway.id.clone());
        let guard = match priority {
            Priority::Normal => self.resources.try_acquire(ResourceKind::Gateway, &gateway.id),
            Priority::Realtime => {
                self.resources
                    .try_acquire_with_retry(
                        ResourceKind::Gateway,
                        &gateway.id,
                        self.config.realtime_retries,
                        self.config.realtime_retry_delay,
                    )
                    .await
            }
        };
        let Some(guard) = guard else {
            debug!(gateway = %gateway.name, phone_id = %phone.id, "Gateway busy, skipping");
            return ProbeOutcome::busy(&gateway.service_code, source);
        };

        match self.run_on_gateway(phone, number, gateway, guard).await {
            Ok(result) => ProbeOutcome::completed(&gateway.service_code, source, &result),
            Err(e) => {
                warn!(
                    gateway = %gateway.name,
                    phone_id = %phone.id,
                    error = %e,
                    "Gateway check failed"
                );
                ProbeOutcome::failed(&gateway.service_code, source, e)
            }
        }
    }

    /// One simulated call on a gateway; `_guard` keeps the gateway locked until return.
    async fn run_on_gateway(
        &self,
        phone: &PhoneDbModel,
        number: &PhoneNumber,
        gateway: &GatewayDbModel,
        _guard: ResourceGuard,
    ) -> Result<CheckResultDbModel> {
        let device = &self.capabilities.device;
        let service = self.repos.services.get_service(&gateway.service_code).await?;

        match service.app_package.as_deref() {
            Some(package) => device.start_app(gateway, package).await?,
            None => debug!(service = %service.code, "No app package, assuming app is running"),
        }

        device.simulate_inbound_call(gateway, number).await?;
        tokio::time::sleep(self.settings.call_wait().await).await;

        let captured = device.capture_evidence(gateway).await;
        if let Err(e) = device.end_call(gateway, number).await {
            warn!(gateway = %gateway.name, error = %e, "Failed to end simulated call");
        }
        let evidence = captured?;

        let text = match self.capabilities.extractor.extract_text(&evidence).await {
            Ok(text) => text,
            Err(e) => {
                warn!(gateway = %gateway.name, error = %e, "Text extraction failed");
                String::new()
            }
        };

        let matcher = self.matcher_for(&gateway.service_code).await?;
        let matched = matcher.find(&text);
        let mut result = CheckResultDbModel::new(
            &phone.id,
            &gateway.service_code,
            !matched.is_empty(),
            &matched,
            text,
        );
        result.gateway_id = Some(gateway.id.clone());
        self.repos.results.record_result(&result).await?;

        info!(
            phone_id = %phone.id,
            gateway = %gateway.name,
            service = %gateway.service_code,
            is_spam = result.is_spam,
            "Gateway check recorded"
        );
        Ok(result)
    }

    async fn api_track(
        &self,
        phone: &PhoneDbModel,
        number: &PhoneNumber,
    ) -> Result<Vec<ProbeOutcome>> {
        let apis = self.repos.services.list_active_api_services().await?;
        let probes = apis.iter().map(|api| async move {
            let source = ProbeSource::Api(api.id.clone());
            match self.run_on_api(phone, number, api).await {
                Ok(result) => ProbeOutcome::completed(&api.service_code, source, &result),
                Err(e) => {
                    warn!(api = %api.name, phone_id = %phone.id, error = %e, "API check failed");
                    ProbeOutcome::failed(&api.service_code, source, e)
                }
            }
        });
        Ok(join_all(probes).await)
    }

    async fn run_on_api(
        &self,
        phone: &PhoneDbModel,
        number: &PhoneNumber,
        api: &ApiServiceDbModel,
    ) -> Result<CheckResultDbModel> {
        let response = self.capabilities.api.check(api, number).await?;

        let matcher = self.matcher_for(&api.service_code).await?;
        let texts = std::iter::once(response.extracted_text.as_str())
            .chain(response.extracted_keywords.iter().map(String::as_str));
        let matched = matcher.find_any(texts);

        let mut result = CheckResultDbModel::new(
            &phone.id,
            &api.service_code,
            !matched.is_empty(),
            &matched,
            response.raw_response,
        );
        result.api_service_id = Some(api.id.clone());
        self.repos.results.record_result(&result).await?;

        info!(
            phone_id = %phone.id,
            api = %api.name,
            service = %api.service_code,
            is_spam = result.is_spam,
            "API check recorded"
        );
        Ok(result)
    }

    async fn matcher_for(&self, service_code: &str) -> Result<KeywordMatcher> {
        let keywords = self
            .repos
            .services
            .list_keywords_for_service(service_code)
            .await?;
        Ok(KeywordMatcher::new(keywords))
    }
}

/// Fold probe outcomes into success, partial failure or an error.
fn summarize(outcome: CheckOutcome, track_errors: Vec<String>) -> Result<CheckOutcome> {
    let succeeded = outcome.succeeded();
    let failed = outcome.failed() + track_errors.len();

    if succeeded > 0 {
        if failed > 0 {
            warn!(
                phone_id = %outcome.phone_id,
                succeeded,
                failed,
                "Partial check failure"
            );
        }
        return Ok(outcome);
    }

    if failed > 0 {
        let message = outcome
            .probes
            .iter()
            .filter_map(|p| match &p.status {
                ProbeStatus::Failed { error } => {
                    Some(format!("{}: {}", p.service_code, error))
                }
                _ => None,
            })
            .chain(track_errors)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::TotalFailure {
            attempted: failed,
            message,
        });
    }

    if outcome.skipped() > 0 {
        let busy = outcome
            .probes
            .iter()
            .filter_map(|p| match &p.source {
                ProbeSource::Gateway(id) => Some(id.as_str()),
                ProbeSource::Api(_) => None,
            })
            .collect::<Vec<_>>()
            .join(",");
        return Err(Error::busy(ResourceKind::Gateway.as_ref(), busy));
    }

    Err(Error::no_candidates(format!(
        "no active gateways or API services to check {}",
        outcome.number
    )))
}

fn status_view(gateway: &GatewayDbModel, status: GatewayStatus) -> GatewayStatusView {
    GatewayStatusView {
        gateway_id: gateway.id.clone(),
        name: gateway.name.clone(),
        service_code: gateway.service_code.clone(),
        status,
    }
}
