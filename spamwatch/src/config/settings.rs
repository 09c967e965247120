//! Runtime settings service.
//!
//! Settings live in the `settings` key/value table. Reads go through a small TTL cache;
//! writes validate the value, invalidate the cache entry and broadcast a
//! [`SettingsUpdateEvent`]. Stored values that fail to parse fall back to defaults.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::events::{SettingsEventBroadcaster, SettingsUpdateEvent};
use crate::database::repositories::SettingsRepository;
use crate::domain::CheckMode;
use crate::{Error, Result};

/// Default cache TTL.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Allocations are never purged before this many days.
pub const MIN_ALLOCATION_RETENTION_DAYS: i64 = 7;

pub const MAX_ALLOCATION_RETENTION_DAYS: i64 = 3650;

/// One year, the longest interval a cadence accepts.
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

pub const MAX_CONCURRENT_CHECKS: usize = 64;

pub const MAX_CALL_WAIT_SECONDS: u64 = 300;

/// Known runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SettingKey {
    /// Cadence of the default scheduler job, in minutes.
    CheckIntervalMinutes,
    /// Whole-phone parallelism of `check_all`.
    MaxConcurrentChecks,
    /// `device_only`, `api_only` or `both`.
    CheckMode,
    /// Seconds to let the provider app react to a simulated call.
    CallWaitSeconds,
    AllocationRetentionDays,
    LogFilter,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIntervalMinutes => "check_interval_minutes",
            Self::MaxConcurrentChecks => "max_concurrent_checks",
            Self::CheckMode => "check_mode",
            Self::CallWaitSeconds => "call_wait_seconds",
            Self::AllocationRetentionDays => "allocation_retention_days",
            Self::LogFilter => "log_filter",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Self::CheckIntervalMinutes => "60",
            Self::MaxConcurrentChecks => "3",
            Self::CheckMode => "device_only",
            Self::CallWaitSeconds => "8",
            Self::AllocationRetentionDays => "90",
            Self::LogFilter => "",
        }
    }

    /// Reject values that the typed getters could not use.
    fn validate(&self, value: &str) -> Result<()> {
        let value = value.trim();
        let within = |min: u64, max: u64| {
            value
                .parse::<u64>()
                .ok()
                .filter(|n| (min..=max).contains(n))
                .is_some()
        };
        let ok = match self {
            Self::CheckIntervalMinutes => within(1, MAX_CHECK_INTERVAL_MINUTES),
            Self::MaxConcurrentChecks => within(1, MAX_CONCURRENT_CHECKS as u64),
            Self::AllocationRetentionDays => within(1, MAX_ALLOCATION_RETENTION_DAYS as u64),
            Self::CallWaitSeconds => within(0, MAX_CALL_WAIT_SECONDS),
            Self::CheckMode => CheckMode::from_str(value).is_ok(),
            Self::LogFilter => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "invalid value '{}' for setting {}",
                value, self
            )))
        }
    }
}

/// Cached access to runtime settings.
pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    cache: DashMap<SettingKey, (Option<String>, Instant)>,
    ttl: Duration,
    broadcaster: SettingsEventBroadcaster,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        Self::with_ttl(repo, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(repo: Arc<dyn SettingsRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            cache: DashMap::new(),
            ttl,
            broadcaster: SettingsEventBroadcaster::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsUpdateEvent> {
        self.broadcaster.subscribe()
    }

    /// Raw stored value, `None` when unset.
    pub async fn get_raw(&self, key: SettingKey) -> Result<Option<String>> {
        if let Some(entry) = self.cache.get(&key) {
            let (value, cached_at) = entry.value();
            if cached_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = self.repo.get_setting(key.as_str()).await?;
        self.cache.insert(key, (value.clone(), Instant::now()));
        Ok(value)
    }

    /// Validate and persist a setting, then notify subscribers.
    pub async fn set(&self, key: SettingKey, value: &str) -> Result<()> {
        key.validate(value)?;
        self.repo.set_setting(key.as_str(), value.trim()).await?;
        self.cache.remove(&key);
        self.broadcaster.publish(SettingsUpdateEvent::Changed {
            key: key.as_str().to_string(),
        });
        info!(key = %key, value = %value.trim(), "Setting updated");
        Ok(())
    }

    /// Drop all cached values.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    async fn parsed<T: FromStr>(&self, key: SettingKey, fallback: T) -> T {
        let raw = match self.get_raw(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read setting, using default");
                None
            }
        };

        if let Some(raw) = raw {
            match raw.trim().parse::<T>() {
                Ok(value) => return value,
                Err(_) => warn!(key = %key, value = %raw, "Invalid stored setting, using default"),
            }
        }

        fallback
    }

    pub async fn check_interval_minutes(&self) -> u64 {
        self.parsed(SettingKey::CheckIntervalMinutes, 60u64)
            .await
            .clamp(1, MAX_CHECK_INTERVAL_MINUTES)
    }

    pub async fn max_concurrent_checks(&self) -> usize {
        self.parsed(SettingKey::MaxConcurrentChecks, 3usize)
            .await
            .clamp(1, MAX_CONCURRENT_CHECKS)
    }

    pub async fn check_mode(&self) -> CheckMode {
        self.parsed(SettingKey::CheckMode, CheckMode::default()).await
    }

    pub async fn call_wait(&self) -> Duration {
        let secs = self.parsed(SettingKey::CallWaitSeconds, 8u64).await;
        Duration::from_secs(secs.min(MAX_CALL_WAIT_SECONDS))
    }

    pub async fn allocation_retention_days(&self) -> i64 {
        self.parsed(SettingKey::AllocationRetentionDays, 90i64)
            .await
            .clamp(MIN_ALLOCATION_RETENTION_DAYS, MAX_ALLOCATION_RETENTION_DAYS)
    }

    pub async fn log_filter(&self) -> Option<String> {
        match self.get_raw(SettingKey::LogFilter).await {
            Ok(Some(v)) if !v.trim().is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read log filter setting");
                None
            }
        }
    }
}
