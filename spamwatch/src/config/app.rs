//! Process configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite:spamwatch.db?mode=rwc";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHECK_WORKERS: usize = 4;

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    pub adb_path: String,
    pub tesseract_path: String,
    /// Webhook receiving spam summaries; `None` logs them instead.
    pub notify_webhook_url: Option<String>,
    pub api_check_timeout: Duration,
    pub check_workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            adb_path: "adb".to_string(),
            tesseract_path: "tesseract".to_string(),
            notify_webhook_url: None,
            api_check_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
            check_workers: DEFAULT_CHECK_WORKERS,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_timeout_secs = match non_empty("API_CHECK_TIMEOUT_SECS") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                Error::config(format!("API_CHECK_TIMEOUT_SECS must be an integer, got '{}'", v))
            })?,
            None => DEFAULT_API_TIMEOUT_SECS,
        };

        let check_workers = match non_empty("CHECK_WORKERS") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    Error::config(format!("CHECK_WORKERS must be a positive integer, got '{}'", v))
                })?,
            None => DEFAULT_CHECK_WORKERS,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL").unwrap_or(defaults.database_url),
            log_dir: non_empty("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            adb_path: non_empty("ADB_PATH").unwrap_or(defaults.adb_path),
            tesseract_path: non_empty("TESSERACT_PATH").unwrap_or(defaults.tesseract_path),
            notify_webhook_url: non_empty("NOTIFY_WEBHOOK_URL"),
            api_check_timeout: Duration::from_secs(api_timeout_secs.max(1)),
            check_workers,
        })
    }
}
