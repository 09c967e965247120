//! Configuration.
//!
//! - [`AppConfig`]: process configuration read from the environment at startup.
//! - [`SettingsService`]: runtime settings persisted in the database, cached, with
//!   change events so long-running services can react without a restart.

mod app;
mod events;
mod settings;

pub use app::AppConfig;
pub use events::{SettingsEventBroadcaster, SettingsUpdateEvent};
pub use settings::{
    MAX_ALLOCATION_RETENTION_DAYS, MAX_CALL_WAIT_SECONDS, MAX_CHECK_INTERVAL_MINUTES,
    MAX_CONCURRENT_CHECKS, MIN_ALLOCATION_RETENTION_DAYS, SettingKey, SettingsService,
};
