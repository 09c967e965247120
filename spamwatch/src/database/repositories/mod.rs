//! Repository layer.
//!
//! Each repository is an async trait with a `Sqlx*` implementation so that services
//! can be exercised against fakes or a real SQLite database.

pub mod allocation;
pub mod check_result;
pub mod gateway;
pub mod phone;
pub mod schedule;
pub mod service;
pub mod setting;

pub use allocation::{AllocationRepository, SqlxAllocationRepository};
pub use check_result::{CheckResultRepository, SqlxCheckResultRepository};
pub use gateway::{GatewayRepository, SqlxGatewayRepository};
pub use phone::{PhoneRepository, SqlxPhoneRepository};
pub use schedule::{ScheduleRepository, SqlxScheduleRepository};
pub use service::{ServiceRepository, SqlxServiceRepository};
pub use setting::{SettingsRepository, SqlxSettingsRepository};
