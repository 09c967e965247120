//! Database models.

pub mod allocation;
pub mod check;
pub mod phone;
pub mod schedule;
pub mod service;
pub mod setting;

pub use allocation::{AllocationDbModel, AllocationUsage, DailyAllocationCount, PurposeAllocationCount};
pub use check::{CheckResultDbModel, StatisticsDbModel};
pub use phone::PhoneDbModel;
pub use schedule::ScheduleDbModel;
pub use service::{ApiServiceDbModel, GatewayDbModel, GatewayStatus, KeywordDbModel, SpamServiceDbModel};
pub use setting::SettingDbModel;
