//! Allocation models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Immutable record of handing one number out.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationDbModel {
    pub id: String,
    pub phone_id: String,
    pub requester_id: String,
    pub purpose: String,
    /// JSON object of free-form metadata.
    pub metadata: String,
    pub allocated_at: i64,
}

impl AllocationDbModel {
    pub fn new(
        phone_id: impl Into<String>,
        requester_id: impl Into<String>,
        purpose: impl Into<String>,
        metadata: &serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone_id: phone_id.into(),
            requester_id: requester_id.into(),
            purpose: purpose.into(),
            metadata: metadata.to_string(),
            allocated_at: now_ms(),
        }
    }
}

/// Per-phone allocation history used for weighting.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct AllocationUsage {
    pub phone_id: String,
    pub total_allocations: i64,
    pub last_allocated_at: Option<i64>,
    pub allocations_today: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyAllocationCount {
    /// `YYYY-MM-DD` (UTC).
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurposeAllocationCount {
    pub purpose: String,
    pub count: i64,
}
