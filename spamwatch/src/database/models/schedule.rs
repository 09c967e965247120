//! Schedule model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// A named recurring check job.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleDbModel {
    pub id: String,
    pub name: String,
    /// Cadence expression, see [`crate::domain::Cadence`].
    pub cadence: String,
    pub is_active: bool,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduleDbModel {
    pub fn new(name: impl Into<String>, cadence: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            cadence: cadence.into(),
            is_active: true,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
