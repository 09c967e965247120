//! Phone database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// A company-owned phone number under watch.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhoneDbModel {
    pub id: String,
    /// Normalized number (digits, optional leading `+`).
    pub number: String,
    pub description: String,
    pub owner_id: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PhoneDbModel {
    pub fn new(number: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            number: number.into(),
            description: description.into(),
            owner_id: None,
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Inactive placeholder created for a one-off realtime check.
    pub fn temporary(number: impl Into<String>) -> Self {
        Self {
            is_active: false,
            ..Self::new(number, "temporary (realtime check)")
        }
    }
}
