//! Check result and statistics models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Immutable record of one (phone, service) probe.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResultDbModel {
    pub id: String,
    pub phone_id: String,
    pub service_code: String,
    pub gateway_id: Option<String>,
    pub api_service_id: Option<String>,
    pub is_spam: bool,
    /// JSON array of matched keywords.
    pub matched_keywords: String,
    pub raw_text: String,
    pub evidence_path: Option<String>,
    pub checked_at: i64,
}

impl CheckResultDbModel {
    pub fn new(
        phone_id: impl Into<String>,
        service_code: impl Into<String>,
        is_spam: bool,
        matched_keywords: &[String],
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone_id: phone_id.into(),
            service_code: service_code.into(),
            gateway_id: None,
            api_service_id: None,
            is_spam,
            matched_keywords: serde_json::to_string(matched_keywords)
                .unwrap_or_else(|_| "[]".to_string()),
            raw_text: raw_text.into(),
            evidence_path: None,
            checked_at: now_ms(),
        }
    }

    pub fn keywords(&self) -> Vec<String> {
        serde_json::from_str(&self.matched_keywords).unwrap_or_default()
    }
}

/// Running aggregate per (phone, service).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatisticsDbModel {
    pub phone_id: String,
    pub service_code: String,
    pub total_checks: i64,
    pub spam_count: i64,
    pub first_spam_at: Option<i64>,
    pub last_checked_at: i64,
}
