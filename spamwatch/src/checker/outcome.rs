//! Results of check fan-outs.

use serde::Serialize;

use crate::database::models::{CheckResultDbModel, GatewayStatus, StatisticsDbModel};

/// Where a probe ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ProbeSource {
    Gateway(String),
    Api(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    Completed {
        is_spam: bool,
        matched_keywords: Vec<String>,
    },
    Failed {
        error: String,
    },
    /// Gateway lock held by another check; not attempted.
    Busy,
}

/// One (phone, service) probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub service_code: String,
    pub source: ProbeSource,
    pub status: ProbeStatus,
}

impl ProbeOutcome {
    pub fn completed(service_code: &str, source: ProbeSource, result: &CheckResultDbModel) -> Self {
        Self {
            service_code: service_code.to_string(),
            source,
            status: ProbeStatus::Completed {
                is_spam: result.is_spam,
                matched_keywords: result.keywords(),
            },
        }
    }

    pub fn failed(service_code: &str, source: ProbeSource, error: impl ToString) -> Self {
        Self {
            service_code: service_code.to_string(),
            source,
            status: ProbeStatus::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn busy(service_code: &str, source: ProbeSource) -> Self {
        Self {
            service_code: service_code.to_string(),
            source,
            status: ProbeStatus::Busy,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ProbeStatus::Completed { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, ProbeStatus::Failed { .. })
    }

    pub fn is_spam(&self) -> bool {
        matches!(self.status, ProbeStatus::Completed { is_spam: true, .. })
    }
}

/// Aggregate of all probes run for one phone.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub phone_id: String,
    pub number: String,
    pub probes: Vec<ProbeOutcome>,
}

impl CheckOutcome {
    pub fn succeeded(&self) -> usize {
        self.probes.iter().filter(|p| p.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.probes.iter().filter(|p| p.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.probes
            .iter()
            .filter(|p| p.status == ProbeStatus::Busy)
            .count()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded() + self.failed()
    }

    pub fn is_spam(&self) -> bool {
        self.probes.iter().any(ProbeOutcome::is_spam)
    }

    /// Spam probes as (service, matched keywords).
    pub fn spam_hits(&self) -> Vec<(&str, &[String])> {
        self.probes
            .iter()
            .filter_map(|p| match &p.status {
                ProbeStatus::Completed {
                    is_spam: true,
                    matched_keywords,
                } => Some((p.service_code.as_str(), matched_keywords.as_slice())),
                _ => None,
            })
            .collect()
    }
}

/// Result of `check_all`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub outcomes: Vec<CheckOutcome>,
    /// (phone id, error) for phones whose check failed outright.
    pub errors: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.len()
    }

    pub fn spam_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_spam()).count()
    }
}

/// Result of a realtime check.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeCheckResult {
    pub phone_id: String,
    pub number: String,
    /// Served from results inside the freshness window; nothing was probed.
    pub cached: bool,
    pub is_spam: bool,
    /// Latest result per service.
    pub results: Vec<CheckResultDbModel>,
    pub statistics: Vec<StatisticsDbModel>,
    /// Probe details, absent for cached answers.
    pub outcome: Option<CheckOutcome>,
}

/// Gateway view with the implied `checking` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatusView {
    pub gateway_id: String,
    pub name: String,
    pub service_code: String,
    pub status: GatewayStatus,
}
