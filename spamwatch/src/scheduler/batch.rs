//! One firing of a check job.
//!
//! Active phones are checked one after another, each bounded by a per-phone timeout.
//! A check that outlives its timeout keeps running detached until its call is ended.
//! Failures and timeouts are counted and the batch moves on. When spam was found a
//! single summary notification goes out.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::checker::CheckService;
use crate::database::repositories::PhoneRepository;
use crate::notification::{Notifier, spawn_notification};

/// A spam verdict found during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpamHit {
    pub number: String,
    pub service_code: String,
    pub keywords: Vec<String>,
}

/// What a batch did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub checked: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: bool,
    pub spam: Vec<SpamHit>,
}

impl BatchReport {
    /// Distinct numbers with at least one spam verdict.
    pub fn spam_numbers(&self) -> usize {
        let mut numbers: Vec<&str> = self.spam.iter().map(|h| h.number.as_str()).collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers.len()
    }
}

/// Runs check batches for scheduled jobs.
pub struct BatchRunner {
    checker: Arc<CheckService>,
    phones: Arc<dyn PhoneRepository>,
    notifier: Arc<dyn Notifier>,
    per_phone_timeout: Duration,
    checks: TaskTracker,
}

impl BatchRunner {
    pub fn new(
        checker: Arc<CheckService>,
        phones: Arc<dyn PhoneRepository>,
        notifier: Arc<dyn Notifier>,
        per_phone_timeout: Duration,
    ) -> Self {
        Self {
            checker,
            phones,
            notifier,
            per_phone_timeout,
            checks: TaskTracker::new(),
        }
    }

    /// Wait until every phone check started so far has finished, including checks
    /// a batch stopped waiting for.
    pub async fn wait_for_checks(&self) {
        self.checks.close();
        self.checks.wait().await;
        self.checks.reopen();
    }

    pub async fn run(&self, job_name: &str, token: &CancellationToken) -> BatchReport {
        let mut report = BatchReport::default();

        let phones = match self.phones.list_active_phones().await {
            Ok(phones) => phones,
            Err(e) => {
                warn!(job = %job_name, error = %e, "Failed to load active phones");
                return report;
            }
        };
        report.total = phones.len();
        info!(job = %job_name, phones = phones.len(), "Check batch started");

        for phone in &phones {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            // Detached on timeout or cancel; the task still ends its call and drops its guards.
            let checker = self.checker.clone();
            let phone_id = phone.id.clone();
            let mut handle = self
                .checks
                .spawn(async move { checker.check_one(&phone_id).await });

            let result = tokio::select! {
                _ = token.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                result = tokio::time::timeout(self.per_phone_timeout, &mut handle) => result,
            };

            match result {
                Ok(Ok(Ok(outcome))) => {
                    report.checked += 1;
                    for (service_code, keywords) in outcome.spam_hits() {
                        report.spam.push(SpamHit {
                            number: phone.number.clone(),
                            service_code: service_code.to_string(),
                            keywords: keywords.to_vec(),
                        });
                    }
                }
                Ok(Ok(Err(e))) => {
                    report.failed += 1;
                    debug!(job = %job_name, phone_id = %phone.id, error = %e, "Phone check failed");
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(job = %job_name, phone_id = %phone.id, error = %e, "Phone check task failed");
                }
                Err(_) => {
                    report.timed_out += 1;
                    warn!(
                        job = %job_name,
                        phone_id = %phone.id,
                        timeout = ?self.per_phone_timeout,
                        "Phone check timed out"
                    );
                }
            }
        }

        info!(
            job = %job_name,
            total = report.total,
            checked = report.checked,
            failed = report.failed,
            timed_out = report.timed_out,
            spam = report.spam.len(),
            cancelled = report.cancelled,
            "Check batch finished"
        );

        if !report.spam.is_empty() {
            let (subject, body) = spam_summary(job_name, &report);
            spawn_notification(self.notifier.clone(), subject, body);
        }

        report
    }
}

/// Subject and body of the spam summary notification.
pub fn spam_summary(job_name: &str, report: &BatchReport) -> (String, String) {
    let subject = format!(
        "Spam detected for {} number(s) ({})",
        report.spam_numbers(),
        job_name
    );

    let mut body = format!(
        "{} spam verdict(s) across {} checked number(s):\n",
        report.spam.len(),
        report.checked
    );
    for hit in &report.spam {
        let keywords = if hit.keywords.is_empty() {
            String::new()
        } else {
            format!(" [{}]", hit.keywords.join(", "))
        };
        body.push_str(&format!("- {} on {}{}\n", hit.number, hit.service_code, keywords));
    }

    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spam_summary() {
        let report = BatchReport {
            total: 3,
            checked: 3,
            spam: vec![
                SpamHit {
                    number: "+15550001".to_string(),
                    service_code: "truecaller".to_string(),
                    keywords: vec!["spam".to_string(), "scam".to_string()],
                },
                SpamHit {
                    number: "+15550001".to_string(),
                    service_code: "hiya".to_string(),
                    keywords: Vec::new(),
                },
            ],
            ..Default::default()
        };

        let (subject, body) = spam_summary("default", &report);
        assert_eq!(subject, "Spam detected for 1 number(s) (default)");
        assert!(body.starts_with("2 spam verdict(s) across 3 checked number(s)"));
        assert!(body.contains("- +15550001 on truecaller [spam, scam]"));
        assert!(body.contains("- +15550001 on hiya\n"));
    }
}
