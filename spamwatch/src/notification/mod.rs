//! Outbound notifications.
//!
//! Callers treat delivery as fire-and-forget: [`spawn_notification`] detaches the send and
//! only logs the outcome. [`WebhookNotifier`] retries internally with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{Error, Result};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Send in the background, logging failures.
pub fn spawn_notification(notifier: Arc<dyn Notifier>, subject: String, body: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&subject, &body).await {
            warn!(subject = %subject, error = %e, "Notification delivery failed");
        }
    });
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        info!(subject = %subject, "{}", body);
        Ok(())
    }
}

/// Retry policy for webhook delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `initial * 2^attempt`, capped, with ±25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        let delay_ms = base.saturating_mul(1u64 << attempt.min(20)).min(max);

        let jitter_range = delay_ms / 4;
        let jittered = if jitter_range > 0 {
            let offset = rand::random::<u64>() % (jitter_range * 2);
            (delay_ms - jitter_range).saturating_add(offset)
        } else {
            delay_ms
        };
        Duration::from_millis(jittered)
    }
}

/// POSTs `{ "subject", "body" }` as JSON to a webhook URL.
pub struct WebhookNotifier {
    url: String,
    client: Client,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = crate::http::client_builder(Duration::from_secs(30)).build()?;
        Ok(Self {
            url: url.into(),
            client,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn deliver(&self, subject: &str, body: &str) -> Result<()> {
        let payload = json!({
            "subject": subject,
            "body": body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Error::Other(format!("webhook returned {}: {}", status, text)))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.deliver(subject, body).await {
                Ok(()) => {
                    debug!(subject = %subject, attempt = attempt + 1, "Webhook notification sent");
                    return Ok(());
                }
                Err(e) => {
                    if attempt + 1 < attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            "Webhook notification failed (attempt {}/{}), retrying in {:?}: {}",
                            attempt + 1,
                            attempts,
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Other("webhook delivery failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        };

        let first = policy.delay_for(0);
        assert!(first >= Duration::from_millis(750) && first <= Duration::from_millis(1250));

        let third = policy.delay_for(2);
        assert!(third >= Duration::from_millis(3000) && third <= Duration::from_millis(5000));

        let capped = policy.delay_for(10);
        assert!(capped <= Duration::from_millis(6250));
        assert!(capped >= Duration::from_millis(3750));
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        LogNotifier.send("subject", "body").await.unwrap();
    }
}
