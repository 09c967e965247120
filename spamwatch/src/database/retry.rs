//! Busy retries for the write paths that run while checks are in flight.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

/// SQLite primary result codes for a locked database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// How one write operation retries when SQLite reports the database as locked.
///
/// The busy timeout on the connection already waits inside SQLite; this covers the
/// cases where it gives up, such as a checkpoint holding the file past the timeout.
#[derive(Debug, Clone, Copy)]
pub struct BusyRetry {
    op: &'static str,
    attempts: u32,
    step: Duration,
}

impl BusyRetry {
    /// Result recording: many small retries, results must not be lost.
    pub const RECORD_RESULT: Self = Self::new("record_result", 6, Duration::from_millis(25));
    /// Allocation inserts: a caller is waiting on the response.
    pub const INSERT_ALLOCATION: Self = Self::new("insert_allocation", 3, Duration::from_millis(20));

    pub const fn new(op: &'static str, attempts: u32, step: Duration) -> Self {
        Self { op, attempts, step }
    }

    /// Delay before retry `attempt` (1-based): a linear step plus up to one step of jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let step_ms = self.step.as_millis() as u64;
        let jitter = if step_ms == 0 {
            0
        } else {
            rand::random::<u64>() % step_ms
        };
        Duration::from_millis(step_ms.saturating_mul(u64::from(attempt)) + jitter)
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if is_locked(&e) && attempt < self.attempts => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    debug!(op = self.op, attempt, ?delay, "Database locked, retrying write");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn is_locked(err: &Error) -> bool {
    match err {
        Error::DatabaseSqlx(sqlx::Error::Database(db)) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // Extended codes keep the primary code in the low byte.
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_other_errors_are_returned_at_once() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = BusyRetry::RECORD_RESULT
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::validation("nope")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_returns_value() {
        let value = BusyRetry::INSERT_ALLOCATION.run(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_delay_grows_with_attempts() {
        let retry = BusyRetry::new("test", 3, Duration::from_millis(10));
        for attempt in 1..=3 {
            let delay = retry.delay(attempt);
            assert!(delay >= Duration::from_millis(10 * u64::from(attempt)));
            assert!(delay < Duration::from_millis(10 * u64::from(attempt + 1)));
        }
        assert_eq!(BusyRetry::new("none", 1, Duration::ZERO).delay(1), Duration::ZERO);
    }
}
