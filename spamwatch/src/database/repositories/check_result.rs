//! Check result and statistics repository.
//!
//! Results are append-only. Recording a result upserts the matching statistics row in
//! the same transaction; an in-process lock serializes these writes so that services
//! finishing concurrently for the same phone never lose an increment.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::Result;
use crate::database::models::{CheckResultDbModel, StatisticsDbModel};
use crate::database::retry::BusyRetry;

#[async_trait]
pub trait CheckResultRepository: Send + Sync {
    /// Insert a result and update the (phone, service) statistics.
    async fn record_result(&self, result: &CheckResultDbModel) -> Result<()>;
    /// Most recent result per service for a phone.
    async fn latest_per_service(&self, phone_id: &str) -> Result<Vec<CheckResultDbModel>>;
    /// Results for a phone checked at or after `since_ms`.
    async fn results_since(&self, phone_id: &str, since_ms: i64)
    -> Result<Vec<CheckResultDbModel>>;
    async fn statistics_for_phone(&self, phone_id: &str) -> Result<Vec<StatisticsDbModel>>;
    /// Delete results and statistics of one phone, returns deleted result count.
    async fn delete_for_phone(&self, phone_id: &str) -> Result<u64>;
}

pub struct SqlxCheckResultRepository {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqlxCheckResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    async fn record_once(&self, result: &CheckResultDbModel) -> Result<()> {
        // Both statements write, so the transaction holds the write lock from its first insert.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO check_results (id, phone_id, service_code, gateway_id, api_service_id,
                                       is_spam, matched_keywords, raw_text, evidence_path, checked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.id)
        .bind(&result.phone_id)
        .bind(&result.service_code)
        .bind(&result.gateway_id)
        .bind(&result.api_service_id)
        .bind(result.is_spam)
        .bind(&result.matched_keywords)
        .bind(&result.raw_text)
        .bind(&result.evidence_path)
        .bind(result.checked_at)
        .execute(&mut *tx)
        .await?;

        let first_spam_at = result.is_spam.then_some(result.checked_at);
        sqlx::query(
            r#"
            INSERT INTO statistics (phone_id, service_code, total_checks, spam_count, first_spam_at, last_checked_at)
            VALUES (?, ?, 1, ?, ?, ?)
            ON CONFLICT(phone_id, service_code) DO UPDATE SET
                total_checks = statistics.total_checks + 1,
                spam_count = statistics.spam_count + excluded.spam_count,
                first_spam_at = COALESCE(statistics.first_spam_at, excluded.first_spam_at),
                last_checked_at = MAX(statistics.last_checked_at, excluded.last_checked_at)
            "#,
        )
        .bind(&result.phone_id)
        .bind(&result.service_code)
        .bind(i64::from(result.is_spam))
        .bind(first_spam_at)
        .bind(result.checked_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CheckResultRepository for SqlxCheckResultRepository {
    async fn record_result(&self, result: &CheckResultDbModel) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        BusyRetry::RECORD_RESULT
            .run(|| self.record_once(result))
            .await
    }

    async fn latest_per_service(&self, phone_id: &str) -> Result<Vec<CheckResultDbModel>> {
        let rows = sqlx::query_as::<_, CheckResultDbModel>(
            r#"
            SELECT cr.* FROM check_results cr
            WHERE cr.phone_id = ?
              AND cr.checked_at = (
                SELECT MAX(c2.checked_at) FROM check_results c2
                WHERE c2.phone_id = cr.phone_id AND c2.service_code = cr.service_code
              )
            ORDER BY cr.service_code, cr.id
            "#,
        )
        .bind(phone_id)
        .fetch_all(&self.pool)
        .await?;

        // Equal timestamps can yield two rows for one service; keep the first.
        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|r| seen.insert(r.service_code.clone()))
            .collect())
    }

    async fn results_since(
        &self,
        phone_id: &str,
        since_ms: i64,
    ) -> Result<Vec<CheckResultDbModel>> {
        let rows = sqlx::query_as::<_, CheckResultDbModel>(
            "SELECT * FROM check_results WHERE phone_id = ? AND checked_at >= ? ORDER BY checked_at DESC",
        )
        .bind(phone_id)
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn statistics_for_phone(&self, phone_id: &str) -> Result<Vec<StatisticsDbModel>> {
        let rows = sqlx::query_as::<_, StatisticsDbModel>(
            "SELECT * FROM statistics WHERE phone_id = ? ORDER BY service_code",
        )
        .bind(phone_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_for_phone(&self, phone_id: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM check_results WHERE phone_id = ?")
            .bind(phone_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM statistics WHERE phone_id = ?")
            .bind(phone_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted)
    }
}
