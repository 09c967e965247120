//! Allocation repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{
    AllocationDbModel, AllocationUsage, DailyAllocationCount, PurposeAllocationCount,
};
use crate::database::retry::BusyRetry;

#[async_trait]
pub trait AllocationRepository: Send + Sync {
    async fn insert_allocation(&self, allocation: &AllocationDbModel) -> Result<()>;
    async fn list_for_phone(&self, phone_id: &str) -> Result<Vec<AllocationDbModel>>;
    /// Allocation history of every phone that was ever allocated.
    async fn usage(&self, today_start_ms: i64) -> Result<Vec<AllocationUsage>>;
    async fn counts_by_day(&self, since_ms: i64) -> Result<Vec<DailyAllocationCount>>;
    async fn counts_by_purpose(&self, since_ms: i64) -> Result<Vec<PurposeAllocationCount>>;
    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

pub struct SqlxAllocationRepository {
    pool: SqlitePool,
}

impl SqlxAllocationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllocationRepository for SqlxAllocationRepository {
    async fn insert_allocation(&self, allocation: &AllocationDbModel) -> Result<()> {
        BusyRetry::INSERT_ALLOCATION
            .run(|| async move {
                sqlx::query(
                    r#"
                    INSERT INTO allocations (id, phone_id, requester_id, purpose, metadata, allocated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&allocation.id)
                .bind(&allocation.phone_id)
                .bind(&allocation.requester_id)
                .bind(&allocation.purpose)
                .bind(&allocation.metadata)
                .bind(allocation.allocated_at)
                .execute(&self.pool)
                .await?;
                Ok(())
            })
            .await
    }

    async fn list_for_phone(&self, phone_id: &str) -> Result<Vec<AllocationDbModel>> {
        let rows = sqlx::query_as::<_, AllocationDbModel>(
            "SELECT * FROM allocations WHERE phone_id = ? ORDER BY allocated_at DESC",
        )
        .bind(phone_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn usage(&self, today_start_ms: i64) -> Result<Vec<AllocationUsage>> {
        let rows = sqlx::query_as::<_, AllocationUsage>(
            r#"
            SELECT phone_id,
                   COUNT(*) AS total_allocations,
                   MAX(allocated_at) AS last_allocated_at,
                   SUM(CASE WHEN allocated_at >= ? THEN 1 ELSE 0 END) AS allocations_today
            FROM allocations
            GROUP BY phone_id
            "#,
        )
        .bind(today_start_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn counts_by_day(&self, since_ms: i64) -> Result<Vec<DailyAllocationCount>> {
        let rows = sqlx::query_as::<_, DailyAllocationCount>(
            r#"
            SELECT strftime('%Y-%m-%d', allocated_at / 1000, 'unixepoch') AS day,
                   COUNT(*) AS count
            FROM allocations
            WHERE allocated_at >= ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn counts_by_purpose(&self, since_ms: i64) -> Result<Vec<PurposeAllocationCount>> {
        let rows = sqlx::query_as::<_, PurposeAllocationCount>(
            r#"
            SELECT purpose, COUNT(*) AS count
            FROM allocations
            WHERE allocated_at >= ?
            GROUP BY purpose
            ORDER BY count DESC, purpose
            "#,
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM allocations WHERE allocated_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
