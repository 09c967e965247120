//! Schedule repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::ScheduleDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_schedule(&self, id: &str) -> Result<ScheduleDbModel>;
    async fn list_schedules(&self) -> Result<Vec<ScheduleDbModel>>;
    async fn list_active_schedules(&self) -> Result<Vec<ScheduleDbModel>>;
    async fn create_schedule(&self, schedule: &ScheduleDbModel) -> Result<()>;
    async fn set_active(&self, id: &str, active: bool) -> Result<()>;
    async fn delete_schedule(&self, id: &str) -> Result<()>;
    async fn mark_run(&self, id: &str, last_run_at: i64, next_run_at: Option<i64>) -> Result<()>;
}

pub struct SqlxScheduleRepository {
    pool: SqlitePool,
}

impl SqlxScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for SqlxScheduleRepository {
    async fn get_schedule(&self, id: &str) -> Result<ScheduleDbModel> {
        sqlx::query_as::<_, ScheduleDbModel>("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Schedule", id))
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduleDbModel>> {
        let rows = sqlx::query_as::<_, ScheduleDbModel>("SELECT * FROM schedules ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_active_schedules(&self) -> Result<Vec<ScheduleDbModel>> {
        let rows = sqlx::query_as::<_, ScheduleDbModel>(
            "SELECT * FROM schedules WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_schedule(&self, schedule: &ScheduleDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (id, name, cadence, is_active, last_run_at, next_run_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.name)
        .bind(&schedule.cadence)
        .bind(schedule.is_active)
        .bind(schedule.last_run_at)
        .bind(schedule.next_run_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE schedules SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Schedule", id));
        }
        Ok(())
    }

    async fn delete_schedule(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_run(&self, id: &str, last_run_at: i64, next_run_at: Option<i64>) -> Result<()> {
        sqlx::query(
            "UPDATE schedules SET last_run_at = ?, next_run_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(last_run_at)
        .bind(next_run_at)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
