//! Phone repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::PhoneDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Phone repository trait.
#[async_trait]
pub trait PhoneRepository: Send + Sync {
    async fn get_phone(&self, id: &str) -> Result<PhoneDbModel>;
    async fn find_by_number(&self, number: &str) -> Result<Option<PhoneDbModel>>;
    async fn list_active_phones(&self) -> Result<Vec<PhoneDbModel>>;
    async fn create_phone(&self, phone: &PhoneDbModel) -> Result<()>;
    async fn set_active(&self, id: &str, active: bool) -> Result<()>;
    async fn soft_delete_phone(&self, id: &str) -> Result<()>;
    /// Remove the phone row together with its check results and statistics.
    async fn purge_phone(&self, id: &str) -> Result<()>;
    /// Active phones whose latest verdict on every service is non-spam (or never checked).
    async fn list_clean_phones(&self) -> Result<Vec<PhoneDbModel>>;
}

/// SQLx implementation of PhoneRepository.
pub struct SqlxPhoneRepository {
    pool: SqlitePool,
}

impl SqlxPhoneRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PhoneRepository for SqlxPhoneRepository {
    async fn get_phone(&self, id: &str) -> Result<PhoneDbModel> {
        sqlx::query_as::<_, PhoneDbModel>("SELECT * FROM phones WHERE id = ? AND is_deleted = 0")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Phone", id))
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<PhoneDbModel>> {
        let phone = sqlx::query_as::<_, PhoneDbModel>(
            "SELECT * FROM phones WHERE number = ? AND is_deleted = 0",
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(phone)
    }

    async fn list_active_phones(&self) -> Result<Vec<PhoneDbModel>> {
        let phones = sqlx::query_as::<_, PhoneDbModel>(
            "SELECT * FROM phones WHERE is_active = 1 AND is_deleted = 0 ORDER BY number",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(phones)
    }

    async fn create_phone(&self, phone: &PhoneDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO phones (id, number, description, owner_id, is_active, is_deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&phone.id)
        .bind(&phone.number)
        .bind(&phone.description)
        .bind(&phone.owner_id)
        .bind(phone.is_active)
        .bind(phone.is_deleted)
        .bind(phone.created_at)
        .bind(phone.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE phones SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Phone", id));
        }
        Ok(())
    }

    async fn soft_delete_phone(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE phones SET is_deleted = 1, is_active = 0, updated_at = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_phone(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM check_results WHERE phone_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM statistics WHERE phone_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM phones WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_clean_phones(&self) -> Result<Vec<PhoneDbModel>> {
        let phones = sqlx::query_as::<_, PhoneDbModel>(
            r#"
            SELECT p.* FROM phones p
            WHERE p.is_active = 1 AND p.is_deleted = 0
              AND NOT EXISTS (
                SELECT 1 FROM check_results cr
                WHERE cr.phone_id = p.id
                  AND cr.is_spam = 1
                  AND cr.checked_at = (
                    SELECT MAX(c2.checked_at) FROM check_results c2
                    WHERE c2.phone_id = cr.phone_id AND c2.service_code = cr.service_code
                  )
              )
            ORDER BY p.number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(phones)
    }
}
