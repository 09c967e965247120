//! Spam service, API service and keyword repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{ApiServiceDbModel, KeywordDbModel, SpamServiceDbModel};
use crate::{Error, Result};

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn get_service(&self, code: &str) -> Result<SpamServiceDbModel>;
    async fn list_services(&self) -> Result<Vec<SpamServiceDbModel>>;
    async fn upsert_service(&self, service: &SpamServiceDbModel) -> Result<()>;

    async fn list_active_api_services(&self) -> Result<Vec<ApiServiceDbModel>>;
    async fn create_api_service(&self, api: &ApiServiceDbModel) -> Result<()>;

    /// Active keywords for a service: global ones unioned with service-scoped ones.
    async fn list_keywords_for_service(&self, service_code: &str) -> Result<Vec<String>>;
    async fn create_keyword(&self, keyword: &KeywordDbModel) -> Result<()>;
}

pub struct SqlxServiceRepository {
    pool: SqlitePool,
}

impl SqlxServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceRepository for SqlxServiceRepository {
    async fn get_service(&self, code: &str) -> Result<SpamServiceDbModel> {
        sqlx::query_as::<_, SpamServiceDbModel>("SELECT * FROM spam_services WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("SpamService", code))
    }

    async fn list_services(&self) -> Result<Vec<SpamServiceDbModel>> {
        let services =
            sqlx::query_as::<_, SpamServiceDbModel>("SELECT * FROM spam_services ORDER BY code")
                .fetch_all(&self.pool)
                .await?;
        Ok(services)
    }

    async fn upsert_service(&self, service: &SpamServiceDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO spam_services (code, name, app_package, is_custom, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                app_package = excluded.app_package,
                is_custom = excluded.is_custom
            "#,
        )
        .bind(&service.code)
        .bind(&service.name)
        .bind(&service.app_package)
        .bind(service.is_custom)
        .bind(service.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active_api_services(&self) -> Result<Vec<ApiServiceDbModel>> {
        let apis = sqlx::query_as::<_, ApiServiceDbModel>(
            "SELECT * FROM api_services WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(apis)
    }

    async fn create_api_service(&self, api: &ApiServiceDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_services (id, name, service_code, method, url_template, headers,
                                      body_template, text_path, keywords_path, timeout_secs,
                                      is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&api.id)
        .bind(&api.name)
        .bind(&api.service_code)
        .bind(&api.method)
        .bind(&api.url_template)
        .bind(&api.headers)
        .bind(&api.body_template)
        .bind(&api.text_path)
        .bind(&api.keywords_path)
        .bind(api.timeout_secs)
        .bind(api.is_active)
        .bind(api.created_at)
        .bind(api.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_keywords_for_service(&self, service_code: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT keyword FROM keywords
            WHERE is_active = 1 AND (service_code IS NULL OR service_code = ?)
            ORDER BY keyword
            "#,
        )
        .bind(service_code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    async fn create_keyword(&self, keyword: &KeywordDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO keywords (id, keyword, service_code, is_active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&keyword.id)
        .bind(&keyword.keyword)
        .bind(&keyword.service_code)
        .bind(keyword.is_active)
        .bind(keyword.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
