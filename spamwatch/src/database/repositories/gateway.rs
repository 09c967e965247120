//! Device gateway repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{GatewayDbModel, GatewayStatus};
use crate::database::time::now_ms;
use crate::{Error, Result};

#[async_trait]
pub trait GatewayRepository: Send + Sync {
    async fn get_gateway(&self, id: &str) -> Result<GatewayDbModel>;
    async fn list_gateways(&self) -> Result<Vec<GatewayDbModel>>;
    /// Gateways flagged active and not known to be offline.
    async fn list_active_gateways(&self) -> Result<Vec<GatewayDbModel>>;
    async fn create_gateway(&self, gateway: &GatewayDbModel) -> Result<()>;
    async fn update_status(&self, id: &str, status: GatewayStatus) -> Result<()>;
}

pub struct SqlxGatewayRepository {
    pool: SqlitePool,
}

impl SqlxGatewayRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GatewayRepository for SqlxGatewayRepository {
    async fn get_gateway(&self, id: &str) -> Result<GatewayDbModel> {
        sqlx::query_as::<_, GatewayDbModel>("SELECT * FROM gateways WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Gateway", id))
    }

    async fn list_gateways(&self) -> Result<Vec<GatewayDbModel>> {
        let gateways = sqlx::query_as::<_, GatewayDbModel>("SELECT * FROM gateways ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(gateways)
    }

    async fn list_active_gateways(&self) -> Result<Vec<GatewayDbModel>> {
        let gateways = sqlx::query_as::<_, GatewayDbModel>(
            "SELECT * FROM gateways WHERE is_active = 1 AND status != 'offline' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(gateways)
    }

    async fn create_gateway(&self, gateway: &GatewayDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gateways (id, name, service_code, container_name, host, adb_port, status,
                                  is_active, last_status_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&gateway.id)
        .bind(&gateway.name)
        .bind(&gateway.service_code)
        .bind(&gateway.container_name)
        .bind(&gateway.host)
        .bind(gateway.adb_port)
        .bind(&gateway.status)
        .bind(gateway.is_active)
        .bind(gateway.last_status_at)
        .bind(gateway.created_at)
        .bind(gateway.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(&self, id: &str, status: GatewayStatus) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            "UPDATE gateways SET status = ?, last_status_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
