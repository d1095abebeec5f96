use crate::error::DbError;
use crate::models::{InstanceRecord, InstanceRow};
use async_trait::async_trait;
use chrono::Utc;
use provision_core::{InstanceRegistry, ProviderError};
use sqlx::SqlitePool;
use tracing::debug;

#[derive(Clone)]
pub struct InstanceRepository {
    pool: SqlitePool,
}

impl InstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<InstanceRecord>, DbError> {
        let row: Option<InstanceRow> = sqlx::query_as(
            r#"
            SELECT id, provider_id, public_address, updated_at
            FROM instances
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(InstanceRow::into_record))
    }

    pub async fn get(&self, id: &str) -> Result<InstanceRecord, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::InstanceNotFound(id.to_string()))
    }

    /// Store the provider-assigned id. Creates the row on first write.
    pub async fn set_provider_id(&self, id: &str, provider_id: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, provider_id, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                provider_id = excluded.provider_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(provider_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(record_id = %id, provider_id = %provider_id, "Recorded provider id");
        Ok(())
    }

    pub async fn set_public_address(&self, id: &str, address: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, public_address, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                public_address = excluded.public_address,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(address)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(record_id = %id, address = %address, "Recorded public address");
        Ok(())
    }
}

#[async_trait]
impl InstanceRegistry for InstanceRepository {
    async fn record_instance_id(
        &self,
        record_id: &str,
        provider_id: &str,
    ) -> Result<(), ProviderError> {
        Ok(self.set_provider_id(record_id, provider_id).await?)
    }

    async fn record_public_address(
        &self,
        record_id: &str,
        address: &str,
    ) -> Result<(), ProviderError> {
        Ok(self.set_public_address(record_id, address).await?)
    }
}
