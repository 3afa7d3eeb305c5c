//! Destination repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::DestinationDbModel;
use crate::domain::DestinationConfig;
use crate::{Error, Result};

/// Destination repository trait.
#[async_trait]
pub trait DestinationRepository: Send + Sync {
    async fn get_destination(&self, id: &str) -> Result<DestinationConfig>;
    async fn list_destinations(&self) -> Result<Vec<DestinationConfig>>;
    async fn upsert_destination(&self, destination: &DestinationConfig) -> Result<()>;

    /// Write every configured destination, replacing stored rows with the same id.
    async fn sync_destinations(&self, destinations: &[DestinationConfig]) -> Result<()> {
        for destination in destinations {
            self.upsert_destination(destination).await?;
        }
        Ok(())
    }
}

/// SQLx implementation of DestinationRepository.
pub struct SqlxDestinationRepository {
    pool: SqlitePool,
}

impl SqlxDestinationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DestinationRepository for SqlxDestinationRepository {
    async fn get_destination(&self, id: &str) -> Result<DestinationConfig> {
        sqlx::query_as::<_, DestinationDbModel>("SELECT * FROM destinations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Destination", id))?
            .into_config()
    }

    async fn list_destinations(&self) -> Result<Vec<DestinationConfig>> {
        let rows = sqlx::query_as::<_, DestinationDbModel>("SELECT * FROM destinations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DestinationDbModel::into_config).collect()
    }

    async fn upsert_destination(&self, destination: &DestinationConfig) -> Result<()> {
        let row = DestinationDbModel::from_config(destination)?;
        sqlx::query(
            r#"
            INSERT INTO destinations (
                id, name, api_endpoint, max_size_bytes, supported_formats,
                required_fields, daily_limit, hourly_limit, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                api_endpoint = excluded.api_endpoint,
                max_size_bytes = excluded.max_size_bytes,
                supported_formats = excluded.supported_formats,
                required_fields = excluded.required_fields,
                daily_limit = excluded.daily_limit,
                hourly_limit = excluded.hourly_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.api_endpoint)
        .bind(row.max_size_bytes)
        .bind(&row.supported_formats)
        .bind(&row.required_fields)
        .bind(row.daily_limit)
        .bind(row.hourly_limit)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
