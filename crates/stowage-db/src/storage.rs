//! Storage repository: configured backends in the `storages` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use std::collections::BTreeMap;
use stowage_core::{AppError, StorageConfig, StorageKind, StorageRepository};
use uuid::Uuid;

const COLUMNS: &str = "id, name, kind, enabled, is_default, config, created_at, updated_at";

/// Row type for the storages table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct StorageRow {
    pub id: Uuid,
    pub name: String,
    pub kind: StorageKind,
    pub enabled: bool,
    pub is_default: bool,
    pub config: Json<BTreeMap<String, String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageRow {
    pub fn into_storage_config(self) -> StorageConfig {
        StorageConfig {
            id: self.id,
            name: self.name,
            kind: self.kind,
            enabled: self.enabled,
            is_default: self.is_default,
            config: self.config.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgStorageRepository {
    pool: PgPool,
}

impl PgStorageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageRepository for PgStorageRepository {
    #[tracing::instrument(skip(self), fields(db.table = "storages", db.record_id = %id))]
    async fn find(&self, id: Uuid) -> Result<Option<StorageConfig>, AppError> {
        let row: Option<StorageRow> = sqlx::query_as::<Postgres, StorageRow>(&format!(
            "SELECT {} FROM storages WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StorageRow::into_storage_config))
    }

    #[tracing::instrument(skip(self), fields(db.table = "storages"))]
    async fn find_default(&self) -> Result<Option<StorageConfig>, AppError> {
        let row: Option<StorageRow> = sqlx::query_as::<Postgres, StorageRow>(&format!(
            "SELECT {} FROM storages WHERE is_default AND enabled LIMIT 1",
            COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StorageRow::into_storage_config))
    }

    #[tracing::instrument(skip(self), fields(db.table = "storages"))]
    async fn list(&self) -> Result<Vec<StorageConfig>, AppError> {
        let rows: Vec<StorageRow> = sqlx::query_as::<Postgres, StorageRow>(&format!(
            "SELECT {} FROM storages ORDER BY created_at ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StorageRow::into_storage_config).collect())
    }

    #[tracing::instrument(skip(self, storage), fields(db.table = "storages", db.record_id = %storage.id))]
    async fn save(&self, storage: &StorageConfig) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        if storage.is_default {
            sqlx::query(
                "UPDATE storages SET is_default = FALSE, updated_at = NOW() WHERE is_default AND id <> $1",
            )
            .bind(storage.id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO storages (id, name, kind, enabled, is_default, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                enabled = EXCLUDED.enabled,
                is_default = EXCLUDED.is_default,
                config = EXCLUDED.config,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(storage.id)
        .bind(&storage.name)
        .bind(storage.kind)
        .bind(storage.enabled)
        .bind(storage.is_default)
        .bind(Json(&storage.config))
        .bind(storage.created_at)
        .bind(storage.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "storages", db.record_id = %id))]
    async fn set_default(&self, id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE storages SET is_default = FALSE, updated_at = NOW() WHERE is_default AND id <> $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE storages SET is_default = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Storage {} not found", id)));
        }

        tx.commit().await?;
        Ok(())
    }
}
