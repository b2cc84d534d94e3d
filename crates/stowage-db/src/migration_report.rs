//! Migration report store: one row per bulk migration run.
//!
//! Outcomes are appended under a row lock so concurrent handlers never lose an
//! entry. The completion rule and per-file deduplication stay in
//! `MigrationReport` itself, so a redelivered job never counts a file twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use stowage_core::{
    AppError, MigrationFailure, MigrationReport, MigrationReportStore, MigrationStatus,
};
use uuid::Uuid;

const COLUMNS: &str = "id, total_files, source_name, destination_name, succeeded, failures, status, started_at, completed_at";

/// Row type for the migration_reports table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct MigrationReportRow {
    pub id: String,
    pub total_files: i32,
    pub source_name: String,
    pub destination_name: String,
    pub succeeded: Json<Vec<Uuid>>,
    pub failures: Json<Vec<MigrationFailure>>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationReportRow {
    pub fn into_report(self) -> Result<MigrationReport, AppError> {
        let status = self
            .status
            .parse::<MigrationStatus>()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(MigrationReport {
            id: self.id,
            total_files: u32::try_from(self.total_files).unwrap_or_default(),
            source_name: self.source_name,
            destination_name: self.destination_name,
            succeeded: self.succeeded.0,
            failures: self.failures.0,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Clone)]
pub struct PgMigrationReportStore {
    pool: PgPool,
}

impl PgMigrationReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock a report row, apply `update`, and write the outcome lists back.
    async fn update_locked<F>(&self, id: &str, update: F) -> Result<Option<MigrationReport>, AppError>
    where
        F: FnOnce(&mut MigrationReport) + Send,
    {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        let row: Option<MigrationReportRow> = sqlx::query_as::<Postgres, MigrationReportRow>(
            &format!("SELECT {} FROM migration_reports WHERE id = $1 FOR UPDATE", COLUMNS),
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut report = row.into_report()?;
        update(&mut report);

        sqlx::query(
            r#"
            UPDATE migration_reports
            SET succeeded = $2, failures = $3, status = $4, completed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(&report.succeeded))
        .bind(Json(&report.failures))
        .bind(report.status.to_string())
        .bind(report.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(report))
    }
}

#[async_trait]
impl MigrationReportStore for PgMigrationReportStore {
    #[tracing::instrument(skip(self, report), fields(db.table = "migration_reports", db.record_id = %report.id))]
    async fn create(&self, report: &MigrationReport) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO migration_reports
                (id, total_files, source_name, destination_name, succeeded, failures, status, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&report.id)
        .bind(i32::try_from(report.total_files).unwrap_or(i32::MAX))
        .bind(&report.source_name)
        .bind(&report.destination_name)
        .bind(Json(&report.succeeded))
        .bind(Json(&report.failures))
        .bind(report.status.to_string())
        .bind(report.started_at)
        .bind(report.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "migration_reports", db.record_id = %id))]
    async fn get(&self, id: &str) -> Result<Option<MigrationReport>, AppError> {
        let row: Option<MigrationReportRow> = sqlx::query_as::<Postgres, MigrationReportRow>(
            &format!("SELECT {} FROM migration_reports WHERE id = $1", COLUMNS),
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MigrationReportRow::into_report).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "migration_reports", db.record_id = %id))]
    async fn record_success(
        &self,
        id: &str,
        video_file_id: Uuid,
    ) -> Result<Option<MigrationReport>, AppError> {
        self.update_locked(id, |report| report.record_success(video_file_id))
            .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "migration_reports", db.record_id = %id))]
    async fn record_failure(
        &self,
        id: &str,
        video_file_id: Uuid,
        error: &str,
    ) -> Result<Option<MigrationReport>, AppError> {
        let error = error.to_string();
        self.update_locked(id, move |report| report.record_failure(video_file_id, error))
            .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "migration_reports"))]
    async fn list(&self) -> Result<Vec<MigrationReport>, AppError> {
        let rows: Vec<MigrationReportRow> = sqlx::query_as::<Postgres, MigrationReportRow>(
            &format!("SELECT {} FROM migration_reports ORDER BY started_at DESC", COLUMNS),
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MigrationReportRow::into_report).collect()
    }

    #[tracing::instrument(skip(self), fields(db.table = "migration_reports", db.record_id = %id))]
    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let deleted = sqlx::query("DELETE FROM migration_reports WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> MigrationReportRow {
        MigrationReportRow {
            id: "migration_1".to_string(),
            total_files: 2,
            source_name: "Local".to_string(),
            destination_name: "S3".to_string(),
            succeeded: Json(vec![Uuid::new_v4()]),
            failures: Json(Vec::new()),
            status: status.to_string(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn row_maps_to_report() {
        let report = row("in_progress").into_report().unwrap();
        assert_eq!(report.total_files, 2);
        assert_eq!(report.success_count(), 1);
        assert_eq!(report.status, MigrationStatus::InProgress);
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!(matches!(
            row("paused").into_report(),
            Err(AppError::Internal(_))
        ));
    }
}
