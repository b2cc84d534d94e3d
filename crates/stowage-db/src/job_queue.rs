//! Durable job queue on the `storage_jobs` table.
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED` so several worker processes
//! can share the table. A claim that is never acknowledged becomes visible
//! again after [`CLAIM_TIMEOUT`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use stowage_core::{AppError, ClaimedJob, Job, JobPublisher, JobSource};
use uuid::Uuid;

/// How long a claimed job stays invisible before another worker may take it.
pub const CLAIM_TIMEOUT: Duration = Duration::from_secs(3600);

/// Row type for the storage_jobs table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub payload: Json<Job>,
    pub available_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, job: &Job, delay: Duration) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO storage_jobs (id, job_type, payload, attempt, available_at)
            VALUES ($1, $2, $3, $4, NOW() + make_interval(secs => $5))
            "#,
        )
        .bind(id)
        .bind(job.to_string())
        .bind(Json(job))
        .bind(i32::try_from(job.attempt()).unwrap_or(i32::MAX))
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Number of jobs not yet acknowledged.
    #[tracing::instrument(skip(self), fields(db.table = "storage_jobs"))]
    pub async fn pending_count(&self) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM storage_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

#[async_trait]
impl JobPublisher for PgJobQueue {
    #[tracing::instrument(skip(self, job), fields(db.table = "storage_jobs", job_type = %job, attempt = job.attempt()))]
    async fn publish(&self, job: Job) -> Result<(), AppError> {
        let id = self.insert(&job, Duration::ZERO).await?;
        tracing::debug!(job_id = %id, "Job published");
        Ok(())
    }

    #[tracing::instrument(skip(self, job), fields(db.table = "storage_jobs", job_type = %job, attempt = job.attempt()))]
    async fn publish_delayed(&self, job: Job, delay: Duration) -> Result<(), AppError> {
        let id = self.insert(&job, delay).await?;
        tracing::debug!(job_id = %id, delay_secs = delay.as_secs(), "Delayed job published");
        Ok(())
    }
}

#[async_trait]
impl JobSource for PgJobQueue {
    /// Atomically claim the next visible job.
    #[tracing::instrument(skip(self), fields(db.table = "storage_jobs"))]
    async fn claim_next(&self) -> Result<Option<ClaimedJob>, AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<JobRow> = sqlx::query_as::<Postgres, JobRow>(
            r#"
            SELECT id, payload, available_at
            FROM storage_jobs
            WHERE available_at <= NOW()
                AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $1))
            ORDER BY available_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(CLAIM_TIMEOUT.as_secs_f64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE storage_jobs SET claimed_at = NOW() WHERE id = $1")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(ClaimedJob {
            id: row.id,
            job: row.payload.0,
        }))
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_jobs", db.record_id = %id))]
    async fn acknowledge(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM storage_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
