//! Stowage Postgres layer
//!
//! `sqlx` implementations of the collaborator traits from `stowage-core`
//! (storages, video file locations, migration reports) and the durable job
//! queue. Schema changes live in `migrations/` and are applied by [`migrate`].

pub mod job_queue;
pub mod migration_report;
pub mod storage;
pub mod video_file;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use stowage_core::AppError;

pub use job_queue::PgJobQueue;
pub use migration_report::PgMigrationReportStore;
pub use storage::PgStorageRepository;
pub use video_file::PgVideoFileRepository;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    tracing::info!("Database connection pool created");
    Ok(pool)
}

/// Apply pending migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
    tracing::info!("Database migrations applied");
    Ok(())
}
