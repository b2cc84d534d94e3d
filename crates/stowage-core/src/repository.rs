//! Collaborator traits
//!
//! The storage manager, job handlers and worker only talk to persistence and
//! notification through these traits. `memory` has in-process implementations;
//! `stowage-db` has the Postgres ones.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ClaimedJob, FileLocation, Job, MigrationReport, StorageConfig, VideoFile};

/// Configured storage backends
#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<StorageConfig>, AppError>;

    /// The enabled storage marked as default, if any.
    async fn find_default(&self) -> Result<Option<StorageConfig>, AppError>;

    async fn list(&self) -> Result<Vec<StorageConfig>, AppError>;

    /// Insert or replace by id.
    async fn save(&self, storage: &StorageConfig) -> Result<(), AppError>;

    /// Mark `id` as the default and clear the flag everywhere else.
    async fn set_default(&self, id: Uuid) -> Result<(), AppError>;
}

/// Video renditions and their current location
#[async_trait]
pub trait VideoFileRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<VideoFile>, AppError>;

    async fn save(&self, file: &VideoFile) -> Result<(), AppError>;

    /// Files currently stored on `storage_id`, or local files when `None`.
    async fn list_by_storage(&self, storage_id: Option<Uuid>) -> Result<Vec<VideoFile>, AppError>;

    /// Replace the authoritative location (and size when known) of a file.
    async fn update_location(
        &self,
        id: Uuid,
        location: &FileLocation,
        file_size: Option<u64>,
    ) -> Result<(), AppError>;

    /// Flag the owning video as failed to upload.
    async fn mark_video_failed(&self, video_id: Uuid, reason: &str) -> Result<(), AppError>;
}

/// Tells the owner of a resource that processing gave up on it.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify_failed(&self, video_id: Uuid, reason: &str) -> Result<(), AppError>;
}

/// Durable migration reports keyed by migration id
#[async_trait]
pub trait MigrationReportStore: Send + Sync {
    async fn create(&self, report: &MigrationReport) -> Result<(), AppError>;

    async fn get(&self, id: &str) -> Result<Option<MigrationReport>, AppError>;

    /// Append a success. Returns the updated report, or `None` for an unknown id.
    async fn record_success(
        &self,
        id: &str,
        video_file_id: Uuid,
    ) -> Result<Option<MigrationReport>, AppError>;

    /// Append a failure. Returns the updated report, or `None` for an unknown id.
    async fn record_failure(
        &self,
        id: &str,
        video_file_id: Uuid,
        error: &str,
    ) -> Result<Option<MigrationReport>, AppError>;

    async fn list(&self) -> Result<Vec<MigrationReport>, AppError>;

    /// Returns whether a report was removed.
    async fn delete(&self, id: &str) -> Result<bool, AppError>;
}

/// Producer side of the job queue
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: Job) -> Result<(), AppError>;

    /// Make `job` visible to workers only after `delay`.
    async fn publish_delayed(&self, job: Job, delay: Duration) -> Result<(), AppError>;
}

/// Consumer side of the job queue
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Claim the next visible job, if any. A claimed job is invisible to other workers.
    async fn claim_next(&self) -> Result<Option<ClaimedJob>, AppError>;

    /// Remove a finished job (handled, retried or escalated).
    async fn acknowledge(&self, id: Uuid) -> Result<(), AppError>;
}
