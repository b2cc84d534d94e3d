//! Job handler context
//!
//! The worker pool holds a weak reference to a [`JobHandlerContext`] and calls
//! `dispatch_job` for each claimed job. When a job fails for good (an
//! unrecoverable error, or the last attempt) the pool calls `escalate` once.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use stowage_core::{FailureNotifier, Job, JobPublisher, StorageRepository, VideoFileRepository};
use stowage_storage::StorageManager;

use crate::handlers;
use crate::reports::MigrationReports;

/// Context for job dispatch.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    /// Run the handler for `job`. A `TaskError` in the chain decides whether the
    /// job is worth another attempt; any other error is treated as transient.
    async fn dispatch_job(self: Arc<Self>, job: &Job) -> Result<()>;

    /// Final failure of `job` after `error`.
    async fn escalate(self: Arc<Self>, job: &Job, error: &anyhow::Error);
}

/// Collaborators shared by the upload, migrate and delete handlers.
pub struct StorageJobContext {
    pub manager: Arc<StorageManager>,
    pub storages: Arc<dyn StorageRepository>,
    pub files: Arc<dyn VideoFileRepository>,
    pub notifier: Arc<dyn FailureNotifier>,
    pub publisher: Arc<dyn JobPublisher>,
    pub reports: MigrationReports,
    /// Project directory; relative upload paths resolve under `{media_root}/public/media/`.
    pub media_root: PathBuf,
}

#[async_trait]
impl JobHandlerContext for StorageJobContext {
    async fn dispatch_job(self: Arc<Self>, job: &Job) -> Result<()> {
        match job {
            Job::UploadToStorage(message) => handlers::upload::handle(&self, message).await?,
            Job::MigrateFile(message) => handlers::migrate::handle(&self, message).await?,
            Job::DeleteFromStorage(message) => handlers::delete::handle(&self, message).await?,
        }
        Ok(())
    }

    async fn escalate(self: Arc<Self>, job: &Job, error: &anyhow::Error) {
        match job {
            Job::UploadToStorage(message) => handlers::upload::escalate(&self, message, error).await,
            Job::MigrateFile(message) => handlers::migrate::escalate(&self, message, error).await,
            Job::DeleteFromStorage(message) => handlers::delete::escalate(&self, message, error).await,
        }
    }
}
