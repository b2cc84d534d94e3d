//! Stowage Core Library
//!
//! Domain models, error types, process configuration and the collaborator
//! traits (repositories, notifier, job queue) shared by every Stowage crate.

pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod repository;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use config::StowageConfig;
pub use error::AppError;
pub use models::{
    ClaimedJob, DeleteFromStorage, FileLocation, Job, MigrateFile, MigrationFailure,
    MigrationReport, MigrationStatus, StorageConfig, UploadToStorage, VideoFile,
};
pub use repository::{
    FailureNotifier, JobPublisher, JobSource, MigrationReportStore, StorageRepository,
    VideoFileRepository,
};
pub use storage_types::StorageKind;
pub use task_error::{TaskError, TaskResultExt};
