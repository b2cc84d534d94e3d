//! Stowage Storage Library
//!
//! A uniform [`StorageAdapter`] over local disk, FTP, SFTP, S3-compatible
//! object storage (with a BunnyCDN variant) and generic HTTP file servers, plus
//! the [`StorageManager`] that decides where each video file lives.
//!
//! # Remote path format
//!
//! Remote paths are relative to a storage's base path and never start with `/`.
//! Generated paths follow one layout on every backend:
//!
//! - **Remote copies**: `videos/{video_id}/{profile}/video_{unique}.{ext}`
//! - **Local copies**: `public/media/videos/{profile}/{video_id}_{unique}.{ext}`
//!
//! Paths must not contain `..`, `~`, `//` or NUL. Validation and generation live
//! in the `paths` module so all backends stay consistent.
//!
//! # Failure model
//!
//! Adapters retry transient failures through [`RetryPolicy`] and never return a
//! backend error to the caller: failures come back as a failed [`UploadResult`],
//! `false`, or `None`.

#[cfg(feature = "storage-s3")]
pub mod bunny;
pub mod config;
pub mod error;
pub mod factory;
#[cfg(feature = "storage-ftp")]
pub mod ftp;
#[cfg(feature = "storage-http")]
pub mod http;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod manager;
pub mod paths;
pub mod result;
pub mod retry;
#[cfg(feature = "storage-s3")]
pub mod s3;
#[cfg(feature = "storage-sftp")]
pub mod sftp;
pub mod signing;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-s3")]
pub use bunny::BunnyStorageAdapter;
pub use error::{ConfigValidationError, StorageError, StorageResult};
pub use factory::AdapterFactory;
#[cfg(feature = "storage-ftp")]
pub use ftp::FtpStorageAdapter;
#[cfg(feature = "storage-http")]
pub use http::HttpStorageAdapter;
#[cfg(feature = "storage-local")]
pub use local::LocalStorageAdapter;
pub use manager::{DeleteOutcome, ManagerOptions, MigrationOutcome, StorageManager, StorageStats};
pub use paths::{generate_local_path, generate_remote_path, validate_remote_path};
pub use result::{ConnectionTestResult, StorageQuota, UploadResult};
pub use retry::RetryPolicy;
#[cfg(feature = "storage-s3")]
pub use s3::S3StorageAdapter;
#[cfg(feature = "storage-sftp")]
pub use sftp::SftpStorageAdapter;
pub use signing::UrlSigner;
pub use stowage_core::StorageKind;
pub use traits::{StorageAdapter, DEFAULT_SIGNED_URL_TTL};
