use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_core::{StorageConfig, StorageKind, StowageConfig};

use crate::config::{self, S3Backend};
use crate::error::{ConfigValidationError, StorageError, StorageResult};
use crate::retry::RetryPolicy;
use crate::signing::UrlSigner;
use crate::traits::StorageAdapter;

#[cfg(feature = "storage-s3")]
use crate::bunny::BunnyStorageAdapter;
#[cfg(feature = "storage-ftp")]
use crate::ftp::FtpStorageAdapter;
#[cfg(feature = "storage-http")]
use crate::http::HttpStorageAdapter;
#[cfg(feature = "storage-local")]
use crate::local::LocalStorageAdapter;
#[cfg(feature = "storage-s3")]
use crate::s3::S3StorageAdapter;
#[cfg(feature = "storage-sftp")]
use crate::sftp::SftpStorageAdapter;

/// Builds adapters from stored configurations.
///
/// Configuration is fully validated here; a missing or malformed key is a
/// [`ConfigValidationError`] before any connection is attempted.
#[derive(Clone, Debug)]
pub struct AdapterFactory {
    signer: UrlSigner,
    project_dir: PathBuf,
    retry: RetryPolicy,
}

impl AdapterFactory {
    pub fn new(signer: UrlSigner, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            signer,
            project_dir: project_dir.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &StowageConfig) -> StorageResult<Self> {
        let signer = UrlSigner::new(&config.signing_secret)?;
        Ok(Self::new(signer, config.media_root.clone()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Check a configuration without building an adapter.
    pub fn validate(&self, storage: &StorageConfig) -> Result<(), ConfigValidationError> {
        config::validate(storage, &self.project_dir)
    }

    /// Create the adapter for `storage`.
    pub fn create(&self, storage: &StorageConfig) -> StorageResult<Arc<dyn StorageAdapter>> {
        let adapter: Arc<dyn StorageAdapter> = match storage.kind {
            #[cfg(feature = "storage-local")]
            StorageKind::Local => {
                let config = config::LocalConfig::parse(storage, &self.project_dir)?;
                Arc::new(LocalStorageAdapter::new(config, self.signer.clone(), self.retry))
            }

            #[cfg(not(feature = "storage-local"))]
            StorageKind::Local => return Err(unavailable(storage.kind, "storage-local")),

            #[cfg(feature = "storage-ftp")]
            StorageKind::Ftp => {
                let config = config::FtpConfig::parse(storage)?;
                Arc::new(FtpStorageAdapter::new(config, self.signer.clone(), self.retry))
            }

            #[cfg(not(feature = "storage-ftp"))]
            StorageKind::Ftp => return Err(unavailable(storage.kind, "storage-ftp")),

            #[cfg(feature = "storage-sftp")]
            StorageKind::Sftp => {
                let config = config::SftpConfig::parse(storage)?;
                Arc::new(SftpStorageAdapter::new(config, self.signer.clone(), self.retry))
            }

            #[cfg(not(feature = "storage-sftp"))]
            StorageKind::Sftp => return Err(unavailable(storage.kind, "storage-sftp")),

            #[cfg(feature = "storage-s3")]
            StorageKind::S3 => match S3Backend::parse(storage)? {
                S3Backend::Generic(config) => Arc::new(S3StorageAdapter::new(
                    config,
                    self.signer.clone(),
                    self.retry,
                )?),
                S3Backend::BunnyCdn(config) => Arc::new(BunnyStorageAdapter::new(
                    config,
                    self.signer.clone(),
                    self.retry,
                )?),
            },

            #[cfg(not(feature = "storage-s3"))]
            StorageKind::S3 => {
                S3Backend::parse(storage)?;
                return Err(unavailable(storage.kind, "storage-s3"));
            }

            #[cfg(feature = "storage-http")]
            StorageKind::Http => {
                let config = config::HttpConfig::parse(storage)?;
                Arc::new(HttpStorageAdapter::new(config, self.signer.clone(), self.retry)?)
            }

            #[cfg(not(feature = "storage-http"))]
            StorageKind::Http => return Err(unavailable(storage.kind, "storage-http")),
        };

        tracing::debug!(
            storage_id = %storage.id,
            storage_name = %storage.name,
            storage_kind = %storage.kind,
            "Storage adapter created"
        );
        Ok(adapter)
    }
}

#[allow(dead_code)]
fn unavailable(kind: StorageKind, feature: &str) -> StorageError {
    StorageError::Backend(format!(
        "{} storage backend not available ({} feature not enabled)",
        kind.label(),
        feature
    ))
}
