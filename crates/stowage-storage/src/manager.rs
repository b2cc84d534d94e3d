//! Storage manager
//!
//! Owns the mapping from a video file to its current [`FileLocation`]. Adapters
//! are built on first use, probed with `test_connection`, and cached per
//! storage id until [`StorageManager::clear_adapter_cache`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{
    AppError, FileLocation, StorageConfig, StorageRepository, StowageConfig, VideoFile,
    VideoFileRepository,
};
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::factory::AdapterFactory;
use crate::paths::{generate_local_path, generate_remote_path, validate_remote_path};
use crate::result::UploadResult;
use crate::traits::StorageAdapter;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Directory that relative local paths are resolved against.
    pub media_root: PathBuf,
    pub space_cache_ttl: Duration,
    pub warning_threshold_percent: f64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("."),
            space_cache_ttl: Duration::from_secs(300),
            warning_threshold_percent: 80.0,
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &StowageConfig) -> Self {
        Self {
            media_root: config.media_root.clone(),
            space_cache_ttl: config.space_cache_ttl(),
            warning_threshold_percent: config.warning_threshold_percent,
        }
    }
}

/// Result of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// New authoritative location, already persisted.
    pub location: FileLocation,
    pub file_size: Option<u64>,
    /// The copy that is now stale. `None` when the file did not move.
    pub previous: Option<FileLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_bytes: Option<u64>,
    pub used_bytes: u64,
    pub available_bytes: Option<u64>,
    pub usage_percent: Option<f64>,
    pub healthy: bool,
    /// Usage is at or above the warning threshold.
    pub warning: bool,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
}

impl StorageStats {
    fn unavailable(healthy: bool, error: impl Into<String>) -> Self {
        Self {
            total_bytes: None,
            used_bytes: 0,
            available_bytes: None,
            usage_percent: None,
            healthy,
            warning: false,
            last_checked: Utc::now(),
            error: Some(error.into()),
        }
    }
}

struct CachedSpace {
    available: Option<u64>,
    checked_at: Instant,
}

pub struct StorageManager {
    storages: Arc<dyn StorageRepository>,
    files: Arc<dyn VideoFileRepository>,
    factory: AdapterFactory,
    options: ManagerOptions,
    adapters: RwLock<HashMap<Uuid, Arc<dyn StorageAdapter>>>,
    space: RwLock<HashMap<Uuid, CachedSpace>>,
}

impl StorageManager {
    pub fn new(
        storages: Arc<dyn StorageRepository>,
        files: Arc<dyn VideoFileRepository>,
        factory: AdapterFactory,
        options: ManagerOptions,
    ) -> Self {
        Self {
            storages,
            files,
            factory,
            options,
            adapters: RwLock::new(HashMap::new()),
            space: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn storages(&self) -> &Arc<dyn StorageRepository> {
        &self.storages
    }

    /// Absolute local paths are kept, relative ones are resolved against the media root.
    pub fn resolve_local_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.options.media_root.join(path)
        }
    }

    /// Adapter for an enabled storage, built and probed on first use.
    pub async fn adapter(&self, storage: &StorageConfig) -> StorageResult<Arc<dyn StorageAdapter>> {
        if !storage.enabled {
            return Err(StorageError::Disabled(storage.name.clone()));
        }
        if let Some(adapter) = self.adapters.read().await.get(&storage.id) {
            return Ok(adapter.clone());
        }

        let adapter = self.factory.create(storage).map_err(|e| {
            tracing::error!(
                storage_id = %storage.id,
                storage_kind = %storage.kind,
                error = %e,
                "Failed to create storage adapter"
            );
            e
        })?;

        let probe = adapter.test_connection().await;
        if !probe.success {
            let reason = probe.error_message.unwrap_or_else(|| "Unknown error".to_string());
            tracing::error!(
                storage_id = %storage.id,
                storage_name = %storage.name,
                error = %reason,
                "Storage connection test failed"
            );
            return Err(StorageError::Connection(format!(
                "Cannot connect to storage '{}': {}",
                storage.name, reason
            )));
        }

        self.adapters
            .write()
            .await
            .insert(storage.id, adapter.clone());
        Ok(adapter)
    }

    /// Use `adapter` for `storage_id` without building or probing one.
    pub async fn register_adapter(&self, storage_id: Uuid, adapter: Arc<dyn StorageAdapter>) {
        self.adapters.write().await.insert(storage_id, adapter);
    }

    pub async fn clear_adapter_cache(&self) {
        self.adapters.write().await.clear();
        self.space.write().await.clear();
    }

    pub async fn storage(&self, id: Uuid) -> StorageResult<StorageConfig> {
        self.storages
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Storage {}", id)).into())
    }

    pub async fn default_storage(&self) -> StorageResult<Option<StorageConfig>> {
        Ok(self.storages.find_default().await?)
    }

    /// Make `id` the only default storage.
    pub async fn set_default_storage(&self, id: Uuid) -> StorageResult<()> {
        let storage = self.storage(id).await?;
        if !storage.enabled {
            return Err(StorageError::Disabled(storage.name));
        }
        self.storages.set_default(id).await?;
        tracing::info!(storage_id = %id, storage_name = %storage.name, "Default storage changed");
        Ok(())
    }

    /// Unknown quota, or a failure to read it, counts as enough space.
    pub async fn check_available_space(&self, storage: &StorageConfig, required: u64) -> bool {
        if let Some(cached) = self.space.read().await.get(&storage.id) {
            if cached.checked_at.elapsed() < self.options.space_cache_ttl {
                return cached.available.map_or(true, |available| available >= required);
            }
        }

        let adapter = match self.adapter(storage).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!(storage_id = %storage.id, error = %e, "Failed to check available space");
                return true;
            }
        };
        let Some(quota) = adapter.get_quota().await else {
            return true;
        };

        let available = quota.available_bytes();
        self.space.write().await.insert(
            storage.id,
            CachedSpace {
                available,
                checked_at: Instant::now(),
            },
        );
        available.map_or(true, |available| available >= required)
    }

    /// Upload to `storage`, or to the default storage when `None`.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        storage: Option<&StorageConfig>,
    ) -> UploadResult {
        let metadata = match tokio::fs::metadata(local_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                return UploadResult::failure(format!(
                    "Local file does not exist: {}",
                    local_path.display()
                ))
            }
        };
        if let Err(e) = validate_remote_path(remote_path) {
            return UploadResult::failure(e.to_string());
        }
        let file_size = metadata.len();

        let default;
        let storage = match storage {
            Some(storage) => storage,
            None => match self.default_storage().await {
                Ok(Some(found)) => {
                    default = found;
                    &default
                }
                Ok(None) => {
                    tracing::error!("No default storage configured for upload");
                    return UploadResult::failure("No default storage configured");
                }
                Err(e) => return UploadResult::failure(e.to_string()),
            },
        };

        if !storage.enabled {
            tracing::warn!(
                storage_id = %storage.id,
                storage_name = %storage.name,
                "Attempted upload to disabled storage"
            );
            return UploadResult::failure(format!(
                "Storage \"{}\" is disabled and cannot accept uploads",
                storage.name
            ));
        }

        if !self.check_available_space(storage, file_size).await {
            tracing::warn!(
                storage_id = %storage.id,
                required_bytes = file_size,
                "Insufficient space on storage"
            );
            return UploadResult::failure(
                StorageError::InsufficientSpace {
                    storage: storage.name.clone(),
                    required: file_size,
                }
                .to_string(),
            );
        }

        let adapter = match self.adapter(storage).await {
            Ok(adapter) => adapter,
            Err(e) => return UploadResult::failure(e.to_string()),
        };

        if let Some((directory, _)) = remote_path.rsplit_once('/') {
            if !adapter.create_directory(directory).await {
                return UploadResult::failure(format!("Failed to create directory: {}", directory));
            }
        }

        let result = adapter.upload(local_path, remote_path).await;
        if result.success {
            self.space.write().await.remove(&storage.id);
            tracing::info!(
                storage_id = %storage.id,
                local_path = %local_path.display(),
                remote_path = %remote_path,
                file_size,
                "File uploaded successfully"
            );
        } else {
            tracing::error!(
                storage_id = %storage.id,
                local_path = %local_path.display(),
                remote_path = %remote_path,
                error = %result.error(),
                "File upload failed"
            );
        }
        result
    }

    pub async fn delete_file(&self, remote_path: &str, storage: &StorageConfig) -> bool {
        let adapter = match self.adapter(storage).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!(storage_id = %storage.id, remote_path = %remote_path, error = %e, "File deletion failed");
                return false;
            }
        };
        let deleted = adapter.delete(remote_path).await;
        if deleted {
            tracing::info!(storage_id = %storage.id, remote_path = %remote_path, "File deleted successfully");
        } else {
            tracing::warn!(storage_id = %storage.id, remote_path = %remote_path, "File deletion returned false");
        }
        deleted
    }

    pub async fn download_file(&self, remote_path: &str, local_path: &Path, storage: &StorageConfig) -> bool {
        match self.adapter(storage).await {
            Ok(adapter) => {
                let downloaded = adapter.download(remote_path, local_path).await;
                if downloaded {
                    tracing::info!(
                        storage_id = %storage.id,
                        remote_path = %remote_path,
                        local_path = %local_path.display(),
                        "File downloaded successfully"
                    );
                }
                downloaded
            }
            Err(e) => {
                tracing::error!(storage_id = %storage.id, remote_path = %remote_path, error = %e, "File download failed");
                false
            }
        }
    }

    pub async fn file_exists(&self, remote_path: &str, storage: &StorageConfig) -> bool {
        match self.adapter(storage).await {
            Ok(adapter) => adapter.exists(remote_path).await,
            Err(e) => {
                tracing::error!(storage_id = %storage.id, remote_path = %remote_path, error = %e, "Failed to check file existence");
                false
            }
        }
    }

    /// Adapter for a remote file's storage, or `None` when the file is local.
    async fn remote_adapter(&self, file: &VideoFile) -> Option<(Arc<dyn StorageAdapter>, String)> {
        let (Some(storage_id), Some(remote_path)) =
            (file.location.storage_id, file.location.remote_path.clone())
        else {
            return None;
        };
        let adapter = async {
            let storage = self.storage(storage_id).await?;
            self.adapter(&storage).await
        }
        .await;
        match adapter {
            Ok(adapter) => Some((adapter, remote_path)),
            Err(e) => {
                tracing::error!(
                    video_file_id = %file.id,
                    storage_id = %storage_id,
                    error = %e,
                    "Failed to resolve file URL"
                );
                None
            }
        }
    }

    /// Public URL of a file. Local files, and files whose storage cannot be reached,
    /// fall back to the local path.
    pub async fn file_url(&self, file: &VideoFile) -> String {
        match self.remote_adapter(file).await {
            Some((adapter, remote_path)) => adapter.get_url(&remote_path),
            None => file.location.local_path.clone().unwrap_or_default(),
        }
    }

    pub async fn signed_file_url(&self, file: &VideoFile, expires_in: Duration) -> String {
        match self.remote_adapter(file).await {
            Some((adapter, remote_path)) => adapter.get_signed_url(&remote_path, expires_in),
            None => file.location.local_path.clone().unwrap_or_default(),
        }
    }

    /// Whether an uploaded file is visible on the storage.
    pub async fn verify_file_integrity(
        &self,
        local_path: &Path,
        remote_path: &str,
        storage: &StorageConfig,
    ) -> bool {
        if tokio::fs::metadata(local_path).await.is_err() {
            return false;
        }
        if !self.file_exists(remote_path, storage).await {
            tracing::warn!(
                storage_id = %storage.id,
                remote_path = %remote_path,
                "Remote file does not exist after upload"
            );
            return false;
        }
        true
    }

    /// Delete several files. Each path gets its own outcome.
    pub async fn delete_multiple_files(
        &self,
        remote_paths: &[String],
        storage: &StorageConfig,
    ) -> BTreeMap<String, DeleteOutcome> {
        let adapter = match self.adapter(storage).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!(storage_id = %storage.id, error = %e, "Batch file deletion failed");
                return remote_paths
                    .iter()
                    .map(|path| {
                        (
                            path.clone(),
                            DeleteOutcome {
                                success: false,
                                error: Some(e.to_string()),
                            },
                        )
                    })
                    .collect();
            }
        };

        let mut results = BTreeMap::new();
        for path in remote_paths {
            let outcome = match validate_remote_path(path) {
                Err(e) => DeleteOutcome {
                    success: false,
                    error: Some(e.to_string()),
                },
                Ok(()) if adapter.delete(path).await => DeleteOutcome {
                    success: true,
                    error: None,
                },
                Ok(()) => DeleteOutcome {
                    success: false,
                    error: Some("Delete operation returned false".to_string()),
                },
            };
            if outcome.success {
                tracing::info!(storage_id = %storage.id, remote_path = %path, "File deleted in batch operation");
            } else {
                tracing::error!(storage_id = %storage.id, remote_path = %path, error = ?outcome.error, "File deletion failed in batch operation");
            }
            results.insert(path.clone(), outcome);
        }
        results
    }

    pub async fn storage_stats(&self, storage: &StorageConfig) -> StorageStats {
        let adapter = match self.adapter(storage).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!(storage_id = %storage.id, error = %e, "Failed to get storage stats");
                return StorageStats::unavailable(false, e.to_string());
            }
        };
        let Some(quota) = adapter.get_quota().await else {
            return StorageStats::unavailable(true, "Quota information not available");
        };

        let usage_percent = quota.usage_percent();
        let warning = usage_percent.map_or(false, |percent| {
            percent >= self.options.warning_threshold_percent
        });
        if warning {
            tracing::warn!(
                storage_id = %storage.id,
                usage_percent = usage_percent.unwrap_or_default(),
                "Storage usage above warning threshold"
            );
        }

        StorageStats {
            total_bytes: quota.total_bytes,
            used_bytes: quota.used_bytes,
            available_bytes: quota.available_bytes(),
            usage_percent,
            healthy: adapter.test_connection().await.success,
            warning,
            last_checked: Utc::now(),
            error: None,
        }
    }

    /// Copy `file` to `destination` (`None` means back to local disk), verify the
    /// copy, and persist the new location. The stale copy is left in place and
    /// returned in the outcome.
    pub async fn migrate_file(
        &self,
        file: &VideoFile,
        destination: Option<&StorageConfig>,
    ) -> StorageResult<MigrationOutcome> {
        let outcome = match destination {
            None => self.migrate_to_local(file).await?,
            Some(destination) => {
                if !destination.enabled {
                    return Err(StorageError::Disabled(destination.name.clone()));
                }
                if file.location.storage_id == Some(destination.id) {
                    tracing::info!(video_file_id = %file.id, "File is already on the destination storage");
                    return Ok(MigrationOutcome {
                        location: file.location.clone(),
                        file_size: file.file_size,
                        previous: None,
                    });
                }
                if file.location.is_local() {
                    self.migrate_local_to_remote(file, destination).await?
                } else {
                    self.migrate_between_remotes(file, destination).await?
                }
            }
        };

        if outcome.previous.is_some() {
            self.files
                .update_location(file.id, &outcome.location, outcome.file_size)
                .await?;
        }
        Ok(outcome)
    }

    async fn migrate_to_local(&self, file: &VideoFile) -> StorageResult<MigrationOutcome> {
        let (Some(storage_id), Some(source_path)) =
            (file.location.storage_id, file.location.remote_path.as_deref())
        else {
            tracing::info!(video_file_id = %file.id, "File is already local, skipping migration");
            return Ok(MigrationOutcome {
                location: file.location.clone(),
                file_size: file.file_size,
                previous: None,
            });
        };

        let source = self.storage(storage_id).await?;
        let adapter = self.adapter(&source).await?;
        let relative = generate_local_path(file);
        let target = self.resolve_local_path(&relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if !adapter.download(source_path, &target).await {
            tracing::error!(
                video_file_id = %file.id,
                source_storage_id = %storage_id,
                source_path = %source_path,
                "Failed to download file for local migration"
            );
            if let Err(e) = tokio::fs::remove_file(&target).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(local_path = %target.display(), error = %e, "Failed to remove partial download");
                }
            }
            return Err(StorageError::Transfer(format!(
                "Failed to download {} from storage '{}'",
                source_path, source.name
            )));
        }
        let file_size = tokio::fs::metadata(&target).await?.len();

        tracing::info!(
            video_file_id = %file.id,
            source_storage_id = %storage_id,
            local_path = %relative,
            "File migrated from remote to local"
        );
        Ok(MigrationOutcome {
            location: FileLocation::local(relative),
            file_size: Some(file_size),
            previous: Some(file.location.clone()),
        })
    }

    async fn migrate_local_to_remote(
        &self,
        file: &VideoFile,
        destination: &StorageConfig,
    ) -> StorageResult<MigrationOutcome> {
        let local_path = file.location.local_path.as_deref().ok_or_else(|| {
            StorageError::InvalidPath(format!("Video file {} has no source path", file.id))
        })?;
        let source = self.resolve_local_path(local_path);
        let remote_path = generate_remote_path(file);
        let location = self.copy_to(&source, &remote_path, destination).await?;
        tracing::info!(
            video_file_id = %file.id,
            destination_storage_id = %destination.id,
            remote_path = ?location.0.remote_path,
            "File migrated from local to remote"
        );
        Ok(MigrationOutcome {
            location: location.0,
            file_size: location.1,
            previous: Some(file.location.clone()),
        })
    }

    async fn migrate_between_remotes(
        &self,
        file: &VideoFile,
        destination: &StorageConfig,
    ) -> StorageResult<MigrationOutcome> {
        let (Some(storage_id), Some(source_path)) =
            (file.location.storage_id, file.location.remote_path.as_deref())
        else {
            return Err(StorageError::InvalidPath(format!(
                "Video file {} has no remote path",
                file.id
            )));
        };
        let source = self.storage(storage_id).await?;
        let adapter = self.adapter(&source).await?;

        let workdir = tempfile::Builder::new().prefix("migration_").tempdir()?;
        let temp_file = workdir.path().join(
            Path::new(source_path)
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("payload")),
        );
        if !adapter.download(source_path, &temp_file).await {
            tracing::error!(
                video_file_id = %file.id,
                source_storage_id = %storage_id,
                source_path = %source_path,
                "Failed to download file for migration"
            );
            return Err(StorageError::Transfer(format!(
                "Failed to download {} from storage '{}'",
                source_path, source.name
            )));
        }

        let remote_path = generate_remote_path(file);
        let (location, file_size) = self.copy_to(&temp_file, &remote_path, destination).await?;
        let location = location.with_local_path(file.location.local_path.clone());
        tracing::info!(
            video_file_id = %file.id,
            source_storage_id = %storage_id,
            destination_storage_id = %destination.id,
            remote_path = %remote_path,
            "File migrated between storages"
        );
        Ok(MigrationOutcome {
            location,
            file_size,
            previous: Some(file.location.clone()),
        })
    }

    /// Upload and verify. Returns the new location and size.
    async fn copy_to(
        &self,
        source: &Path,
        remote_path: &str,
        destination: &StorageConfig,
    ) -> StorageResult<(FileLocation, Option<u64>)> {
        let result = self.upload_file(source, remote_path, Some(destination)).await;
        if !result.success {
            return Err(StorageError::Transfer(result.error().to_string()));
        }
        let stored_path = result.remote_path.unwrap_or_else(|| remote_path.to_string());
        if !self.verify_file_integrity(source, &stored_path, destination).await {
            return Err(StorageError::Transfer(format!(
                "File {} is missing on storage '{}' after upload",
                stored_path, destination.name
            )));
        }
        Ok((
            FileLocation::remote(destination.id, stored_path),
            result.file_size,
        ))
    }
}
