use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use stowage_core::StorageKind;
use sysinfo::Disks;
use tokio::fs;

use crate::config::LocalConfig;
use crate::error::{StorageError, StorageResult};
use crate::result::{ConnectionTestResult, StorageQuota, UploadResult};
use crate::retry::RetryPolicy;
use crate::signing::UrlSigner;
use crate::traits::{elapsed_ms, join_url, StorageAdapter};

/// Local filesystem storage
#[derive(Clone)]
pub struct LocalStorageAdapter {
    base_path: PathBuf,
    public_url: Option<String>,
    signer: UrlSigner,
    retry: RetryPolicy,
}

impl LocalStorageAdapter {
    pub fn new(config: LocalConfig, signer: UrlSigner, retry: RetryPolicy) -> Self {
        Self {
            base_path: config.base_path,
            public_url: config.public_url,
            signer,
            retry,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a remote path onto the base directory, refusing anything that escapes it.
    fn full_path(&self, remote_path: &str) -> StorageResult<PathBuf> {
        let relative = remote_path.trim_start_matches('/');
        if relative.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(StorageError::InvalidPath(format!(
                "Path escapes storage directory: {}",
                remote_path
            )));
        }
        Ok(self.base_path.join(relative))
    }

    async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn copy_in(&self, local_path: &Path, remote_path: &str) -> StorageResult<u64> {
        let target = self.full_path(remote_path)?;
        Self::ensure_parent_dir(&target).await.map_err(|e| {
            StorageError::Transfer(format!(
                "Failed to create directory for {}: {}",
                target.display(),
                e
            ))
        })?;
        fs::copy(local_path, &target).await.map_err(|e| {
            StorageError::Transfer(format!("Failed to copy file to {}: {}", target.display(), e))
        })
    }

    async fn copy_out(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let source = self.full_path(remote_path)?;
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(StorageError::NotFound(remote_path.to_string()));
        }
        Self::ensure_parent_dir(local_path).await?;
        fs::copy(&source, local_path).await?;
        Ok(())
    }

    async fn remove(&self, remote_path: &str) -> StorageResult<()> {
        let path = self.full_path(remote_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Disk holding the base path: the mount point with the longest matching prefix.
    fn disk_usage(&self) -> Option<StorageQuota> {
        let base = self.base_path.canonicalize().ok()?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| base.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| {
                let total = disk.total_space();
                let used = total.saturating_sub(disk.available_space());
                StorageQuota::new(used, Some(total))
            })
    }
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> UploadResult {
        if !fs::try_exists(local_path).await.unwrap_or(false) {
            return UploadResult::failure(format!(
                "Local file not found: {}",
                local_path.display()
            ));
        }

        let start = Instant::now();
        match self
            .retry
            .execute("upload", || self.copy_in(local_path, remote_path))
            .await
        {
            Ok(size) => {
                tracing::info!(
                    base_path = %self.base_path.display(),
                    remote_path = %remote_path,
                    size_bytes = size,
                    duration_ms = elapsed_ms(start),
                    "Local storage upload successful"
                );
                UploadResult::success(remote_path, self.get_url(remote_path), Some(size))
            }
            Err(e) => {
                tracing::error!(
                    remote_path = %remote_path,
                    error = %e,
                    "Local storage upload failed"
                );
                UploadResult::failure(e.to_string())
            }
        }
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> bool {
        match self
            .retry
            .execute("download", || self.copy_out(remote_path, local_path))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(remote_path = %remote_path, error = %e, "Local storage download failed");
                false
            }
        }
    }

    async fn delete(&self, remote_path: &str) -> bool {
        match self.retry.execute("delete", || self.remove(remote_path)).await {
            Ok(()) => {
                tracing::info!(remote_path = %remote_path, "Local storage delete successful");
                true
            }
            Err(e) => {
                tracing::warn!(remote_path = %remote_path, error = %e, "Local storage delete failed");
                false
            }
        }
    }

    async fn exists(&self, remote_path: &str) -> bool {
        match self.full_path(remote_path) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    fn get_url(&self, remote_path: &str) -> String {
        match self.public_url.as_deref() {
            Some(public_url) => join_url(public_url, remote_path),
            None => format!("/{}", remote_path.trim_start_matches('/')),
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let start = Instant::now();
        let metadata = match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => metadata,
            _ => {
                return ConnectionTestResult::failure(format!(
                    "Base path does not exist: {}",
                    self.base_path.display()
                ))
            }
        };
        if metadata.permissions().readonly() {
            return ConnectionTestResult::failure(format!(
                "Base path is not writable: {}",
                self.base_path.display()
            ));
        }

        // Writability is only proven by writing.
        let probe = self.base_path.join(format!(".stowage-probe-{}", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&probe, b"ok").await {
            return ConnectionTestResult::failure(format!(
                "Base path is not writable: {} ({})",
                self.base_path.display(),
                e
            ));
        }
        let _ = fs::remove_file(&probe).await;

        ConnectionTestResult::success(
            "Local storage accessible",
            elapsed_ms(start),
            Some("Local filesystem".to_string()),
        )
    }

    async fn get_quota(&self) -> Option<StorageQuota> {
        let adapter = self.clone();
        tokio::task::spawn_blocking(move || adapter.disk_usage())
            .await
            .ok()
            .flatten()
    }

    async fn create_directory(&self, path: &str) -> bool {
        match self.full_path(path) {
            Ok(full) => fs::create_dir_all(&full).await.is_ok(),
            Err(_) => false,
        }
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn adapter(base: &Path, public_url: Option<&str>) -> LocalStorageAdapter {
        LocalStorageAdapter::new(
            LocalConfig {
                base_path: base.to_path_buf(),
                public_url: public_url.map(str::to_string),
            },
            UrlSigner::new("secret").unwrap(),
            RetryPolicy::immediate(),
        )
    }

    #[tokio::test]
    async fn upload_creates_directories_and_returns_url() {
        let store = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("a.mp4");
        fs::write(&source, b"video bytes").await.unwrap();

        let storage = adapter(store.path(), None);
        let result = storage.upload(&source, "videos/1/720p/a.mp4").await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.url.as_deref(), Some("/videos/1/720p/a.mp4"));
        assert_eq!(result.file_size, Some(11));
        let stored = fs::read(store.path().join("videos/1/720p/a.mp4")).await.unwrap();
        assert_eq!(stored, b"video bytes");
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails_without_retry() {
        let store = TempDir::new().unwrap();
        let storage = adapter(store.path(), None);

        let result = storage
            .upload(Path::new("/definitely/not/here.mp4"), "videos/a.mp4")
            .await;

        assert!(!result.success);
        assert!(result.error().contains("Local file not found"));
    }

    #[tokio::test]
    async fn delete_of_absent_file_is_success() {
        let store = TempDir::new().unwrap();
        let storage = adapter(store.path(), None);
        assert!(storage.delete("videos/never-existed.mp4").await);
    }

    #[tokio::test]
    async fn download_round_trip_and_missing_file() {
        let store = TempDir::new().unwrap();
        fs::create_dir_all(store.path().join("videos")).await.unwrap();
        fs::write(store.path().join("videos/a.mp4"), b"abc").await.unwrap();
        let storage = adapter(store.path(), None);

        let out = TempDir::new().unwrap();
        let target = out.path().join("nested/copy.mp4");
        assert!(storage.download("videos/a.mp4", &target).await);
        assert_eq!(fs::read(&target).await.unwrap(), b"abc");

        assert!(!storage.download("videos/missing.mp4", &target).await);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let store = TempDir::new().unwrap();
        let storage = adapter(store.path(), None);
        assert!(!storage.exists("../etc/passwd").await);
        assert!(!storage.create_directory("a/../../b").await);
    }

    #[tokio::test]
    async fn public_url_prefix_and_signed_url() {
        let store = TempDir::new().unwrap();
        let storage = adapter(store.path(), Some("https://media.example.com/"));
        assert_eq!(
            storage.get_url("/videos/a.mp4"),
            "https://media.example.com/videos/a.mp4"
        );

        let signed = storage.get_signed_url("videos/a.mp4", Duration::from_secs(60));
        assert!(signed.starts_with("https://media.example.com/videos/a.mp4?expires="));
        assert!(signed.contains("&signature="));
    }

    #[tokio::test]
    async fn connection_test_and_directory_creation() {
        let store = TempDir::new().unwrap();
        let storage = adapter(store.path(), None);
        assert!(storage.test_connection().await.success);
        assert!(storage.create_directory("videos/1/720p").await);
        assert!(storage.create_directory("videos/1/720p").await);

        let missing = adapter(&store.path().join("nope"), None);
        assert!(!missing.test_connection().await.success);
    }
}
