//! Storage adapter trait
//!
//! Every backend implements [`StorageAdapter`]. Methods never return a backend
//! error to the caller: failures come back as a failed [`UploadResult`], `false`,
//! or `None`, and are logged where they happen.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use stowage_core::StorageKind;

use crate::error::{StorageError, StorageResult};
use crate::result::{ConnectionTestResult, StorageQuota, UploadResult};
use crate::signing::UrlSigner;

/// Default lifetime of a signed URL.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Copy `local_path` to `remote_path`, creating missing remote directories.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> UploadResult;

    /// Copy `remote_path` to `local_path`, creating missing local directories.
    async fn download(&self, remote_path: &str, local_path: &Path) -> bool;

    /// Deleting a file that is already gone succeeds.
    async fn delete(&self, remote_path: &str) -> bool;

    async fn exists(&self, remote_path: &str) -> bool;

    /// Stable, unsigned URL. FTP and SFTP return an application proxy path.
    fn get_url(&self, remote_path: &str) -> String;

    async fn test_connection(&self) -> ConnectionTestResult;

    /// `None` when the backend has no way to report usage.
    async fn get_quota(&self) -> Option<StorageQuota>;

    /// Idempotent.
    async fn create_directory(&self, path: &str) -> bool;

    fn kind(&self) -> StorageKind;

    fn signer(&self) -> &UrlSigner;

    /// `get_url` plus `expires` and `signature` query parameters.
    fn get_signed_url(&self, remote_path: &str, expires_in: Duration) -> String {
        self.signer()
            .sign_url_for(&self.get_url(remote_path), remote_path, expires_in)
    }
}

/// Proxy path served by the application for backends without public URLs.
pub(crate) fn proxy_url(remote_path: &str) -> String {
    format!("/storage/proxy/{}", remote_path.trim_start_matches('/'))
}

/// Join a base URL and a key with exactly one slash.
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

/// Join a server-side base directory and a remote path. `..` segments are refused.
pub(crate) fn join_remote_path(base_path: &str, remote_path: &str) -> StorageResult<String> {
    if remote_path.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidPath(remote_path.to_string()));
    }
    Ok(format!(
        "{}/{}",
        base_path.trim_end_matches('/'),
        remote_path.trim_start_matches('/')
    ))
}

/// Parent directory of a slash-separated remote path, if any.
pub(crate) fn remote_parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i]).filter(|parent| !parent.is_empty())
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
