use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::Error as ObjectStoreError;
use object_store::{ClientOptions, ObjectStore, ObjectStoreExt, PutPayload, WriteMultipart};
use std::path::Path;
use std::time::Instant;
use stowage_core::StorageKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::S3Config;
use crate::error::{StorageError, StorageResult};
use crate::result::{ConnectionTestResult, StorageQuota, UploadResult};
use crate::retry::RetryPolicy;
use crate::signing::UrlSigner;
use crate::traits::{elapsed_ms, join_url, StorageAdapter};

/// Files above this size go through a multipart upload.
const SINGLE_PUT_LIMIT: u64 = 16 * 1024 * 1024;
const READ_CHUNK: usize = 8 * 1024 * 1024;

/// S3 and S3-compatible object storage
#[derive(Clone)]
pub struct S3StorageAdapter {
    store: AmazonS3,
    endpoint: String,
    bucket: String,
    cdn_url: Option<String>,
    signer: UrlSigner,
    retry: RetryPolicy,
}

impl S3StorageAdapter {
    pub fn new(config: S3Config, signer: UrlSigner, retry: RetryPolicy) -> StorageResult<Self> {
        let allow_http = config.endpoint.starts_with("http://");
        let store = AmazonS3Builder::new()
            .with_endpoint(config.endpoint.clone())
            .with_allow_http(allow_http)
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone())
            .with_access_key_id(config.access_key.clone())
            .with_secret_access_key(config.secret_key.clone())
            .with_virtual_hosted_style_request(!config.path_style)
            .with_client_options(ClientOptions::new().with_timeout(config.timeout))
            .build()
            .map_err(|e| StorageError::Backend(format!("Invalid S3 configuration: {}", e)))?;

        Ok(Self {
            store,
            endpoint: config.endpoint,
            bucket: config.bucket,
            cdn_url: config.cdn_url,
            signer,
            retry,
        })
    }

    fn key(remote_path: &str) -> ObjectPath {
        ObjectPath::from(remote_path.trim_start_matches('/'))
    }

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> StorageResult<u64> {
        let location = Self::key(remote_path);
        let size = tokio::fs::metadata(local_path).await?.len();

        if size <= SINGLE_PUT_LIMIT {
            let data = tokio::fs::read(local_path).await?;
            self.store
                .put(&location, PutPayload::from(Bytes::from(data)))
                .await
                .map_err(|e| StorageError::Transfer(e.to_string()))?;
            return Ok(size);
        }

        let upload = self
            .store
            .put_multipart(&location)
            .await
            .map_err(|e| StorageError::Transfer(e.to_string()))?;
        let mut writer = WriteMultipart::new(upload);
        let mut file = tokio::fs::File::open(local_path).await?;
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            writer
                .wait_for_capacity(4)
                .await
                .map_err(|e| StorageError::Transfer(e.to_string()))?;
            writer.write(&buffer[..read]);
        }
        writer
            .finish()
            .await
            .map_err(|e| StorageError::Transfer(e.to_string()))?;
        Ok(size)
    }

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let result = self
            .store
            .get(&Self::key(remote_path))
            .await
            .map_err(|e| match e {
                ObjectStoreError::NotFound { .. } => StorageError::NotFound(remote_path.to_string()),
                other => StorageError::Transfer(other.to_string()),
            })?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = result.into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::Transfer(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, remote_path: &str) -> StorageResult<()> {
        match self.store.delete(&Self::key(remote_path)).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::Transfer(e.to_string())),
        }
    }

    async fn total_size(&self) -> StorageResult<u64> {
        let mut listing = self.store.list(None);
        let mut used: u64 = 0;
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(|e| StorageError::Backend(e.to_string()))?;
            used = used.saturating_add(meta.size as u64);
        }
        Ok(used)
    }
}

#[async_trait]
impl StorageAdapter for S3StorageAdapter {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> UploadResult {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return UploadResult::failure(format!(
                "Local file not found: {}",
                local_path.display()
            ));
        }

        let start = Instant::now();
        match self
            .retry
            .execute("upload", || self.put_file(local_path, remote_path))
            .await
        {
            Ok(size) => {
                tracing::info!(
                    bucket = %self.bucket,
                    key = %remote_path,
                    size_bytes = size,
                    duration_ms = elapsed_ms(start),
                    "S3 upload successful"
                );
                UploadResult::success(remote_path, self.get_url(remote_path), Some(size))
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %remote_path,
                    duration_ms = elapsed_ms(start),
                    "S3 upload failed"
                );
                UploadResult::failure(e.to_string())
            }
        }
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> bool {
        let start = Instant::now();
        match self
            .retry
            .execute("download", || self.get_file(remote_path, local_path))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    bucket = %self.bucket,
                    key = %remote_path,
                    duration_ms = elapsed_ms(start),
                    "S3 download successful"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, bucket = %self.bucket, key = %remote_path, "S3 download failed");
                false
            }
        }
    }

    async fn delete(&self, remote_path: &str) -> bool {
        match self.retry.execute("delete", || self.remove(remote_path)).await {
            Ok(()) => {
                tracing::info!(bucket = %self.bucket, key = %remote_path, "S3 delete successful");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, bucket = %self.bucket, key = %remote_path, "S3 delete failed");
                false
            }
        }
    }

    async fn exists(&self, remote_path: &str) -> bool {
        match self.store.head(&Self::key(remote_path)).await {
            Ok(_) => true,
            Err(ObjectStoreError::NotFound { .. }) => false,
            Err(e) => {
                tracing::warn!(error = %e, bucket = %self.bucket, key = %remote_path, "S3 head failed");
                false
            }
        }
    }

    /// CDN URL when configured, otherwise path-style `{endpoint}/{bucket}/{key}`.
    fn get_url(&self, remote_path: &str) -> String {
        match self.cdn_url.as_deref() {
            Some(cdn_url) => join_url(cdn_url, remote_path),
            None => join_url(
                &format!("{}/{}", self.endpoint.trim_end_matches('/'), self.bucket),
                remote_path,
            ),
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let start = Instant::now();
        let mut listing = self.store.list(None);
        match listing.next().await {
            Some(Err(e)) => ConnectionTestResult::failure(e.to_string()),
            _ => ConnectionTestResult::success(
                format!("S3 connection successful. Bucket: {}", self.bucket),
                elapsed_ms(start),
                Some(format!("Endpoint: {}", self.endpoint)),
            ),
        }
    }

    /// Sum of object sizes. Buckets have no fixed capacity.
    async fn get_quota(&self) -> Option<StorageQuota> {
        match self.total_size().await {
            Ok(used) => Some(StorageQuota::new(used, None)),
            Err(e) => {
                tracing::warn!(error = %e, bucket = %self.bucket, "S3 usage listing failed");
                None
            }
        }
    }

    /// Object stores have no directories.
    async fn create_directory(&self, _path: &str) -> bool {
        true
    }

    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}
