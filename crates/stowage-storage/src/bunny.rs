//! BunnyCDN Edge Storage
//!
//! Selected for S3-kind storages whose endpoint points at BunnyCDN. Talks to the
//! storage HTTP API directly: `PUT`/`GET`/`DELETE`/`HEAD` on
//! `https://{region host}/{zone}/{path}` with the zone password in `AccessKey`.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Instant;
use stowage_core::StorageKind;
use tokio::io::AsyncWriteExt;

use crate::config::BunnyConfig;
use crate::error::{http_status_error, StorageError, StorageResult};
use crate::result::{ConnectionTestResult, StorageQuota, UploadResult};
use crate::retry::RetryPolicy;
use crate::signing::UrlSigner;
use crate::traits::{elapsed_ms, join_url, StorageAdapter};

const ACCESS_KEY_HEADER: &str = "AccessKey";
const DEFAULT_REGION_HOST: &str = "storage.bunnycdn.com";

/// Storage API host for a region code. Unknown codes use the default (Falkenstein) region.
pub fn region_host(region: &str) -> String {
    match region.to_lowercase().as_str() {
        "" | "de" => DEFAULT_REGION_HOST.to_string(),
        code @ ("ny" | "la" | "sg" | "syd" | "uk" | "se" | "br" | "jh") => {
            format!("{}.{}", code, DEFAULT_REGION_HOST)
        }
        _ => DEFAULT_REGION_HOST.to_string(),
    }
}

#[derive(Clone)]
pub struct BunnyStorageAdapter {
    client: Client,
    api_base: String,
    storage_zone: String,
    api_key: String,
    region: String,
    cdn_url: Option<String>,
    signer: UrlSigner,
    retry: RetryPolicy,
}

impl BunnyStorageAdapter {
    pub fn new(config: BunnyConfig, signer: UrlSigner, retry: RetryPolicy) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Backend(format!("Failed to build HTTP client: {}", e)))?;
        let api_base = format!("https://{}/{}", region_host(&config.region), config.storage_zone);

        Ok(Self {
            client,
            api_base,
            storage_zone: config.storage_zone,
            api_key: config.api_key,
            region: config.region,
            cdn_url: config.cdn_url,
            signer,
            retry,
        })
    }

    /// Point the adapter at another API base, e.g. a local mock server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn object_url(&self, key: &str) -> String {
        join_url(&self.api_base, key)
    }

    async fn put(&self, local_path: &Path, key: &str) -> StorageResult<u64> {
        let body = tokio::fs::read(local_path).await?;
        let size = body.len() as u64;
        let response = self
            .client
            .put(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(size);
        }
        let text = response.text().await.unwrap_or_default();
        Err(http_status_error("BunnyCDN upload", key, status.as_u16(), &text))
    }

    async fn fetch(&self, key: &str, local_path: &Path) -> StorageResult<()> {
        let mut response = self
            .client
            .get(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_status_error("BunnyCDN download", key, status.as_u16(), &text));
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(local_path).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| StorageError::Transfer(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let response = self
            .client
            .delete(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(http_status_error("BunnyCDN delete", key, status.as_u16(), &text))
    }
}

#[async_trait]
impl StorageAdapter for BunnyStorageAdapter {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> UploadResult {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return UploadResult::failure(format!(
                "Local file not found: {}",
                local_path.display()
            ));
        }

        let key = remote_path.trim_start_matches('/');
        let start = Instant::now();
        match self.retry.execute("upload", || self.put(local_path, key)).await {
            Ok(size) => {
                tracing::info!(
                    storage_zone = %self.storage_zone,
                    path = %key,
                    size_bytes = size,
                    duration_ms = elapsed_ms(start),
                    "BunnyCDN upload successful"
                );
                UploadResult::success(key, self.get_url(key), Some(size))
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    storage_zone = %self.storage_zone,
                    path = %key,
                    "BunnyCDN upload failed"
                );
                UploadResult::failure(e.to_string())
            }
        }
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> bool {
        let key = remote_path.trim_start_matches('/');
        match self.retry.execute("download", || self.fetch(key, local_path)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, storage_zone = %self.storage_zone, path = %key, "BunnyCDN download failed");
                false
            }
        }
    }

    async fn delete(&self, remote_path: &str) -> bool {
        let key = remote_path.trim_start_matches('/');
        match self.retry.execute("delete", || self.remove(key)).await {
            Ok(()) => {
                tracing::info!(storage_zone = %self.storage_zone, path = %key, "BunnyCDN delete successful");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, storage_zone = %self.storage_zone, path = %key, "BunnyCDN delete failed");
                false
            }
        }
    }

    async fn exists(&self, remote_path: &str) -> bool {
        let key = remote_path.trim_start_matches('/');
        match self
            .client
            .head(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::warn!(error = %e, path = %key, "BunnyCDN head failed");
                false
            }
        }
    }

    /// Pull zone URL when configured, otherwise the storage API URL.
    fn get_url(&self, remote_path: &str) -> String {
        match self.cdn_url.as_deref() {
            Some(cdn_url) => join_url(cdn_url, remote_path),
            None => self.object_url(remote_path),
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let start = Instant::now();
        let response = self
            .client
            .get(format!("{}/", self.api_base))
            .header(ACCESS_KEY_HEADER, &self.api_key)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => ConnectionTestResult::success(
                format!("BunnyCDN connection successful. Storage Zone: {}", self.storage_zone),
                elapsed_ms(start),
                Some(format!("Region: {}", self.region)),
            ),
            Ok(response) => ConnectionTestResult::failure(format!(
                "BunnyCDN returned status {}",
                response.status().as_u16()
            )),
            Err(e) => ConnectionTestResult::failure(e.to_string()),
        }
    }

    /// The storage API does not report zone usage.
    async fn get_quota(&self) -> Option<StorageQuota> {
        None
    }

    /// Directories are created implicitly by uploads.
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
