//! Generic HTTP file service
//!
//! Uploads are multipart POSTs to the upload endpoint, deletes are DELETEs with a
//! `path` query parameter. Reads go to `{endpoint or baseUrl}/{path}`.

use async_trait::async_trait;
use reqwest::header::SERVER;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;
use stowage_core::StorageKind;
use tokio::io::AsyncWriteExt;

use crate::config::HttpConfig;
use crate::error::{http_status_error, StorageError, StorageResult};
use crate::result::{ConnectionTestResult, StorageQuota, UploadResult};
use crate::retry::RetryPolicy;
use crate::signing::UrlSigner;
use crate::traits::{elapsed_ms, join_url, StorageAdapter};

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    used: u64,
    total: Option<u64>,
}

#[derive(Clone)]
pub struct HttpStorageAdapter {
    client: Client,
    config: HttpConfig,
    signer: UrlSigner,
    retry: RetryPolicy,
}

impl HttpStorageAdapter {
    pub fn new(config: HttpConfig, signer: UrlSigner, retry: RetryPolicy) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Backend(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            signer,
            retry,
        })
    }

    /// Absolute endpoints are used as is, relative ones are joined to the base URL.
    fn build_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            join_url(&self.config.base_url, endpoint)
        }
    }

    fn file_url(&self, endpoint: Option<&str>, remote_path: &str) -> String {
        join_url(endpoint.unwrap_or(&self.config.base_url), remote_path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.auth_token.is_empty() {
            request
        } else {
            request.header(self.config.auth_header.as_str(), &self.config.auth_token)
        }
    }

    async fn post_file(&self, local_path: &Path, remote_path: &str) -> StorageResult<u64> {
        let data = tokio::fs::read(local_path).await?;
        let size = data.len() as u64;
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let form = Form::new()
            .part("file", Part::bytes(data).file_name(file_name))
            .text("path", remote_path.to_string());

        let response = self
            .authorized(self.client.post(self.build_url(&self.config.upload_endpoint)))
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(size);
        }
        let text = response.text().await.unwrap_or_default();
        Err(http_status_error("HTTP upload", remote_path, status.as_u16(), &text))
    }

    async fn fetch(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let url = self.file_url(self.config.download_endpoint.as_deref(), remote_path);
        let mut response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_status_error("HTTP download", remote_path, status.as_u16(), &text));
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

    async fn remove(&self, remote_path: &str) -> StorageResult<()> {
        let response = self
            .authorized(self.client.delete(self.build_url(&self.config.delete_endpoint)))
            .query(&[("path", remote_path)])
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(http_status_error("HTTP delete", remote_path, status.as_u16(), &text))
    }

    async fn fetch_quota(&self, endpoint: &str) -> StorageResult<Option<StorageQuota>> {
        let response = self
            .authorized(self.client.get(self.build_url(endpoint)))
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Ok(None);
        }
        let body: QuotaResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Backend(format!("Invalid quota response: {}", e)))?;
        Ok(Some(StorageQuota::new(body.used, body.total)))
    }
}

#[async_trait]
impl StorageAdapter for HttpStorageAdapter {
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
            .execute("upload", || self.post_file(local_path, remote_path))
            .await
        {
            Ok(size) => {
                tracing::info!(
                    base_url = %self.config.base_url,
                    remote_path = %remote_path,
                    size_bytes = size,
                    duration_ms = elapsed_ms(start),
                    "HTTP upload successful"
                );
                UploadResult::success(remote_path, self.get_url(remote_path), Some(size))
            }
            Err(e) => {
                tracing::error!(error = %e, base_url = %self.config.base_url, remote_path = %remote_path, "HTTP upload failed");
                UploadResult::failure(e.to_string())
            }
        }
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> bool {
        match self
            .retry
            .execute("download", || self.fetch(remote_path, local_path))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, remote_path = %remote_path, "HTTP download failed");
                false
            }
        }
    }

    async fn delete(&self, remote_path: &str) -> bool {
        match self.retry.execute("delete", || self.remove(remote_path)).await {
            Ok(()) => {
                tracing::info!(remote_path = %remote_path, "HTTP delete successful");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, remote_path = %remote_path, "HTTP delete failed");
                false
            }
        }
    }

    async fn exists(&self, remote_path: &str) -> bool {
        let url = self.file_url(self.config.exists_endpoint.as_deref(), remote_path);
        match self.authorized(self.client.head(url)).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::warn!(error = %e, remote_path = %remote_path, "HTTP head failed");
                false
            }
        }
    }

    fn get_url(&self, remote_path: &str) -> String {
        join_url(&self.config.base_url, remote_path)
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let start = Instant::now();
        match self
            .authorized(self.client.head(&self.config.base_url))
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    let server_info = response
                        .headers()
                        .get(SERVER)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    ConnectionTestResult::success(
                        "HTTP connection successful",
                        elapsed_ms(start),
                        server_info,
                    )
                } else {
                    ConnectionTestResult::failure(format!(
                        "HTTP server returned status code: {}",
                        status.as_u16()
                    ))
                }
            }
            Err(e) => ConnectionTestResult::failure(format!("Connection failed: {}", e)),
        }
    }

    async fn get_quota(&self) -> Option<StorageQuota> {
        let endpoint = self.config.quota_endpoint.as_deref()?;
        match self.fetch_quota(endpoint).await {
            Ok(quota) => quota,
            Err(e) => {
                tracing::warn!(error = %e, "HTTP quota request failed");
                None
            }
        }
    }

    /// The remote service creates directories on upload.
    async fn create_directory(&self, _path: &str) -> bool {
        true
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Http
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
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> HttpConfig {
        HttpConfig {
            base_url: base_url.to_string(),
            auth_token: "Bearer token".into(),
            auth_header: "Authorization".into(),
            upload_endpoint: "/api/upload".into(),
            delete_endpoint: "/api/delete".into(),
            download_endpoint: None,
            exists_endpoint: None,
            quota_endpoint: Some("/api/quota".into()),
            timeout: Duration::from_secs(5),
        }
    }

    fn adapter(config: HttpConfig) -> HttpStorageAdapter {
        HttpStorageAdapter::new(config, UrlSigner::new("secret").unwrap(), RetryPolicy::immediate())
            .unwrap()
    }

    #[test]
    fn absolute_endpoints_are_kept() {
        let mut cfg = config("https://files.example.com/");
        cfg.delete_endpoint = "https://other.example.com/remove".into();
        let http = adapter(cfg);
        assert_eq!(http.build_url("/api/upload"), "https://files.example.com/api/upload");
        assert_eq!(
            http.build_url("https://other.example.com/remove"),
            "https://other.example.com/remove"
        );
        assert_eq!(http.get_url("/videos/a.mp4"), "https://files.example.com/videos/a.mp4");
    }

    #[tokio::test]
    async fn upload_posts_multipart_with_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .and(header("Authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.mp4");
        tokio::fs::write(&source, b"abcdef").await.unwrap();

        let result = adapter(config(&server.uri())).upload(&source, "videos/a.mp4").await;
        assert!(result.success, "{}", result.error());
        assert_eq!(result.file_size, Some(6));
        assert_eq!(result.url, Some(format!("{}/videos/a.mp4", server.uri())));

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("name=\"path\""));
        assert!(body.contains("videos/a.mp4"));
    }

    #[tokio::test]
    async fn delete_sends_path_and_accepts_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/delete"))
            .and(query_param("path", "videos/gone.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        assert!(adapter(config(&server.uri())).delete("videos/gone.mp4").await);
    }

    #[tokio::test]
    async fn delete_failure_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        assert!(!adapter(config(&server.uri())).delete("videos/a.mp4").await);
    }

    #[tokio::test]
    async fn quota_reads_used_and_optional_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/quota"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "used": 500,
                "total": 2000
            })))
            .mount(&server)
            .await;

        let quota = adapter(config(&server.uri())).get_quota().await.unwrap();
        assert_eq!(quota.used_bytes, 500);
        assert_eq!(quota.total_bytes, Some(2000));

        let mut without = config(&server.uri());
        without.quota_endpoint = None;
        assert!(adapter(without).get_quota().await.is_none());
    }

    #[tokio::test]
    async fn connection_test_reads_server_header() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("Server", "nginx/1.25"))
            .mount(&server)
            .await;

        let result = adapter(config(&server.uri())).test_connection().await;
        assert!(result.success);
        assert_eq!(result.server_info.as_deref(), Some("nginx/1.25"));
    }

    #[tokio::test]
    async fn connection_test_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = adapter(config(&server.uri())).test_connection().await;
        assert!(!result.success);
        assert_eq!(
            result.error_message.as_deref(),
            Some("HTTP server returned status code: 500")
        );
    }
}
