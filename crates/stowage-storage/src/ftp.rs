//! FTP storage, optionally over explicit TLS
//!
//! suppaftp is a blocking client, so every operation opens a session inside
//! `spawn_blocking` and closes it when the session guard drops.

use async_trait::async_trait;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use stowage_core::StorageKind;
use suppaftp::types::{FileType, Response};
use suppaftp::{FtpError, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};

use crate::config::FtpConfig;
use crate::error::{StorageError, StorageResult};
use crate::result::{ConnectionTestResult, StorageQuota, UploadResult};
use crate::retry::RetryPolicy;
use crate::signing::UrlSigner;
use crate::traits::{elapsed_ms, join_remote_path, proxy_url, remote_parent, StorageAdapter};

#[derive(Clone)]
pub struct FtpStorageAdapter {
    config: Arc<FtpConfig>,
    signer: UrlSigner,
    retry: RetryPolicy,
}

/// Logged-in control connection. Sends QUIT on drop.
struct FtpSession {
    stream: NativeTlsFtpStream,
}

impl FtpSession {
    fn open(config: &FtpConfig) -> StorageResult<Self> {
        let addr = resolve(&config.host, config.port)?;
        let mut stream = NativeTlsFtpStream::connect_timeout(addr, config.timeout)
            .map_err(|e| connection_error(config, e))?;
        stream
            .get_ref()
            .set_read_timeout(Some(config.timeout))
            .map_err(StorageError::Io)?;

        if config.ssl {
            let tls = suppaftp::native_tls::TlsConnector::new()
                .map_err(|e| StorageError::Connection(format!("TLS setup failed: {}", e)))?;
            stream = stream
                .into_secure(NativeTlsConnector::from(tls), &config.host)
                .map_err(|e| connection_error(config, e))?;
        }

        stream
            .login(&config.username, &config.password)
            .map_err(|e| {
                StorageError::Connection(format!(
                    "FTP login failed for user {}@{}:{}: {}",
                    config.username, config.host, config.port, e
                ))
            })?;
        stream.set_mode(if config.passive {
            Mode::Passive
        } else {
            Mode::Active
        });
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| StorageError::Connection(format!("Failed to set binary mode: {}", e)))?;

        Ok(Self { stream })
    }

    /// `mkdir -p`. Segments that already exist are skipped.
    fn create_dir_all(&mut self, path: &str) -> StorageResult<()> {
        let home = self.stream.pwd().unwrap_or_else(|_| "/".to_string());
        if self.stream.cwd(path).is_ok() {
            let _ = self.stream.cwd(&home);
            return Ok(());
        }

        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if self.stream.cwd(&current).is_ok() {
                continue;
            }
            if let Err(e) = self.stream.mkdir(&current) {
                // Another writer may have created it in between.
                if self.stream.cwd(&current).is_err() {
                    let _ = self.stream.cwd(&home);
                    return Err(StorageError::Transfer(format!(
                        "Failed to create FTP directory {}: {}",
                        current, e
                    )));
                }
            }
        }
        let _ = self.stream.cwd(&home);
        Ok(())
    }

    fn put(&mut self, local_path: &Path, remote_path: &str) -> StorageResult<u64> {
        if let Some(parent) = remote_parent(remote_path) {
            self.create_dir_all(parent)?;
        }
        let mut file = std::fs::File::open(local_path)?;
        self.stream.put_file(remote_path, &mut file).map_err(|e| {
            StorageError::Transfer(format!("Failed to upload file to FTP: {}: {}", remote_path, e))
        })
    }

    fn get(&mut self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut reader = self.stream.retr_as_stream(remote_path).map_err(|e| {
            StorageError::Transfer(format!(
                "Failed to download file from FTP: {}: {}",
                remote_path, e
            ))
        })?;
        let mut file = std::fs::File::create(local_path)?;
        std::io::copy(&mut reader, &mut file)?;
        self.stream
            .finalize_retr_stream(reader)
            .map_err(|e| StorageError::Transfer(format!("FTP transfer did not complete: {}", e)))
    }

    fn remove(&mut self, remote_path: &str) -> StorageResult<()> {
        match self.stream.rm(remote_path) {
            Ok(()) => Ok(()),
            Err(e) if is_missing_file(&e) => Ok(()),
            Err(_) if !self.exists(remote_path) => Ok(()),
            Err(e) => Err(StorageError::Transfer(format!(
                "Failed to delete file from FTP: {}: {}",
                remote_path, e
            ))),
        }
    }

    fn exists(&mut self, remote_path: &str) -> bool {
        self.stream.size(remote_path).is_ok()
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        let _ = self.stream.quit();
    }
}

/// 550: the file is already gone.
fn is_missing_file(error: &FtpError) -> bool {
    matches!(
        error,
        FtpError::UnexpectedResponse(Response {
            status: Status::FileUnavailable,
            ..
        })
    )
}

fn resolve(host: &str, port: u16) -> StorageResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| StorageError::Connection(format!("Cannot resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| StorageError::Connection(format!("No address for {}:{}", host, port)))
}

fn connection_error(config: &FtpConfig, e: FtpError) -> StorageError {
    StorageError::Connection(format!(
        "Failed to connect to FTP server {}:{}: {}",
        config.host, config.port, e
    ))
}

impl FtpStorageAdapter {
    pub fn new(config: FtpConfig, signer: UrlSigner, retry: RetryPolicy) -> Self {
        Self {
            config: Arc::new(config),
            signer,
            retry,
        }
    }

    fn full_path(&self, remote_path: &str) -> StorageResult<String> {
        join_remote_path(&self.config.base_path, remote_path)
    }

    async fn with_session<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpSession) -> StorageResult<T> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = FtpSession::open(&config)?;
            f(&mut session)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("FTP task failed: {}", e)))?
    }
}

#[async_trait]
impl StorageAdapter for FtpStorageAdapter {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> UploadResult {
        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return UploadResult::failure(format!(
                "Local file not found: {}",
                local_path.display()
            ));
        }
        let full = match self.full_path(remote_path) {
            Ok(full) => full,
            Err(e) => return UploadResult::failure(e.to_string()),
        };

        let start = Instant::now();
        let local: PathBuf = local_path.to_path_buf();
        let result = self
            .retry
            .execute("upload", || {
                let local = local.clone();
                let full = full.clone();
                self.with_session(move |session| session.put(&local, &full))
            })
            .await;

        match result {
            Ok(size) => {
                tracing::info!(
                    host = %self.config.host,
                    remote_path = %full,
                    size_bytes = size,
                    duration_ms = elapsed_ms(start),
                    "FTP upload successful"
                );
                UploadResult::success(remote_path, self.get_url(remote_path), Some(size))
            }
            Err(e) => {
                tracing::error!(host = %self.config.host, remote_path = %full, error = %e, "FTP upload failed");
                UploadResult::failure(e.to_string())
            }
        }
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> bool {
        let Ok(full) = self.full_path(remote_path) else {
            return false;
        };
        let local = local_path.to_path_buf();
        let result = self
            .retry
            .execute("download", || {
                let local = local.clone();
                let full = full.clone();
                self.with_session(move |session| session.get(&full, &local))
            })
            .await;

        if let Err(e) = &result {
            tracing::warn!(host = %self.config.host, remote_path = %full, error = %e, "FTP download failed");
        }
        result.is_ok()
    }

    async fn delete(&self, remote_path: &str) -> bool {
        let Ok(full) = self.full_path(remote_path) else {
            return false;
        };
        let result = self
            .retry
            .execute("delete", || {
                let full = full.clone();
                self.with_session(move |session| session.remove(&full))
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(host = %self.config.host, remote_path = %full, "FTP delete successful");
                true
            }
            Err(e) => {
                tracing::warn!(host = %self.config.host, remote_path = %full, error = %e, "FTP delete failed");
                false
            }
        }
    }

    async fn exists(&self, remote_path: &str) -> bool {
        let Ok(full) = self.full_path(remote_path) else {
            return false;
        };
        self.with_session(move |session| Ok(session.exists(&full)))
            .await
            .unwrap_or(false)
    }

    fn get_url(&self, remote_path: &str) -> String {
        proxy_url(remote_path)
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let start = Instant::now();
        let result = self
            .with_session(|session| {
                session
                    .stream
                    .pwd()
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
                Ok(session.stream.get_welcome_msg().map(|msg| msg.trim().to_string()))
            })
            .await;

        match result {
            Ok(server_info) => {
                ConnectionTestResult::success("FTP connection successful", elapsed_ms(start), server_info)
            }
            Err(e) => ConnectionTestResult::failure(e.to_string()),
        }
    }

    /// FTP has no standard way to report usage.
    async fn get_quota(&self) -> Option<StorageQuota> {
        None
    }

    async fn create_directory(&self, path: &str) -> bool {
        let Ok(full) = self.full_path(path) else {
            return false;
        };
        self.with_session(move |session| session.create_dir_all(&full))
            .await
            .is_ok()
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Ftp
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}
