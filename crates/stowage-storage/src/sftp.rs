//! SFTP storage over libssh2
//!
//! Like FTP, the client is blocking: one session per operation, opened inside
//! `spawn_blocking` and disconnected on drop.

use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use stowage_core::StorageKind;

use crate::config::{SftpAuth, SftpConfig};
use crate::error::{StorageError, StorageResult};
use crate::result::{ConnectionTestResult, StorageQuota, UploadResult};
use crate::retry::RetryPolicy;
use crate::signing::UrlSigner;
use crate::traits::{elapsed_ms, join_remote_path, proxy_url, remote_parent, StorageAdapter};

/// SFTP status code for a missing file.
const SFTP_NO_SUCH_FILE: i32 = 2;
const DIR_MODE: i32 = 0o755;

#[derive(Clone)]
pub struct SftpStorageAdapter {
    config: Arc<SftpConfig>,
    signer: UrlSigner,
    retry: RetryPolicy,
}

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl SftpSession {
    fn open(config: &SftpConfig) -> StorageResult<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| {
                StorageError::Connection(format!("Cannot resolve {}:{}: {}", config.host, config.port, e))
            })?
            .next()
            .ok_or_else(|| StorageError::Connection(format!("No address for {}", config.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, config.timeout).map_err(|e| {
            StorageError::Connection(format!(
                "Failed to connect to SFTP server {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

        let mut session = Session::new().map_err(ssh_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(config.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(ssh_error)?;

        let auth = match &config.auth {
            SftpAuth::Password(password) => session.userauth_password(&config.username, password),
            SftpAuth::Key {
                private_key,
                passphrase,
            } => session.userauth_pubkey_memory(
                &config.username,
                None,
                private_key,
                passphrase.as_deref(),
            ),
        };
        if auth.is_err() || !session.authenticated() {
            return Err(StorageError::Connection(format!(
                "SFTP authentication failed for user: {}@{}:{}",
                config.username, config.host, config.port
            )));
        }

        let sftp = session.sftp().map_err(ssh_error)?;
        Ok(Self { session, sftp })
    }

    fn create_dir_all(&self, path: &str) -> StorageResult<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            let dir = Path::new(&current);
            if self.sftp.stat(dir).is_ok() {
                continue;
            }
            if let Err(e) = self.sftp.mkdir(dir, DIR_MODE) {
                if self.sftp.stat(dir).is_err() {
                    return Err(StorageError::Transfer(format!(
                        "Failed to create SFTP directory {}: {}",
                        current, e
                    )));
                }
            }
        }
        Ok(())
    }

    fn put(&self, local_path: &Path, remote_path: &str) -> StorageResult<u64> {
        if let Some(parent) = remote_parent(remote_path) {
            self.create_dir_all(parent)?;
        }
        let mut source = std::fs::File::open(local_path)?;
        let mut target = self.sftp.create(Path::new(remote_path)).map_err(|e| {
            StorageError::Transfer(format!("Failed to upload file to SFTP: {}: {}", remote_path, e))
        })?;
        Ok(std::io::copy(&mut source, &mut target)?)
    }

    fn get(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let mut source = self.sftp.open(Path::new(remote_path)).map_err(|e| {
            if is_missing(&e) {
                StorageError::NotFound(remote_path.to_string())
            } else {
                StorageError::Transfer(format!(
                    "Failed to download file from SFTP: {}: {}",
                    remote_path, e
                ))
            }
        })?;
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut target = std::fs::File::create(local_path)?;
        std::io::copy(&mut source, &mut target)?;
        Ok(())
    }

    fn remove(&self, remote_path: &str) -> StorageResult<()> {
        match self.sftp.unlink(Path::new(remote_path)) {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(StorageError::Transfer(format!(
                "Failed to delete file from SFTP: {}: {}",
                remote_path, e
            ))),
        }
    }

    fn exists(&self, remote_path: &str) -> bool {
        self.sftp.stat(Path::new(remote_path)).is_ok()
    }

    /// Ask the server's `df` about the filesystem holding `path`.
    fn disk_usage(&self, path: &str) -> StorageResult<Option<StorageQuota>> {
        let mut channel = self.session.channel_session().map_err(ssh_error)?;
        channel
            .exec(&format!("df -Pk {}", shell_quote(path)))
            .map_err(ssh_error)?;
        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        let _ = channel.wait_close();
        Ok(parse_df_output(&output))
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "closing", None);
    }
}

fn ssh_error(e: ssh2::Error) -> StorageError {
    StorageError::Connection(format!("SSH error: {}", e))
}

fn is_missing(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// POSIX `df -Pk`: a header line, then `fs blocks used available capacity mount`
/// in 1024-byte blocks.
fn parse_df_output(output: &str) -> Option<StorageQuota> {
    let line = output.lines().nth(1)?;
    let columns: Vec<&str> = line.split_whitespace().collect();
    let total = columns.get(1)?.parse::<u64>().ok()?;
    let used = columns.get(2)?.parse::<u64>().ok()?;
    Some(StorageQuota::new(
        used.saturating_mul(1024),
        Some(total.saturating_mul(1024)),
    ))
}

impl SftpStorageAdapter {
    pub fn new(config: SftpConfig, signer: UrlSigner, retry: RetryPolicy) -> Self {
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
        F: FnOnce(&SftpSession) -> StorageResult<T> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let session = SftpSession::open(&config)?;
            f(&session)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("SFTP task failed: {}", e)))?
    }
}

#[async_trait]
impl StorageAdapter for SftpStorageAdapter {
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
                    "SFTP upload successful"
                );
                UploadResult::success(remote_path, self.get_url(remote_path), Some(size))
            }
            Err(e) => {
                tracing::error!(host = %self.config.host, remote_path = %full, error = %e, "SFTP upload failed");
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
            tracing::warn!(host = %self.config.host, remote_path = %full, error = %e, "SFTP download failed");
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
                tracing::info!(host = %self.config.host, remote_path = %full, "SFTP delete successful");
                true
            }
            Err(e) => {
                tracing::warn!(host = %self.config.host, remote_path = %full, error = %e, "SFTP delete failed");
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
            .with_session(|session| Ok(session.session.banner().map(str::to_string)))
            .await;

        match result {
            Ok(server_info) => {
                ConnectionTestResult::success("SFTP connection successful", elapsed_ms(start), server_info)
            }
            Err(e) => ConnectionTestResult::failure(e.to_string()),
        }
    }

    async fn get_quota(&self) -> Option<StorageQuota> {
        let base = self.config.base_path.clone();
        match self.with_session(move |session| session.disk_usage(&base)).await {
            Ok(quota) => quota,
            Err(e) => {
                tracing::debug!(host = %self.config.host, error = %e, "SFTP quota unavailable");
                None
            }
        }
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
        StorageKind::Sftp
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn adapter(port: u16) -> SftpStorageAdapter {
        SftpStorageAdapter::new(
            SftpConfig {
                host: "127.0.0.1".into(),
                port,
                username: "deploy".into(),
                auth: SftpAuth::Password("secret".into()),
                base_path: "/srv/media".into(),
                timeout: Duration::from_secs(2),
            },
            UrlSigner::new("secret").unwrap(),
            RetryPolicy::immediate(),
        )
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn parses_posix_df_output() {
        let output = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                      /dev/sda1         1000000    250000    750000      25% /srv\n";
        let quota = parse_df_output(output).unwrap();
        assert_eq!(quota.total_bytes, Some(1_024_000_000));
        assert_eq!(quota.used_bytes, 256_000_000);
        assert_eq!(quota.usage_percent(), Some(25.0));

        assert!(parse_df_output("df: /nope: No such file or directory\n").is_none());
    }

    #[test]
    fn shell_quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("/srv/it's here"), "'/srv/it'\\''s here'");
    }

    #[test]
    fn urls_go_through_the_proxy() {
        assert_eq!(adapter(22).get_url("/videos/a.mp4"), "/storage/proxy/videos/a.mp4");
    }

    #[tokio::test]
    async fn unreachable_server_reports_failure() {
        let sftp = adapter(closed_port());
        let result = sftp.test_connection().await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Failed to connect"));
        assert!(sftp.get_quota().await.is_none());
        assert!(!sftp.delete("videos/a.mp4").await);
    }
}
