//! Typed per-backend configuration
//!
//! A storage's `config` map is parsed here, before any adapter exists. All
//! missing required keys are reported together in one [`ConfigValidationError`].

use std::path::{Path, PathBuf};
use std::time::Duration;
use stowage_core::{StorageConfig, StorageKind};

use crate::error::ConfigValidationError;

const FTP_DEFAULT_PORT: u16 = 21;
const SFTP_DEFAULT_PORT: u16 = 22;
const FTP_DEFAULT_TIMEOUT_SECS: u64 = 30;
const SFTP_DEFAULT_TIMEOUT_SECS: u64 = 30;
const HTTP_DEFAULT_TIMEOUT_SECS: u64 = 60;
const S3_DEFAULT_TIMEOUT_SECS: u64 = 60;
const BUNNY_DEFAULT_TIMEOUT_SECS: u64 = 300;
const S3_DEFAULT_REGION: &str = "us-east-1";
const BUNNY_DEFAULT_REGION: &str = "de";
const HTTP_DEFAULT_AUTH_HEADER: &str = "Authorization";

/// Reads keys from a storage's config map and remembers which required ones are missing.
struct FieldReader<'a> {
    kind: StorageKind,
    storage: &'a StorageConfig,
    missing: Vec<String>,
}

impl<'a> FieldReader<'a> {
    fn new(storage: &'a StorageConfig) -> Self {
        Self {
            kind: storage.kind,
            storage,
            missing: Vec::new(),
        }
    }

    fn required(&mut self, key: &str) -> String {
        match self.storage.get(key) {
            Some(value) => value.to_string(),
            None => {
                self.missing.push(key.to_string());
                String::new()
            }
        }
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.storage.get(key).map(str::to_string)
    }

    fn finish(self) -> Result<(), ConfigValidationError> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError::MissingFields {
                kind: self.kind,
                fields: self.missing,
            })
        }
    }

    fn invalid(&self, field: &str, reason: impl Into<String>) -> ConfigValidationError {
        ConfigValidationError::InvalidField {
            kind: self.kind,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn port(&self, default: u16) -> Result<u16, ConfigValidationError> {
        match self.storage.get("port") {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(port) if (1..=65535).contains(&port) => Ok(port as u16),
                _ => Err(self.invalid("port", "must be a number between 1 and 65535")),
            },
        }
    }

    fn timeout(&self, default_secs: u64) -> Result<Duration, ConfigValidationError> {
        match self.storage.get("timeout") {
            None => Ok(Duration::from_secs(default_secs)),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                _ => Err(self.invalid("timeout", "must be a positive number of seconds")),
            },
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigValidationError> {
        match self.storage.get(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(self.invalid(key, "must be true or false")),
            },
        }
    }

    fn check_url(&self, key: &str, value: &str) -> Result<(), ConfigValidationError> {
        match url::Url::parse(value) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
                Ok(())
            }
            _ => Err(self.invalid(key, format!("not a valid URL: {}", value))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub base_path: PathBuf,
    pub public_url: Option<String>,
}

impl LocalConfig {
    /// A relative `basePath` is resolved against `project_dir`.
    pub fn parse(storage: &StorageConfig, project_dir: &Path) -> Result<Self, ConfigValidationError> {
        let mut fields = FieldReader::new(storage);
        let base_path = fields.required("basePath");
        let public_url = fields.optional("publicUrl");
        fields.finish()?;

        let base_path = if is_absolute_path(&base_path) {
            PathBuf::from(base_path)
        } else {
            project_dir.join(base_path.trim_start_matches('/'))
        };

        Ok(Self {
            base_path,
            public_url,
        })
    }
}

/// Unix absolute paths and Windows drive paths such as `C:\` or `D:/`.
fn is_absolute_path(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub base_path: String,
    pub passive: bool,
    pub ssl: bool,
    pub timeout: Duration,
}

impl FtpConfig {
    pub fn parse(storage: &StorageConfig) -> Result<Self, ConfigValidationError> {
        let mut fields = FieldReader::new(storage);
        let host = fields.required("host");
        let username = fields.required("username");
        let password = fields.required("password");
        let base_path = fields.required("basePath");
        let port = fields.port(FTP_DEFAULT_PORT);
        let timeout = fields.timeout(FTP_DEFAULT_TIMEOUT_SECS);
        let passive = fields.flag("passive", true);
        let ssl = fields.flag("ssl", false);
        fields.finish()?;

        Ok(Self {
            host,
            port: port?,
            username,
            password,
            base_path,
            passive: passive?,
            ssl: ssl?,
            timeout: timeout?,
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum SftpAuth {
    Password(String),
    Key {
        private_key: String,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for SftpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SftpAuth::Password(_) => write!(f, "Password(..)"),
            SftpAuth::Key { passphrase, .. } => f
                .debug_struct("Key")
                .field("has_passphrase", &passphrase.is_some())
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    pub base_path: String,
    pub timeout: Duration,
}

impl SftpConfig {
    pub fn parse(storage: &StorageConfig) -> Result<Self, ConfigValidationError> {
        let mut fields = FieldReader::new(storage);
        let host = fields.required("host");
        let username = fields.required("username");
        let base_path = fields.required("basePath");
        let password = fields.optional("password");
        let private_key = fields.optional("privateKey");
        let passphrase = fields.optional("privateKeyPassphrase");
        let auth_type = fields.optional("authType");

        match auth_type.as_deref() {
            Some("password") if password.is_none() => fields.missing.push("password".into()),
            Some("key") if private_key.is_none() => fields.missing.push("privateKey".into()),
            Some("password") | Some("key") => {}
            Some(other) => {
                return Err(fields.invalid(
                    "authType",
                    format!("expected password or key, got {}", other),
                ))
            }
            None if password.is_none() && private_key.is_none() => {
                fields.missing.push("password or privateKey".into())
            }
            None => {}
        }
        let port = fields.port(SFTP_DEFAULT_PORT);
        let timeout = fields.timeout(SFTP_DEFAULT_TIMEOUT_SECS);
        fields.finish()?;

        let auth = match (auth_type.as_deref(), password, private_key) {
            (Some("password"), Some(password), _) => SftpAuth::Password(password),
            (_, _, Some(private_key)) => SftpAuth::Key {
                private_key,
                passphrase,
            },
            (_, Some(password), None) => SftpAuth::Password(password),
            (_, None, None) => {
                return Err(ConfigValidationError::MissingFields {
                    kind: StorageKind::Sftp,
                    fields: vec!["password or privateKey".into()],
                })
            }
        };

        Ok(Self {
            host,
            port: port?,
            username,
            auth,
            base_path,
            timeout: timeout?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub base_url: String,
    pub auth_token: String,
    pub auth_header: String,
    pub upload_endpoint: String,
    pub delete_endpoint: String,
    pub download_endpoint: Option<String>,
    pub exists_endpoint: Option<String>,
    pub quota_endpoint: Option<String>,
    pub timeout: Duration,
}

impl HttpConfig {
    pub fn parse(storage: &StorageConfig) -> Result<Self, ConfigValidationError> {
        let mut fields = FieldReader::new(storage);
        let base_url = fields.required("baseUrl");
        let auth_token = fields.required("authToken");
        let upload_endpoint = fields.required("uploadEndpoint");
        let delete_endpoint = fields.required("deleteEndpoint");
        let timeout = fields.timeout(HTTP_DEFAULT_TIMEOUT_SECS);
        let auth_header = fields
            .optional("authHeader")
            .unwrap_or_else(|| HTTP_DEFAULT_AUTH_HEADER.to_string());
        let download_endpoint = fields.optional("downloadEndpoint");
        let exists_endpoint = fields.optional("existsEndpoint");
        let quota_endpoint = fields.optional("quotaEndpoint");
        let base_url_check = fields.check_url("baseUrl", &base_url);
        fields.finish()?;
        base_url_check?;

        Ok(Self {
            base_url,
            auth_token,
            auth_header,
            upload_endpoint,
            delete_endpoint,
            download_endpoint,
            exists_endpoint,
            quota_endpoint,
            timeout: timeout?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub cdn_url: Option<String>,
    pub path_style: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunnyConfig {
    pub storage_zone: String,
    pub api_key: String,
    pub region: String,
    pub cdn_url: Option<String>,
    pub timeout: Duration,
}

/// An S3-kind storage is either a generic S3 endpoint or BunnyCDN's storage API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S3Backend {
    Generic(S3Config),
    BunnyCdn(BunnyConfig),
}

/// Whether the endpoint's host is BunnyCDN's storage API.
pub fn is_bunny_endpoint(endpoint: &str) -> bool {
    let Ok(url) = url::Url::parse(endpoint) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    ["bunnycdn.com", "bunny.net"]
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
}

impl S3Backend {
    pub fn parse(storage: &StorageConfig) -> Result<Self, ConfigValidationError> {
        let mut fields = FieldReader::new(storage);
        let endpoint = fields.required("endpoint");
        let bucket = fields.required("bucket");
        let bunny = is_bunny_endpoint(&endpoint);
        // BunnyCDN authenticates with the storage zone password alone.
        let access_key = if bunny {
            fields.optional("accessKey").unwrap_or_default()
        } else {
            fields.required("accessKey")
        };
        let secret_key = fields.required("secretKey");
        let cdn_url = fields.optional("cdnUrl");
        let endpoint_check = fields.check_url("endpoint", &endpoint);
        let cdn_url_check = match cdn_url.as_deref() {
            Some(cdn_url) => fields.check_url("cdnUrl", cdn_url),
            None => Ok(()),
        };

        if bunny {
            let timeout = fields.timeout(BUNNY_DEFAULT_TIMEOUT_SECS);
            let region = fields
                .optional("region")
                .unwrap_or_else(|| BUNNY_DEFAULT_REGION.to_string());
            fields.finish()?;
            endpoint_check?;
            cdn_url_check?;
            return Ok(S3Backend::BunnyCdn(BunnyConfig {
                storage_zone: bucket,
                api_key: secret_key,
                region,
                cdn_url,
                timeout: timeout?,
            }));
        }

        let timeout = fields.timeout(S3_DEFAULT_TIMEOUT_SECS);
        let path_style = fields.flag("pathStyleEndpoint", true);
        let region = fields
            .optional("region")
            .unwrap_or_else(|| S3_DEFAULT_REGION.to_string());
        fields.finish()?;
        endpoint_check?;
        cdn_url_check?;

        Ok(S3Backend::Generic(S3Config {
            endpoint,
            region,
            bucket,
            access_key,
            secret_key,
            cdn_url,
            path_style: path_style?,
            timeout: timeout?,
        }))
    }
}

/// Validate a storage's configuration without building an adapter.
pub fn validate(storage: &StorageConfig, project_dir: &Path) -> Result<(), ConfigValidationError> {
    match storage.kind {
        StorageKind::Local => LocalConfig::parse(storage, project_dir).map(|_| ()),
        StorageKind::Ftp => FtpConfig::parse(storage).map(|_| ()),
        StorageKind::Sftp => SftpConfig::parse(storage).map(|_| ()),
        StorageKind::S3 => S3Backend::parse(storage).map(|_| ()),
        StorageKind::Http => HttpConfig::parse(storage).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn storage(kind: StorageKind, pairs: &[(&str, &str)]) -> StorageConfig {
        let config: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StorageConfig::new("test", kind, config)
    }

    #[test]
    fn ftp_with_only_host_names_every_missing_field() {
        let err = FtpConfig::parse(&storage(StorageKind::Ftp, &[("host", "x")])).unwrap_err();
        assert_eq!(err.missing_fields(), &["username", "password", "basePath"]);
    }

    #[test]
    fn ftp_defaults() {
        let config = FtpConfig::parse(&storage(
            StorageKind::Ftp,
            &[
                ("host", "ftp.example.com"),
                ("username", "u"),
                ("password", "p"),
                ("basePath", "/media"),
            ],
        ))
        .unwrap();
        assert_eq!(config.port, 21);
        assert!(config.passive);
        assert!(!config.ssl);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn ftp_rejects_out_of_range_port_and_zero_timeout() {
        let base = [
            ("host", "h"),
            ("username", "u"),
            ("password", "p"),
            ("basePath", "/"),
        ];
        let mut with_port = base.to_vec();
        with_port.push(("port", "70000"));
        let err = FtpConfig::parse(&storage(StorageKind::Ftp, &with_port)).unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidField { ref field, .. } if field == "port"));

        let mut with_timeout = base.to_vec();
        with_timeout.push(("timeout", "0"));
        let err = FtpConfig::parse(&storage(StorageKind::Ftp, &with_timeout)).unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidField { ref field, .. } if field == "timeout"));
    }

    #[test]
    fn sftp_requires_password_or_key() {
        let err = SftpConfig::parse(&storage(
            StorageKind::Sftp,
            &[("host", "h"), ("username", "u"), ("basePath", "/data")],
        ))
        .unwrap_err();
        assert_eq!(err.missing_fields(), &["password or privateKey"]);
    }

    #[test]
    fn sftp_auth_type_selects_credential() {
        let config = SftpConfig::parse(&storage(
            StorageKind::Sftp,
            &[
                ("host", "h"),
                ("username", "u"),
                ("basePath", "/data"),
                ("authType", "password"),
                ("password", "secret"),
                ("privateKey", "-----BEGIN KEY-----"),
            ],
        ))
        .unwrap();
        assert_eq!(config.auth, SftpAuth::Password("secret".into()));
        assert_eq!(config.port, 22);

        let err = SftpConfig::parse(&storage(
            StorageKind::Sftp,
            &[
                ("host", "h"),
                ("username", "u"),
                ("basePath", "/data"),
                ("authType", "key"),
                ("password", "secret"),
            ],
        ))
        .unwrap_err();
        assert_eq!(err.missing_fields(), &["privateKey"]);
    }

    #[test]
    fn http_requires_delete_endpoint_and_valid_base_url() {
        let err = HttpConfig::parse(&storage(
            StorageKind::Http,
            &[("baseUrl", "https://files.example.com"), ("authToken", "t"), ("uploadEndpoint", "/upload")],
        ))
        .unwrap_err();
        assert_eq!(err.missing_fields(), &["deleteEndpoint"]);

        let err = HttpConfig::parse(&storage(
            StorageKind::Http,
            &[
                ("baseUrl", "not a url"),
                ("authToken", "t"),
                ("uploadEndpoint", "/upload"),
                ("deleteEndpoint", "/delete"),
            ],
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidField { ref field, .. } if field == "baseUrl"));
    }

    #[test]
    fn bunny_detection_matches_the_host_only() {
        assert!(is_bunny_endpoint("https://storage.bunnycdn.com"));
        assert!(is_bunny_endpoint("https://ny.storage.bunnycdn.com/zone"));
        assert!(is_bunny_endpoint("https://bunny.net"));
        assert!(!is_bunny_endpoint("https://evil.example/bunnycdn.com"));
        assert!(!is_bunny_endpoint("https://notbunnycdn.com"));
        assert!(!is_bunny_endpoint("storage.bunnycdn.com"));
    }

    #[test]
    fn bunny_endpoint_selects_bunny_backend() {
        let backend = S3Backend::parse(&storage(
            StorageKind::S3,
            &[
                ("endpoint", "https://storage.bunnycdn.com"),
                ("bucket", "my-zone"),
                ("secretKey", "zone-password"),
                ("region", "ny"),
            ],
        ))
        .unwrap();
        match backend {
            S3Backend::BunnyCdn(config) => {
                assert_eq!(config.storage_zone, "my-zone");
                assert_eq!(config.api_key, "zone-password");
                assert_eq!(config.region, "ny");
                assert_eq!(config.timeout, Duration::from_secs(300));
            }
            other => panic!("expected BunnyCDN backend, got {:?}", other),
        }
    }

    #[test]
    fn generic_s3_defaults_and_requires_access_key() {
        let err = S3Backend::parse(&storage(
            StorageKind::S3,
            &[("endpoint", "https://s3.example.com"), ("bucket", "b"), ("secretKey", "s")],
        ))
        .unwrap_err();
        assert_eq!(err.missing_fields(), &["accessKey"]);

        let backend = S3Backend::parse(&storage(
            StorageKind::S3,
            &[
                ("endpoint", "https://s3.example.com"),
                ("bucket", "b"),
                ("accessKey", "a"),
                ("secretKey", "s"),
            ],
        ))
        .unwrap();
        let S3Backend::Generic(config) = backend else {
            panic!("expected generic S3 backend");
        };
        assert_eq!(config.region, "us-east-1");
        assert!(config.path_style);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn s3_rejects_invalid_cdn_url() {
        let err = S3Backend::parse(&storage(
            StorageKind::S3,
            &[
                ("endpoint", "https://s3.example.com"),
                ("bucket", "b"),
                ("accessKey", "a"),
                ("secretKey", "s"),
                ("cdnUrl", "cdn.example.com"),
            ],
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidField { ref field, .. } if field == "cdnUrl"));
    }

    #[test]
    fn local_relative_base_path_resolves_against_project_dir() {
        let config = LocalConfig::parse(
            &storage(StorageKind::Local, &[("basePath", "var/storage")]),
            Path::new("/srv/app"),
        )
        .unwrap();
        assert_eq!(config.base_path, PathBuf::from("/srv/app/var/storage"));

        let config = LocalConfig::parse(
            &storage(StorageKind::Local, &[("basePath", "/tmp/store")]),
            Path::new("/srv/app"),
        )
        .unwrap();
        assert_eq!(config.base_path, PathBuf::from("/tmp/store"));
        assert!(is_absolute_path("C:\\media"));
    }
}
