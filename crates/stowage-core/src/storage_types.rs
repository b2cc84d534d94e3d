use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend kinds
///
/// Every configured storage names one of these. The factory matches on it to
/// build the adapter, and the database stores it as the `storage_kind` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "storage_kind", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Ftp,
    Sftp,
    S3,
    Http,
}

impl StorageKind {
    /// Human readable label used in log lines and operator output.
    pub fn label(&self) -> &'static str {
        match self {
            StorageKind::Local => "Local",
            StorageKind::Ftp => "FTP",
            StorageKind::Sftp => "SFTP",
            StorageKind::S3 => "S3",
            StorageKind::Http => "HTTP",
        }
    }
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "ftp" => Ok(StorageKind::Ftp),
            "sftp" => Ok(StorageKind::Sftp),
            "s3" => Ok(StorageKind::S3),
            "http" => Ok(StorageKind::Http),
            _ => Err(anyhow::anyhow!("Invalid storage kind: {}", s)),
        }
    }
}

impl Display for StorageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageKind::Local => write!(f, "local"),
            StorageKind::Ftp => write!(f, "ftp"),
            StorageKind::Sftp => write!(f, "sftp"),
            StorageKind::S3 => write!(f, "s3"),
            StorageKind::Http => write!(f, "http"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("SFTP".parse::<StorageKind>().unwrap(), StorageKind::Sftp);
        assert_eq!("s3".parse::<StorageKind>().unwrap(), StorageKind::S3);
        assert!("nfs".parse::<StorageKind>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for kind in [
            StorageKind::Local,
            StorageKind::Ftp,
            StorageKind::Sftp,
            StorageKind::S3,
            StorageKind::Http,
        ] {
            assert_eq!(kind.to_string().parse::<StorageKind>().unwrap(), kind);
        }
    }
}
