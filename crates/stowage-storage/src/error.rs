//! Storage error types

use stowage_core::{AppError, StorageKind};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    #[error(transparent)]
    Repository(#[from] AppError),

    #[error("Storage is disabled: {0}")]
    Disabled(String),

    #[error("Insufficient space on storage {storage}: {required} bytes required")]
    InsufficientSpace { storage: String, required: u64 },

    #[error("Operation \"{operation}\" failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Whether another attempt of the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Connection(_)
            | StorageError::Transfer(_)
            | StorageError::Backend(_)
            | StorageError::Io(_) => true,
            StorageError::NotFound(_)
            | StorageError::InvalidPath(_)
            | StorageError::Config(_)
            | StorageError::Repository(_)
            | StorageError::Disabled(_)
            | StorageError::InsufficientSpace { .. }
            | StorageError::RetriesExhausted { .. } => false,
        }
    }
}

/// Error for a non-success HTTP response. A 404 is final, anything else may be retried.
#[cfg_attr(not(any(feature = "storage-s3", feature = "storage-http")), allow(dead_code))]
pub(crate) fn http_status_error(action: &str, path: &str, status: u16, body: &str) -> StorageError {
    if status == 404 {
        return StorageError::NotFound(path.to_string());
    }
    let body = body.trim();
    if body.is_empty() {
        StorageError::Transfer(format!("{} failed with status {}", action, status))
    } else {
        StorageError::Transfer(format!("{} failed with status {}: {}", action, status, body))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Raised while building an adapter from a storage's key/value configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("{} storage configuration is missing required fields: {}", .kind.label(), .fields.join(", "))]
    MissingFields {
        kind: StorageKind,
        fields: Vec<String>,
    },

    #[error("{} storage configuration has an invalid {field}: {reason}", .kind.label())]
    InvalidField {
        kind: StorageKind,
        field: String,
        reason: String,
    },
}

impl ConfigValidationError {
    pub fn missing_fields(&self) -> &[String] {
        match self {
            ConfigValidationError::MissingFields { fields, .. } => fields,
            ConfigValidationError::InvalidField { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_contains_cause() {
        let err = StorageError::RetriesExhausted {
            operation: "upload".to_string(),
            attempts: 3,
            source: Box::new(StorageError::Connection("connection refused".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Operation \"upload\" failed after 3 attempts: Connection failed: connection refused"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn http_status_maps_not_found() {
        assert!(matches!(
            http_status_error("Upload", "a.mp4", 404, ""),
            StorageError::NotFound(_)
        ));
        let err = http_status_error("Upload", "a.mp4", 503, "busy\n");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Transfer failed: Upload failed with status 503: busy");
    }

    #[test]
    fn missing_fields_are_listed() {
        let err = ConfigValidationError::MissingFields {
            kind: StorageKind::Ftp,
            fields: vec!["username".into(), "password".into()],
        };
        assert_eq!(
            err.to_string(),
            "FTP storage configuration is missing required fields: username, password"
        );
    }
}
