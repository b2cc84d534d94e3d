//! Values returned by storage adapters

use serde::Serialize;

/// Outcome of an upload. Adapters never return an error from `upload`; a
/// failure is reported here with its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    pub remote_path: Option<String>,
    pub url: Option<String>,
    pub file_size: Option<u64>,
    pub error_message: Option<String>,
}

impl UploadResult {
    pub fn success(remote_path: impl Into<String>, url: impl Into<String>, file_size: Option<u64>) -> Self {
        Self {
            success: true,
            remote_path: Some(remote_path.into()),
            url: Some(url.into()),
            file_size,
            error_message: None,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            remote_path: None,
            url: None,
            file_size: None,
            error_message: Some(error_message.into()),
        }
    }

    pub fn error(&self) -> &str {
        self.error_message.as_deref().unwrap_or("Unknown error")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    pub error_message: Option<String>,
    pub latency_ms: Option<f64>,
    pub server_info: Option<String>,
}

impl ConnectionTestResult {
    pub fn success(message: impl Into<String>, latency_ms: f64, server_info: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_message: None,
            latency_ms: Some(latency_ms),
            server_info,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        let error_message = error_message.into();
        Self {
            success: false,
            message: "Connection failed".to_string(),
            error_message: Some(error_message),
            latency_ms: None,
            server_info: None,
        }
    }
}

/// Space usage of a storage. `total_bytes` is `None` when the backend has no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    pub used_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl StorageQuota {
    pub fn new(used_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            used_bytes,
            total_bytes,
        }
    }

    pub fn available_bytes(&self) -> Option<u64> {
        self.total_bytes
            .map(|total| total.saturating_sub(self.used_bytes))
    }

    pub fn usage_percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some(((self.used_bytes as f64 / total as f64) * 10000.0).round() / 100.0)
            }
            _ => None,
        }
    }

    pub fn has_room_for(&self, bytes: u64) -> bool {
        self.available_bytes().map_or(true, |available| available >= bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_percentages() {
        let quota = StorageQuota::new(250, Some(1000));
        assert_eq!(quota.available_bytes(), Some(750));
        assert_eq!(quota.usage_percent(), Some(25.0));
        assert!(quota.has_room_for(750));
        assert!(!quota.has_room_for(751));
    }

    #[test]
    fn unlimited_quota_always_has_room() {
        let quota = StorageQuota::new(u64::MAX / 2, None);
        assert_eq!(quota.available_bytes(), None);
        assert_eq!(quota.usage_percent(), None);
        assert!(quota.has_room_for(u64::MAX));
    }

    #[test]
    fn failure_result_carries_message() {
        let result = UploadResult::failure("Local file not found: /tmp/x.mp4");
        assert!(!result.success);
        assert_eq!(result.error(), "Local file not found: /tmp/x.mp4");
        assert!(result.remote_path.is_none());
    }
}
