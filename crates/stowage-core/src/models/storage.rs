use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::storage_types::StorageKind;

/// A configured storage backend.
///
/// `config` holds kind-specific keys (`basePath`, `host`, `bucket`, ...) as
/// plain strings; the adapter factory validates them when it builds the adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub id: Uuid,
    pub name: String,
    pub kind: StorageKind,
    pub enabled: bool,
    pub is_default: bool,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageConfig {
    /// A new enabled, non-default storage.
    pub fn new(
        name: impl Into<String>,
        kind: StorageKind,
        config: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            enabled: true,
            is_default: false,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Usable as the upload target for new files.
    pub fn is_active_default(&self) -> bool {
        self.enabled && self.is_default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_read_as_missing() {
        let mut config = BTreeMap::new();
        config.insert("basePath".to_string(), "  ".to_string());
        config.insert("publicUrl".to_string(), "https://cdn.example.com".to_string());
        let storage = StorageConfig::new("disk", StorageKind::Local, config);

        assert_eq!(storage.get("basePath"), None);
        assert_eq!(storage.get("publicUrl"), Some("https://cdn.example.com"));
        assert!(storage.enabled);
        assert!(!storage.is_active_default());
    }
}
