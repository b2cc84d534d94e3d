//! Helpers for the `stowage` operator binary.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use stowage_core::{StorageConfig, StorageKind};
use uuid::Uuid;

/// A storage described in a JSON file, before it has an id.
///
/// ```json
/// { "name": "cdn", "kind": "s3", "config": { "bucket": "media", "region": "eu-west-1" } }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub name: String,
    pub kind: StorageKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

impl StorageSpec {
    pub fn into_storage_config(self) -> StorageConfig {
        let mut storage = StorageConfig::new(self.name, self.kind, self.config);
        storage.enabled = self.enabled;
        storage
    }
}

pub fn load_storage_spec(path: &Path) -> Result<StorageConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Read storage config {}", path.display()))?;
    let spec: StorageSpec = serde_json::from_str(&raw)
        .with_context(|| format!("Parse storage config {}", path.display()))?;
    Ok(spec.into_storage_config())
}

/// `local` (any case) means local disk; anything else must be a storage id.
pub fn parse_storage_ref(value: &str) -> Result<Option<Uuid>> {
    if value.eq_ignore_ascii_case("local") {
        return Ok(None);
    }
    let id = Uuid::parse_str(value)
        .with_context(|| format!("Expected a storage id or \"local\", got \"{}\"", value))?;
    Ok(Some(id))
}

/// Human readable byte count (`1.5 GB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
