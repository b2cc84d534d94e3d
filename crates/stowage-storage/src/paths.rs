//! Remote path rules
//!
//! Remote paths are relative, slash-separated and at most 255 bytes. Generated
//! paths embed a unique token so a re-upload never overwrites an earlier copy.

use std::path::Path;
use stowage_core::VideoFile;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

pub const MAX_REMOTE_PATH_LEN: usize = 255;
const DEFAULT_EXTENSION: &str = "mp4";

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reject paths that could escape a base directory or break on some backend.
pub fn validate_remote_path(path: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidPath(format!("{}: {}", reason, path));

    if path.trim().is_empty() {
        return Err(invalid("Path is empty"));
    }
    if path.len() > MAX_REMOTE_PATH_LEN {
        return Err(invalid("Path is too long (max 255 characters)"));
    }
    let normalized = path.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(invalid("Path should not start with /"));
    }
    for pattern in ["..", "~", "//", "\0"] {
        if normalized.contains(pattern) {
            return Err(invalid("Path contains a forbidden sequence"));
        }
    }
    for segment in normalized.split('/') {
        let stem = segment.split('.').next().unwrap_or(segment);
        if RESERVED_DEVICE_NAMES
            .iter()
            .any(|name| name.eq_ignore_ascii_case(stem))
        {
            return Err(invalid("Path contains a reserved device name"));
        }
    }
    Ok(())
}

fn extension_of(path: Option<&str>) -> String {
    path.and_then(|p| Path::new(p).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_EXTENSION)
        .to_string()
}

fn unique_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// `videos/{video_id}/{profile}/video_{unique}.{ext}`
pub fn generate_remote_path(file: &VideoFile) -> String {
    let source = file
        .location
        .local_path
        .as_deref()
        .or(file.location.remote_path.as_deref());
    format!(
        "videos/{}/{}/video_{}.{}",
        file.video_id,
        file.profile_or_default(),
        unique_token(),
        extension_of(source)
    )
}

/// `public/media/videos/{profile}/{video_id}_{unique}.{ext}`, relative to the media root.
pub fn generate_local_path(file: &VideoFile) -> String {
    let source = file
        .location
        .remote_path
        .as_deref()
        .or(file.location.local_path.as_deref());
    format!(
        "public/media/videos/{}/{}_{}.{}",
        file.profile_or_default(),
        file.video_id,
        unique_token(),
        extension_of(source)
    )
}
