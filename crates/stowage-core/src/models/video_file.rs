use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the authoritative copy of a file lives.
///
/// A file is local when `storage_id` is `None`; `local_path` is then the copy
/// on disk. Otherwise `remote_path` is relative to that storage's base path,
/// and `local_path`, when set, is a copy still kept on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLocation {
    pub storage_id: Option<Uuid>,
    pub remote_path: Option<String>,
    pub local_path: Option<String>,
}

impl FileLocation {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            storage_id: None,
            remote_path: None,
            local_path: Some(path.into()),
        }
    }

    pub fn remote(storage_id: Uuid, remote_path: impl Into<String>) -> Self {
        Self {
            storage_id: Some(storage_id),
            remote_path: Some(remote_path.into()),
            local_path: None,
        }
    }

    /// Keep track of a copy on disk alongside the remote one.
    pub fn with_local_path(mut self, local_path: Option<String>) -> Self {
        self.local_path = local_path;
        self
    }

    pub fn is_local(&self) -> bool {
        self.storage_id.is_none()
    }

    pub fn is_remote(&self) -> bool {
        self.storage_id.is_some()
    }
}

/// One rendition of a video (an encoding profile such as `720p`) and its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    pub id: Uuid,
    pub video_id: Uuid,
    pub profile: Option<String>,
    pub location: FileLocation,
    pub file_size: Option<u64>,
}

impl VideoFile {
    pub fn new_local(video_id: Uuid, profile: Option<String>, local_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id,
            profile,
            location: FileLocation::local(local_path),
            file_size: None,
        }
    }

    /// Profile segment used in generated paths.
    pub fn profile_or_default(&self) -> &str {
        self.profile.as_deref().unwrap_or("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_remote_locations() {
        let local = FileLocation::local("public/media/a.mp4");
        assert!(local.is_local());

        let remote = FileLocation::remote(Uuid::new_v4(), "videos/1/720p/a.mp4");
        assert!(remote.is_remote());
        assert!(remote.local_path.is_none());

        let both = remote.with_local_path(Some("public/media/a.mp4".into()));
        assert!(both.is_remote());
        assert_eq!(both.local_path.as_deref(), Some("public/media/a.mp4"));
    }
}
