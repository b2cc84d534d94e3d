use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Copy a locally produced file to the default storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadToStorage {
    video_file_id: Uuid,
    local_path: String,
    attempt: u32,
}

impl UploadToStorage {
    pub fn new(video_file_id: Uuid, local_path: impl Into<String>) -> Self {
        Self {
            video_file_id,
            local_path: local_path.into(),
            attempt: 1,
        }
    }

    /// Same message at a given attempt number (clamped to at least 1).
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn video_file_id(&self) -> Uuid {
        self.video_file_id
    }

    pub fn local_path(&self) -> &str {
        &self.local_path
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Move a file to another storage. `None` as destination means back to local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateFile {
    video_file_id: Uuid,
    destination_storage_id: Option<Uuid>,
    attempt: u32,
    migration_id: Option<String>,
}

impl MigrateFile {
    pub fn new(video_file_id: Uuid, destination_storage_id: Option<Uuid>) -> Self {
        Self {
            video_file_id,
            destination_storage_id,
            attempt: 1,
            migration_id: None,
        }
    }

    pub fn in_migration(mut self, migration_id: impl Into<String>) -> Self {
        self.migration_id = Some(migration_id.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn video_file_id(&self) -> Uuid {
        self.video_file_id
    }

    pub fn destination_storage_id(&self) -> Option<Uuid> {
        self.destination_storage_id
    }

    pub fn migration_id(&self) -> Option<&str> {
        self.migration_id.as_deref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Remove a file from a remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFromStorage {
    storage_id: Uuid,
    remote_path: String,
    attempt: u32,
}

impl DeleteFromStorage {
    pub fn new(storage_id: Uuid, remote_path: impl Into<String>) -> Self {
        Self {
            storage_id,
            remote_path: remote_path.into(),
            attempt: 1,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn storage_id(&self) -> Uuid {
        self.storage_id
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Queue payload. Serialized with a `type` tag so the database row stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    UploadToStorage(UploadToStorage),
    MigrateFile(MigrateFile),
    DeleteFromStorage(DeleteFromStorage),
}

impl Job {
    pub fn attempt(&self) -> u32 {
        match self {
            Job::UploadToStorage(m) => m.attempt(),
            Job::MigrateFile(m) => m.attempt(),
            Job::DeleteFromStorage(m) => m.attempt(),
        }
    }

    pub fn retry(&self) -> Job {
        match self {
            Job::UploadToStorage(m) => Job::UploadToStorage(m.retry()),
            Job::MigrateFile(m) => Job::MigrateFile(m.retry()),
            Job::DeleteFromStorage(m) => Job::DeleteFromStorage(m.retry()),
        }
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Job::UploadToStorage(_) => write!(f, "upload_to_storage"),
            Job::MigrateFile(_) => write!(f, "migrate_file"),
            Job::DeleteFromStorage(_) => write!(f, "delete_from_storage"),
        }
    }
}

impl From<UploadToStorage> for Job {
    fn from(m: UploadToStorage) -> Self {
        Job::UploadToStorage(m)
    }
}

impl From<MigrateFile> for Job {
    fn from(m: MigrateFile) -> Self {
        Job::MigrateFile(m)
    }
}

impl From<DeleteFromStorage> for Job {
    fn from(m: DeleteFromStorage) -> Self {
        Job::DeleteFromStorage(m)
    }
}

/// A job handed to a worker, with the queue-assigned id used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job: Job,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_increments_attempt_and_keeps_identity() {
        let id = Uuid::new_v4();
        let dest = Some(Uuid::new_v4());
        let first = MigrateFile::new(id, dest).in_migration("migration_abc");
        let second = first.retry();

        assert_eq!(first.attempt(), 1);
        assert_eq!(second.attempt(), 2);
        assert_eq!(second.video_file_id(), id);
        assert_eq!(second.destination_storage_id(), dest);
        assert_eq!(second.migration_id(), Some("migration_abc"));
    }

    #[test]
    fn attempt_is_never_zero() {
        let msg = DeleteFromStorage::new(Uuid::new_v4(), "videos/1/a.mp4").with_attempt(0);
        assert_eq!(msg.attempt(), 1);
    }

    #[test]
    fn job_serializes_with_type_tag() {
        let job: Job = UploadToStorage::new(Uuid::nil(), "/tmp/a.mp4").into();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "upload_to_storage");
        assert_eq!(value["localPath"], "/tmp/a.mp4");
        assert_eq!(value["attempt"], 1);

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
        assert_eq!(back.retry().attempt(), 2);
    }
}
