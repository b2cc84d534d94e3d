//! In-process implementations of the collaborator traits
//!
//! Used by single-process deployments without `DATABASE_URL` and by tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FileLocation, MigrationReport, StorageConfig, VideoFile};
use crate::repository::{
    FailureNotifier, MigrationReportStore, StorageRepository, VideoFileRepository,
};

#[derive(Clone, Default)]
pub struct InMemoryStorageRepository {
    storages: Arc<RwLock<HashMap<Uuid, StorageConfig>>>,
}

impl InMemoryStorageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageRepository for InMemoryStorageRepository {
    async fn find(&self, id: Uuid) -> Result<Option<StorageConfig>, AppError> {
        Ok(self.storages.read().await.get(&id).cloned())
    }

    async fn find_default(&self) -> Result<Option<StorageConfig>, AppError> {
        Ok(self
            .storages
            .read()
            .await
            .values()
            .find(|s| s.is_active_default())
            .cloned())
    }

    async fn list(&self) -> Result<Vec<StorageConfig>, AppError> {
        let mut all: Vec<_> = self.storages.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn save(&self, storage: &StorageConfig) -> Result<(), AppError> {
        let mut storages = self.storages.write().await;
        if storage.is_default {
            for other in storages.values_mut().filter(|s| s.id != storage.id) {
                other.is_default = false;
            }
        }
        storages.insert(storage.id, storage.clone());
        Ok(())
    }

    async fn set_default(&self, id: Uuid) -> Result<(), AppError> {
        let mut storages = self.storages.write().await;
        if !storages.contains_key(&id) {
            return Err(AppError::NotFound(format!("Storage {} not found", id)));
        }
        let now = Utc::now();
        for storage in storages.values_mut() {
            let is_target = storage.id == id;
            if storage.is_default != is_target {
                storage.is_default = is_target;
                storage.updated_at = now;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryVideoFileRepository {
    files: Arc<RwLock<HashMap<Uuid, VideoFile>>>,
    failed_videos: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl InMemoryVideoFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Videos flagged through `mark_video_failed`, with the recorded reason.
    pub async fn failed_videos(&self) -> HashMap<Uuid, String> {
        self.failed_videos.read().await.clone()
    }
}

#[async_trait]
impl VideoFileRepository for InMemoryVideoFileRepository {
    async fn find(&self, id: Uuid) -> Result<Option<VideoFile>, AppError> {
        Ok(self.files.read().await.get(&id).cloned())
    }

    async fn save(&self, file: &VideoFile) -> Result<(), AppError> {
        self.files.write().await.insert(file.id, file.clone());
        Ok(())
    }

    async fn list_by_storage(&self, storage_id: Option<Uuid>) -> Result<Vec<VideoFile>, AppError> {
        let mut files: Vec<VideoFile> = self
            .files
            .read()
            .await
            .values()
            .filter(|f| f.location.storage_id == storage_id)
            .cloned()
            .collect();
        files.sort_by_key(|f| f.id);
        Ok(files)
    }

    async fn update_location(
        &self,
        id: Uuid,
        location: &FileLocation,
        file_size: Option<u64>,
    ) -> Result<(), AppError> {
        let mut files = self.files.write().await;
        let file = files
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Video file {} not found", id)))?;
        file.location = location.clone();
        if file_size.is_some() {
            file.file_size = file_size;
        }
        Ok(())
    }

    async fn mark_video_failed(&self, video_id: Uuid, reason: &str) -> Result<(), AppError> {
        self.failed_videos
            .write()
            .await
            .insert(video_id, reason.to_string());
        Ok(())
    }
}

/// Notifier that only writes a log line.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl FailureNotifier for LogNotifier {
    async fn notify_failed(&self, video_id: Uuid, reason: &str) -> Result<(), AppError> {
        tracing::warn!(video_id = %video_id, reason = %reason, "Video processing failed");
        Ok(())
    }
}

/// Notifier that keeps every notification for later inspection.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<(Uuid, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(Uuid, String)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn notify_failed(&self, video_id: Uuid, reason: &str) -> Result<(), AppError> {
        self.sent.write().await.push((video_id, reason.to_string()));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMigrationReportStore {
    reports: Arc<RwLock<HashMap<String, MigrationReport>>>,
}

impl InMemoryMigrationReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationReportStore for InMemoryMigrationReportStore {
    async fn create(&self, report: &MigrationReport) -> Result<(), AppError> {
        self.reports
            .write()
            .await
            .insert(report.id.clone(), report.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MigrationReport>, AppError> {
        Ok(self.reports.read().await.get(id).cloned())
    }

    async fn record_success(
        &self,
        id: &str,
        video_file_id: Uuid,
    ) -> Result<Option<MigrationReport>, AppError> {
        let mut reports = self.reports.write().await;
        Ok(reports.get_mut(id).map(|report| {
            report.record_success(video_file_id);
            report.clone()
        }))
    }

    async fn record_failure(
        &self,
        id: &str,
        video_file_id: Uuid,
        error: &str,
    ) -> Result<Option<MigrationReport>, AppError> {
        let mut reports = self.reports.write().await;
        Ok(reports.get_mut(id).map(|report| {
            report.record_failure(video_file_id, error);
            report.clone()
        }))
    }

    async fn list(&self) -> Result<Vec<MigrationReport>, AppError> {
        let mut all: Vec<_> = self.reports.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.reports.write().await.remove(id).is_some())
    }
}
