//! Copy a freshly produced local file to the default storage.

use anyhow::anyhow;
use std::path::{Path, PathBuf};
use stowage_core::{FileLocation, TaskError, UploadToStorage};
use stowage_storage::generate_remote_path;

use crate::context::StorageJobContext;

/// Absolute paths are used as is; relative ones live under `{media_root}/public/media/`.
pub fn resolve_upload_path(media_root: &Path, local_path: &str) -> PathBuf {
    let path = Path::new(local_path);
    if path.is_absolute() || path.starts_with(media_root) {
        path.to_path_buf()
    } else {
        media_root.join("public").join("media").join(local_path)
    }
}

#[tracing::instrument(skip(ctx, message), fields(video_file_id = %message.video_file_id(), attempt = message.attempt()))]
pub async fn handle(ctx: &StorageJobContext, message: &UploadToStorage) -> Result<(), TaskError> {
    let Some(file) = ctx
        .files
        .find(message.video_file_id())
        .await
        .map_err(TaskError::recoverable)?
    else {
        tracing::warn!("Video file not found for upload");
        return Ok(());
    };

    let local_path = resolve_upload_path(&ctx.media_root, message.local_path());
    if tokio::fs::metadata(&local_path).await.is_err() {
        tracing::error!(local_path = %local_path.display(), "Local file not found for upload");
        return Err(TaskError::unrecoverable(anyhow!(
            "Local file not found: {}",
            message.local_path()
        )));
    }

    tracing::info!(local_path = %message.local_path(), "Starting upload to storage");

    let Some(storage) = ctx
        .manager
        .default_storage()
        .await
        .map_err(TaskError::recoverable)?
    else {
        tracing::info!("No default storage configured, skipping upload");
        return Ok(());
    };

    let remote_path = generate_remote_path(&file);
    let result = ctx
        .manager
        .upload_file(&local_path, &remote_path, Some(&storage))
        .await;
    if !result.success {
        return Err(TaskError::recoverable(anyhow!("{}", result.error())));
    }

    let location = FileLocation::remote(storage.id, result.remote_path.unwrap_or(remote_path))
        .with_local_path(file.location.local_path.clone());
    ctx.files
        .update_location(file.id, &location, result.file_size)
        .await
        .map_err(TaskError::recoverable)?;

    tracing::info!(
        storage_id = %storage.id,
        remote_path = ?location.remote_path,
        "File uploaded successfully to storage"
    );
    Ok(())
}

/// Mark the owning video failed and notify once.
pub async fn escalate(ctx: &StorageJobContext, message: &UploadToStorage, error: &anyhow::Error) {
    tracing::error!(
        video_file_id = %message.video_file_id(),
        attempt = message.attempt(),
        error = %error,
        "All upload attempts failed"
    );

    let file = match ctx.files.find(message.video_file_id()).await {
        Ok(Some(file)) => file,
        Ok(None) => return,
        Err(e) => {
            tracing::error!(video_file_id = %message.video_file_id(), error = %e, "Failed to load video file for escalation");
            return;
        }
    };

    let reason = format!("Storage upload failed: {}", error);
    if let Err(e) = ctx.files.mark_video_failed(file.video_id, &reason).await {
        tracing::error!(video_id = %file.video_id, error = %e, "Failed to mark video as failed");
    }
    if let Err(e) = ctx.notifier.notify_failed(file.video_id, &reason).await {
        tracing::error!(video_id = %file.video_id, error = %e, "Failed to send failure notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobOutcome, WorkerConfig};
    use crate::test_support::Harness;
    use stowage_core::{JobPublisher, VideoFileRepository};

    #[test]
    fn relative_paths_resolve_under_public_media() {
        let root = Path::new("/srv/app");
        assert_eq!(
            resolve_upload_path(root, "videos/720p/a.mp4"),
            PathBuf::from("/srv/app/public/media/videos/720p/a.mp4")
        );
        assert_eq!(resolve_upload_path(root, "/tmp/a.mp4"), PathBuf::from("/tmp/a.mp4"));
    }

    #[tokio::test]
    async fn uploads_to_default_storage_and_records_location() {
        let h = Harness::new();
        let storage = h.local_storage("primary", true).await;
        let file = h.media_file("a.mp4", b"video bytes").await;

        handle(&h.ctx, &UploadToStorage::new(file.id, "a.mp4")).await.unwrap();

        let stored = h.files.find(file.id).await.unwrap().unwrap();
        assert_eq!(stored.location.storage_id, Some(storage.id));
        assert_eq!(stored.file_size, Some(11));
        let remote_path = stored.location.remote_path.unwrap();
        assert!(remote_path.starts_with(&format!("videos/{}/720p/", file.video_id)));
        assert!(h.stored_path(&storage, &remote_path).exists());
    }

    #[tokio::test]
    async fn upload_keeps_track_of_local_copy() {
        let h = Harness::new();
        h.local_storage("primary", true).await;
        let file = h.media_file("a.mp4", b"video bytes").await;

        handle(&h.ctx, &UploadToStorage::new(file.id, "a.mp4")).await.unwrap();

        let stored = h.files.find(file.id).await.unwrap().unwrap();
        assert!(stored.location.is_remote());
        assert_eq!(stored.location.local_path.as_deref(), Some("public/media/a.mp4"));
        assert!(h.media_root.path().join("public/media/a.mp4").exists());
    }

    #[tokio::test]
    async fn missing_local_file_is_unrecoverable() {
        let h = Harness::new();
        h.local_storage("primary", true).await;
        let file = h.media_file("a.mp4", b"x").await;

        let err = handle(&h.ctx, &UploadToStorage::new(file.id, "gone.mp4"))
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("Local file not found"));
    }

    #[tokio::test]
    async fn skips_without_default_storage() {
        let h = Harness::new();
        h.local_storage("secondary", false).await;
        let file = h.media_file("a.mp4", b"x").await;

        handle(&h.ctx, &UploadToStorage::new(file.id, "a.mp4")).await.unwrap();

        let stored = h.files.find(file.id).await.unwrap().unwrap();
        assert!(stored.location.is_local());
    }

    #[tokio::test]
    async fn last_failed_attempt_marks_video_failed_and_notifies_once() {
        let h = Harness::new();
        let storage = h.local_storage("primary", true).await;
        std::fs::remove_dir_all(h.media_root.path().join(&storage.name)).unwrap();
        let file = h.media_file("a.mp4", b"x").await;

        h.queue
            .publish(UploadToStorage::new(file.id, "a.mp4").with_attempt(3).into())
            .await
            .unwrap();
        let outcomes = h.drain(&WorkerConfig::default()).await;

        assert_eq!(outcomes, vec![JobOutcome::Escalated]);
        assert!(h.queue.is_empty().await);
        let failed = h.files.failed_videos().await;
        assert!(failed[&file.video_id].starts_with("Storage upload failed"));
        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, file.video_id);
    }

    #[tokio::test]
    async fn earlier_failed_attempt_is_retried() {
        let h = Harness::new();
        let storage = h.local_storage("primary", true).await;
        std::fs::remove_dir_all(h.media_root.path().join(&storage.name)).unwrap();
        let file = h.media_file("a.mp4", b"x").await;

        h.queue
            .publish(UploadToStorage::new(file.id, "a.mp4").into())
            .await
            .unwrap();
        let outcomes = h.drain(&WorkerConfig::default()).await;

        assert_eq!(outcomes, vec![JobOutcome::Retried]);
        assert!(h.notifier.sent().await.is_empty());
        let pending = h.queue.snapshot().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.attempt(), 2);
    }

    #[tokio::test]
    async fn missing_local_file_escalates_on_first_attempt() {
        let h = Harness::new();
        h.local_storage("primary", true).await;
        let file = h.media_file("a.mp4", b"x").await;

        h.queue
            .publish(UploadToStorage::new(file.id, "missing.mp4").into())
            .await
            .unwrap();
        let outcomes = h.drain(&WorkerConfig::default()).await;

        assert_eq!(outcomes, vec![JobOutcome::Escalated]);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.notifier.sent().await.len(), 1);
    }
}
