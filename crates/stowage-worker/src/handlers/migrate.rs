//! Move a file to another storage, or back to local disk.
//!
//! The stale copy is removed only after the new location is verified and
//! persisted: a remote copy through a `DeleteFromStorage` job, a local copy
//! directly unless the new location still tracks it.

use anyhow::anyhow;
use stowage_core::{DeleteFromStorage, FileLocation, MigrateFile, TaskError, TaskResultExt};
use stowage_storage::StorageError;

use crate::context::StorageJobContext;

#[tracing::instrument(skip(ctx, message), fields(
    video_file_id = %message.video_file_id(),
    destination_storage_id = ?message.destination_storage_id(),
    migration_id = ?message.migration_id(),
    attempt = message.attempt(),
))]
pub async fn handle(ctx: &StorageJobContext, message: &MigrateFile) -> Result<(), TaskError> {
    let file = ctx
        .files
        .find(message.video_file_id())
        .await
        .map_err(TaskError::recoverable)?
        .ok_or_else(|| anyhow!("Video file {} not found", message.video_file_id()))
        .unrecoverable()?;

    let destination = match message.destination_storage_id() {
        None => None,
        Some(id) => {
            let storage = ctx
                .storages
                .find(id)
                .await
                .map_err(TaskError::recoverable)?
                .ok_or_else(|| anyhow!("Destination storage {} not found", id))
                .unrecoverable()?;
            if !storage.enabled {
                return Err(TaskError::unrecoverable(anyhow!(
                    "Cannot migrate to disabled storage \"{}\"",
                    storage.name
                )));
            }
            Some(storage)
        }
    };

    tracing::info!(
        source_storage_id = ?file.location.storage_id,
        destination_type = if destination.is_none() { "local" } else { "remote" },
        "Starting file migration"
    );

    let outcome = ctx
        .manager
        .migrate_file(&file, destination.as_ref())
        .await
        .map_err(|e| match e {
            StorageError::Disabled(_) | StorageError::Config(_) => TaskError::unrecoverable(e),
            other => TaskError::recoverable(other),
        })?;

    if let Some(previous) = &outcome.previous {
        remove_previous_copy(ctx, previous, &outcome.location).await;
    }

    if let Some(migration_id) = message.migration_id() {
        if let Err(e) = ctx.reports.record_success(migration_id, file.id).await {
            tracing::error!(migration_id = %migration_id, error = %e, "Failed to record migration success");
        }
    }

    tracing::info!(
        new_storage_id = ?outcome.location.storage_id,
        new_remote_path = ?outcome.location.remote_path,
        new_local_path = ?outcome.location.local_path,
        "File migrated successfully"
    );
    Ok(())
}

async fn remove_previous_copy(ctx: &StorageJobContext, previous: &FileLocation, current: &FileLocation) {
    if let (Some(storage_id), Some(remote_path)) = (previous.storage_id, previous.remote_path.as_deref()) {
        let job = DeleteFromStorage::new(storage_id, remote_path);
        if let Err(e) = ctx.publisher.publish(job.into()).await {
            tracing::error!(
                storage_id = %storage_id,
                remote_path = %remote_path,
                error = %e,
                "Failed to queue deletion of migrated file, manual cleanup required"
            );
        }
    }

    let Some(local_path) = previous.local_path.as_deref() else {
        return;
    };
    if current.local_path.as_deref() == Some(local_path) {
        return;
    }
    let path = ctx.manager.resolve_local_path(local_path);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!(local_path = %path.display(), "Local copy removed after migration"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            local_path = %path.display(),
            error = %e,
            "Failed to remove local copy after migration"
        ),
    }
}

/// Record the failure in the migration report; the rest of the batch continues.
pub async fn escalate(ctx: &StorageJobContext, message: &MigrateFile, error: &anyhow::Error) {
    tracing::error!(
        video_file_id = %message.video_file_id(),
        destination_storage_id = ?message.destination_storage_id(),
        migration_id = ?message.migration_id(),
        error = %error,
        "All migration attempts failed"
    );

    if let Some(migration_id) = message.migration_id() {
        if let Err(e) = ctx
            .reports
            .record_failure(migration_id, message.video_file_id(), &error.to_string())
            .await
        {
            tracing::error!(migration_id = %migration_id, error = %e, "Failed to record migration failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::MigrationPlanner;
    use crate::test_support::{single_attempt, Harness};
    use stowage_core::{Job, MigrationStatus, VideoFileRepository};

    #[tokio::test]
    async fn local_to_remote_removes_local_copy() {
        let h = Harness::new();
        let archive = h.local_storage("archive", false).await;
        let file = h.media_file("a.mp4", b"payload").await;
        let local = h.media_root.path().join("public/media/a.mp4");

        handle(&h.ctx, &MigrateFile::new(file.id, Some(archive.id)))
            .await
            .unwrap();

        let moved = h.files.find(file.id).await.unwrap().unwrap();
        assert_eq!(moved.location.storage_id, Some(archive.id));
        let remote_path = moved.location.remote_path.unwrap();
        assert!(h.stored_path(&archive, &remote_path).exists());
        assert!(!local.exists());
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn remote_to_remote_queues_deletion_of_previous_copy() {
        let h = Harness::new();
        let first = h.local_storage("first", false).await;
        let second = h.local_storage("second", false).await;
        let file = h.media_file("a.mp4", b"payload").await;

        handle(&h.ctx, &MigrateFile::new(file.id, Some(first.id)))
            .await
            .unwrap();
        let old_path = h
            .files
            .find(file.id)
            .await
            .unwrap()
            .unwrap()
            .location
            .remote_path
            .unwrap();

        handle(&h.ctx, &MigrateFile::new(file.id, Some(second.id)))
            .await
            .unwrap();

        let pending = h.queue.snapshot().await;
        assert_eq!(pending.len(), 1);
        match &pending[0].0 {
            Job::DeleteFromStorage(m) => {
                assert_eq!(m.storage_id(), first.id);
                assert_eq!(m.remote_path(), old_path);
            }
            other => panic!("unexpected job {}", other),
        }

        h.drain(&single_attempt()).await;
        assert!(!h.stored_path(&first, &old_path).exists());
        let moved = h.files.find(file.id).await.unwrap().unwrap();
        assert_eq!(moved.location.storage_id, Some(second.id));
    }

    #[tokio::test]
    async fn remote_back_to_local() {
        let h = Harness::new();
        let archive = h.local_storage("archive", false).await;
        let file = h.media_file("a.mp4", b"payload").await;
        handle(&h.ctx, &MigrateFile::new(file.id, Some(archive.id)))
            .await
            .unwrap();

        handle(&h.ctx, &MigrateFile::new(file.id, None)).await.unwrap();

        let back = h.files.find(file.id).await.unwrap().unwrap();
        assert!(back.location.is_local());
        let local_path = back.location.local_path.unwrap();
        assert!(local_path.starts_with("public/media/videos/720p/"));
        assert_eq!(
            std::fs::read(h.media_root.path().join(&local_path)).unwrap(),
            b"payload"
        );
    }

    #[tokio::test]
    async fn uploaded_file_keeps_its_local_copy_across_storages() {
        let h = Harness::new();
        let primary = h.local_storage("primary", true).await;
        let archive = h.local_storage("archive", false).await;
        let file = h.media_file("a.mp4", b"payload").await;
        let local = h.media_root.path().join("public/media/a.mp4");
        crate::handlers::upload::handle(&h.ctx, &stowage_core::UploadToStorage::new(file.id, "a.mp4"))
            .await
            .unwrap();

        handle(&h.ctx, &MigrateFile::new(file.id, Some(archive.id)))
            .await
            .unwrap();

        let moved = h.files.find(file.id).await.unwrap().unwrap();
        assert_eq!(moved.location.storage_id, Some(archive.id));
        assert_eq!(moved.location.local_path.as_deref(), Some("public/media/a.mp4"));
        assert!(local.exists());
        let pending = h.queue.snapshot().await;
        assert!(matches!(&pending[..], [(Job::DeleteFromStorage(m), _)] if m.storage_id() == primary.id));
    }

    #[tokio::test]
    async fn migrating_back_to_local_replaces_tracked_copy() {
        let h = Harness::new();
        h.local_storage("primary", true).await;
        let file = h.media_file("a.mp4", b"payload").await;
        let old_local = h.media_root.path().join("public/media/a.mp4");
        crate::handlers::upload::handle(&h.ctx, &stowage_core::UploadToStorage::new(file.id, "a.mp4"))
            .await
            .unwrap();

        handle(&h.ctx, &MigrateFile::new(file.id, None)).await.unwrap();

        let back = h.files.find(file.id).await.unwrap().unwrap();
        assert!(back.location.is_local());
        let new_local = back.location.local_path.unwrap();
        assert_ne!(new_local, "public/media/a.mp4");
        assert!(h.media_root.path().join(&new_local).exists());
        assert!(!old_local.exists());
    }

    #[tokio::test]
    async fn disabled_destination_is_unrecoverable() {
        let h = Harness::new();
        let mut archive = h.local_storage("archive", false).await;
        archive.enabled = false;
        stowage_core::StorageRepository::save(h.storages.as_ref(), &archive)
            .await
            .unwrap();
        let file = h.media_file("a.mp4", b"payload").await;

        let err = handle(&h.ctx, &MigrateFile::new(file.id, Some(archive.id)))
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn unknown_file_is_unrecoverable() {
        let h = Harness::new();
        let err = handle(&h.ctx, &MigrateFile::new(uuid::Uuid::new_v4(), None))
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn batch_with_failures_reports_each_outcome() {
        let h = Harness::new();
        let archive = h.local_storage("archive", false).await;
        let mut broken = Vec::new();
        for i in 0..5 {
            let file = h.media_file(&format!("{}.mp4", i), b"payload").await;
            if i % 2 == 1 {
                std::fs::remove_file(h.media_root.path().join(format!("public/media/{}.mp4", i)))
                    .unwrap();
                broken.push(file.id);
            }
        }

        let planner = MigrationPlanner::new(
            h.storages.clone(),
            h.files.clone(),
            std::sync::Arc::new(h.queue.clone()),
            h.reports.clone(),
        );
        let plan = planner.start_migration(None, Some(archive.id)).await.unwrap();
        assert_eq!(plan.queued_count, 5);

        let outcomes = h.drain(&single_attempt()).await;
        assert_eq!(outcomes.len(), 5);

        let report = h.reports.report(&plan.migration_id).await.unwrap().unwrap();
        assert_eq!(report.success_count(), 3);
        assert_eq!(report.failure_count(), 2);
        assert_eq!(report.status, MigrationStatus::Completed);
        let mut failed: Vec<_> = report.failures.iter().map(|f| f.video_file_id).collect();
        failed.sort();
        broken.sort();
        assert_eq!(failed, broken);
    }
}
