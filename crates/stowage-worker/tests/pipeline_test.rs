//! Upload, migrate and clean up through the real worker pool and Local storages.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::memory::{
    InMemoryMigrationReportStore, InMemoryStorageRepository, InMemoryVideoFileRepository,
    RecordingNotifier,
};
use stowage_core::{
    MigrationStatus, StorageConfig, StorageKind, StorageRepository, UploadToStorage,
    VideoFile, VideoFileRepository,
};
use stowage_storage::{AdapterFactory, ManagerOptions, RetryPolicy, StorageManager, UrlSigner};
use stowage_worker::{
    InMemoryJobQueue, JobHandlerContext, JobWorker, MigrationPlanner, MigrationReports,
    StorageJobContext, WorkerConfig,
};
use tempfile::TempDir;
use uuid::Uuid;

async fn local_storage(
    repo: &InMemoryStorageRepository,
    root: &Path,
    name: &str,
    is_default: bool,
) -> StorageConfig {
    let base = root.join(name);
    std::fs::create_dir_all(&base).unwrap();
    let mut config = BTreeMap::new();
    config.insert("basePath".to_string(), base.display().to_string());
    let mut storage = StorageConfig::new(name, StorageKind::Local, config);
    storage.is_default = is_default;
    repo.save(&storage).await.unwrap();
    storage
}

/// Poll `check` until it holds or five seconds pass.
async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_then_migrate_between_storages() {
    let media_root = TempDir::new().unwrap();
    let root = media_root.path();

    let storages = Arc::new(InMemoryStorageRepository::new());
    let files = Arc::new(InMemoryVideoFileRepository::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let queue = InMemoryJobQueue::new(64);
    let reports = MigrationReports::new(Arc::new(InMemoryMigrationReportStore::new()));

    let primary = local_storage(&storages, root, "primary", true).await;
    let archive = local_storage(&storages, root, "archive", false).await;

    let factory = AdapterFactory::new(UrlSigner::new("integration-secret").unwrap(), root)
        .with_retry(RetryPolicy::immediate());
    let manager = Arc::new(StorageManager::new(
        storages.clone(),
        files.clone(),
        factory,
        ManagerOptions {
            media_root: root.to_path_buf(),
            ..ManagerOptions::default()
        },
    ));

    let ctx: Arc<dyn JobHandlerContext> = Arc::new(StorageJobContext {
        manager,
        storages: storages.clone(),
        files: files.clone(),
        notifier: notifier.clone(),
        publisher: Arc::new(queue.clone()),
        reports: reports.clone(),
        media_root: root.to_path_buf(),
    });
    let worker = JobWorker::new(
        Arc::new(queue.clone()),
        Arc::new(queue.clone()),
        WorkerConfig {
            max_workers: 2,
            poll_interval_ms: 20,
            max_attempts: 3,
            retry_delay_secs: 0,
        },
        Arc::downgrade(&ctx),
        Some(queue.wakeup()),
    );

    // Rendered files land in public/media and are queued for upload.
    let mut ids = Vec::new();
    for i in 0..3 {
        let name = format!("clip_{}.mp4", i);
        std::fs::create_dir_all(root.join("public/media")).unwrap();
        std::fs::write(root.join("public/media").join(&name), format!("clip {}", i)).unwrap();
        let file = VideoFile::new_local(
            Uuid::new_v4(),
            Some("1080p".into()),
            format!("public/media/{}", name),
        );
        files.save(&file).await.unwrap();
        worker.submit(UploadToStorage::new(file.id, name).into()).await.unwrap();
        ids.push(file.id);
    }

    let primary_id = primary.id;
    wait_for("uploads", || {
        let files = files.clone();
        let ids = ids.clone();
        async move {
            for id in ids {
                let file = files.find(id).await.unwrap().unwrap();
                if file.location.storage_id != Some(primary_id) {
                    return false;
                }
            }
            true
        }
    })
    .await;

    let mut uploaded = Vec::new();
    for id in &ids {
        let file = files.find(*id).await.unwrap().unwrap();
        uploaded.push(file.location.remote_path.unwrap());
    }
    for path in &uploaded {
        assert!(root.join("primary").join(path).exists());
    }

    let planner = MigrationPlanner::new(
        storages.clone(),
        files.clone(),
        Arc::new(queue.clone()),
        reports.clone(),
    );
    let plan = planner
        .start_migration(Some(primary.id), Some(archive.id))
        .await
        .unwrap();
    assert_eq!(plan.queued_count, 3);

    wait_for("migration report", || {
        let reports = reports.clone();
        let id = plan.migration_id.clone();
        async move {
            reports
                .report(&id)
                .await
                .unwrap()
                .map(|r| r.status == MigrationStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;
    wait_for("cleanup", || {
        let queue = queue.clone();
        async move { queue.is_empty().await }
    })
    .await;

    let report = reports.report(&plan.migration_id).await.unwrap().unwrap();
    assert_eq!(report.success_count(), 3);
    assert_eq!(report.failure_count(), 0);

    for (id, old_path) in ids.iter().zip(&uploaded) {
        let file = files.find(*id).await.unwrap().unwrap();
        assert_eq!(file.location.storage_id, Some(archive.id));
        assert!(root.join("archive").join(file.location.remote_path.unwrap()).exists());
        assert!(!root.join("primary").join(old_path).exists());
    }
    assert!(notifier.sent().await.is_empty());
    assert!(files.failed_videos().await.is_empty());

    worker.shutdown().await;
    drop(ctx);
}
