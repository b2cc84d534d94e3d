//! Shared fixture for handler tests: in-memory collaborators and Local storages
//! under a temporary media root.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use stowage_core::memory::{
    InMemoryMigrationReportStore, InMemoryStorageRepository, InMemoryVideoFileRepository,
    RecordingNotifier,
};
use stowage_core::{
    ClaimedJob, JobSource, StorageConfig, StorageKind, StorageRepository, VideoFile,
    VideoFileRepository,
};
use stowage_storage::{AdapterFactory, ManagerOptions, RetryPolicy, StorageManager, UrlSigner};
use tempfile::TempDir;
use uuid::Uuid;

use crate::context::{JobHandlerContext, StorageJobContext};
use crate::memory_queue::InMemoryJobQueue;
use crate::queue::{JobOutcome, JobWorker, WorkerConfig};
use crate::reports::MigrationReports;

pub struct Harness {
    pub media_root: TempDir,
    pub storages: Arc<InMemoryStorageRepository>,
    pub files: Arc<InMemoryVideoFileRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub queue: InMemoryJobQueue,
    pub reports: MigrationReports,
    pub ctx: Arc<StorageJobContext>,
}

impl Harness {
    pub fn new() -> Self {
        let media_root = TempDir::new().unwrap();
        let storages = Arc::new(InMemoryStorageRepository::new());
        let files = Arc::new(InMemoryVideoFileRepository::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let queue = InMemoryJobQueue::new(256);
        let reports = MigrationReports::new(Arc::new(InMemoryMigrationReportStore::new()));

        let factory = AdapterFactory::new(UrlSigner::new("test-secret").unwrap(), media_root.path())
            .with_retry(RetryPolicy::immediate());
        let manager = Arc::new(StorageManager::new(
            storages.clone(),
            files.clone(),
            factory,
            ManagerOptions {
                media_root: media_root.path().to_path_buf(),
                ..ManagerOptions::default()
            },
        ));

        let ctx = Arc::new(StorageJobContext {
            manager,
            storages: storages.clone(),
            files: files.clone(),
            notifier: notifier.clone(),
            publisher: Arc::new(queue.clone()),
            reports: reports.clone(),
            media_root: media_root.path().to_path_buf(),
        });

        Self {
            media_root,
            storages,
            files,
            notifier,
            queue,
            reports,
            ctx,
        }
    }

    /// A Local storage rooted at `{media_root}/{name}`.
    pub async fn local_storage(&self, name: &str, is_default: bool) -> StorageConfig {
        let base = self.media_root.path().join(name);
        std::fs::create_dir_all(&base).unwrap();
        let mut config = BTreeMap::new();
        config.insert("basePath".to_string(), base.display().to_string());
        let mut storage = StorageConfig::new(name, StorageKind::Local, config);
        storage.is_default = is_default;
        self.storages.save(&storage).await.unwrap();
        storage
    }

    /// A local video file written to `{media_root}/public/media/{name}`.
    pub async fn media_file(&self, name: &str, contents: &[u8]) -> VideoFile {
        let relative = format!("public/media/{}", name);
        let absolute = self.media_root.path().join(&relative);
        std::fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        std::fs::write(&absolute, contents).unwrap();
        let file = VideoFile::new_local(Uuid::new_v4(), Some("720p".into()), relative);
        self.files.save(&file).await.unwrap();
        file
    }

    pub fn stored_path(&self, storage: &StorageConfig, remote_path: &str) -> std::path::PathBuf {
        self.media_root.path().join(&storage.name).join(remote_path)
    }

    /// Claim and process every visible job until the queue has nothing ready.
    pub async fn drain(&self, config: &WorkerConfig) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(claimed) = self.queue.claim_next().await.unwrap() {
            outcomes.push(self.process(claimed, config).await);
        }
        outcomes
    }

    pub async fn process(&self, claimed: ClaimedJob, config: &WorkerConfig) -> JobOutcome {
        let dyn_ctx: Arc<dyn JobHandlerContext> = self.ctx.clone();
        let weak: Weak<dyn JobHandlerContext> = Arc::downgrade(&dyn_ctx);
        JobWorker::process_job(
            claimed,
            Arc::new(self.queue.clone()),
            Arc::new(self.queue.clone()),
            config,
            weak,
        )
        .await
        .unwrap()
    }
}

/// Worker settings with a single attempt and no delay.
pub fn single_attempt() -> WorkerConfig {
    WorkerConfig {
        max_attempts: 1,
        retry_delay_secs: 0,
        ..WorkerConfig::default()
    }
}
