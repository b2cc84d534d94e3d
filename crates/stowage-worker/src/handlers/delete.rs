//! Remove a file from a remote storage.

use anyhow::anyhow;
use stowage_core::{DeleteFromStorage, TaskError};

use crate::context::StorageJobContext;

#[tracing::instrument(skip(ctx, message), fields(
    storage_id = %message.storage_id(),
    remote_path = %message.remote_path(),
    attempt = message.attempt(),
))]
pub async fn handle(ctx: &StorageJobContext, message: &DeleteFromStorage) -> Result<(), TaskError> {
    let Some(storage) = ctx
        .storages
        .find(message.storage_id())
        .await
        .map_err(TaskError::recoverable)?
    else {
        tracing::warn!("Storage not found for deletion");
        return Ok(());
    };

    tracing::info!(
        storage_name = %storage.name,
        storage_kind = %storage.kind,
        "Starting file deletion from storage"
    );

    if ctx.manager.delete_file(message.remote_path(), &storage).await {
        tracing::info!("File deleted successfully from storage");
        Ok(())
    } else {
        Err(TaskError::recoverable(anyhow!("Delete operation returned false")))
    }
}

/// Nothing left to try; leave a log line for manual cleanup.
pub async fn escalate(_ctx: &StorageJobContext, message: &DeleteFromStorage, error: &anyhow::Error) {
    tracing::error!(
        storage_id = %message.storage_id(),
        remote_path = %message.remote_path(),
        attempt = message.attempt(),
        error = %error,
        "All delete attempts failed, manual cleanup required"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use uuid::Uuid;

    #[tokio::test]
    async fn deletes_file_from_storage() {
        let h = Harness::new();
        let storage = h.local_storage("primary", false).await;
        let path = h.stored_path(&storage, "videos/1/720p/a.mp4");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();

        handle(&h.ctx, &DeleteFromStorage::new(storage.id, "videos/1/720p/a.mp4"))
            .await
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unknown_storage_is_skipped() {
        let h = Harness::new();
        handle(&h.ctx, &DeleteFromStorage::new(Uuid::new_v4(), "a.mp4"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_storage_is_retried() {
        let h = Harness::new();
        let storage = h.local_storage("primary", false).await;
        std::fs::remove_dir_all(h.media_root.path().join(&storage.name)).unwrap();

        let err = handle(&h.ctx, &DeleteFromStorage::new(storage.id, "a.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
