//! Batch migration planner
//!
//! Turns "move everything from storage A to storage B" into one report and one
//! `MigrateFile` job per file, all sharing the same migration id. `None` on
//! either side means local disk.

use serde::Serialize;
use std::sync::Arc;
use stowage_core::{AppError, JobPublisher, MigrateFile, StorageRepository, VideoFileRepository};
use uuid::Uuid;

use crate::reports::MigrationReports;

pub const LOCAL_STORAGE_NAME: &str = "Local storage";

/// What was queued by [`MigrationPlanner::start_migration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub migration_id: String,
    pub queued_count: u32,
    pub source_name: String,
    pub destination_name: String,
}

#[derive(Clone)]
pub struct MigrationPlanner {
    storages: Arc<dyn StorageRepository>,
    files: Arc<dyn VideoFileRepository>,
    publisher: Arc<dyn JobPublisher>,
    reports: MigrationReports,
}

impl MigrationPlanner {
    pub fn new(
        storages: Arc<dyn StorageRepository>,
        files: Arc<dyn VideoFileRepository>,
        publisher: Arc<dyn JobPublisher>,
        reports: MigrationReports,
    ) -> Self {
        Self {
            storages,
            files,
            publisher,
            reports,
        }
    }

    /// Queue a migration of every file on `source` to `destination`.
    ///
    /// Fails without queuing anything when both sides are the same, a storage is
    /// unknown, the destination is disabled or the source holds no files.
    #[tracing::instrument(skip(self), fields(source = ?source, destination = ?destination))]
    pub async fn start_migration(
        &self,
        source: Option<Uuid>,
        destination: Option<Uuid>,
    ) -> Result<MigrationPlan, AppError> {
        if source == destination {
            return Err(AppError::InvalidInput(
                "Source and destination must be different".to_string(),
            ));
        }

        let source_name = match source {
            None => LOCAL_STORAGE_NAME.to_string(),
            Some(id) => {
                self.storages
                    .find(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Source storage {} not found", id)))?
                    .name
            }
        };

        let destination_name = match destination {
            None => LOCAL_STORAGE_NAME.to_string(),
            Some(id) => {
                let storage = self.storages.find(id).await?.ok_or_else(|| {
                    AppError::NotFound(format!("Destination storage {} not found", id))
                })?;
                if !storage.enabled {
                    return Err(AppError::InvalidInput(format!(
                        "Destination storage \"{}\" is disabled",
                        storage.name
                    )));
                }
                storage.name
            }
        };

        let files = self.files.list_by_storage(source).await?;
        if files.is_empty() {
            return Err(AppError::InvalidInput("No files to migrate".to_string()));
        }
        let total = u32::try_from(files.len())
            .map_err(|_| AppError::InvalidInput("Too many files for one migration".to_string()))?;

        let migration_id = MigrationReports::generate_migration_id();
        self.reports
            .create_report(&migration_id, total, &source_name, &destination_name)
            .await?;

        let mut queued_count = 0u32;
        for file in &files {
            let job = MigrateFile::new(file.id, destination).in_migration(migration_id.clone());
            self.publisher.publish(job.into()).await?;
            queued_count += 1;
        }

        tracing::info!(
            migration_id = %migration_id,
            queued_count,
            source_name = %source_name,
            destination_name = %destination_name,
            "Migration started"
        );

        Ok(MigrationPlan {
            migration_id,
            queued_count,
            source_name,
            destination_name,
        })
    }
}
