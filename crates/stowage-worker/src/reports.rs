//! Migration reports
//!
//! Thin service over a [`MigrationReportStore`]. Recording an outcome for an
//! unknown migration id is logged and ignored so a cleared report never fails
//! a migration job.

use std::sync::Arc;
use stowage_core::models::MigrationSummary;
use stowage_core::{AppError, MigrationFailure, MigrationReport, MigrationReportStore};
use uuid::Uuid;

const RECENT_COMPLETED_LIMIT: usize = 10;

#[derive(Clone)]
pub struct MigrationReports {
    store: Arc<dyn MigrationReportStore>,
}

impl MigrationReports {
    pub fn new(store: Arc<dyn MigrationReportStore>) -> Self {
        Self { store }
    }

    /// `migration_{uuid}`; unique per call.
    pub fn generate_migration_id() -> String {
        format!("migration_{}", Uuid::new_v4().simple())
    }

    pub async fn create_report(
        &self,
        migration_id: &str,
        total_files: u32,
        source_name: &str,
        destination_name: &str,
    ) -> Result<MigrationReport, AppError> {
        let report = MigrationReport::new(migration_id, total_files, source_name, destination_name);
        self.store.create(&report).await?;
        tracing::info!(
            migration_id = %migration_id,
            total_files,
            source_name = %source_name,
            destination_name = %destination_name,
            "Migration report created"
        );
        Ok(report)
    }

    pub async fn record_success(&self, migration_id: &str, video_file_id: Uuid) -> Result<(), AppError> {
        match self.store.record_success(migration_id, video_file_id).await? {
            Some(report) => {
                tracing::debug!(
                    migration_id = %migration_id,
                    video_file_id = %video_file_id,
                    success_count = report.success_count(),
                    "Migration success recorded"
                );
                log_completion(&report);
            }
            None => tracing::warn!(
                migration_id = %migration_id,
                video_file_id = %video_file_id,
                "Migration report not found for success record"
            ),
        }
        Ok(())
    }

    pub async fn record_failure(
        &self,
        migration_id: &str,
        video_file_id: Uuid,
        error: &str,
    ) -> Result<(), AppError> {
        match self.store.record_failure(migration_id, video_file_id, error).await? {
            Some(report) => {
                tracing::debug!(
                    migration_id = %migration_id,
                    video_file_id = %video_file_id,
                    failure_count = report.failure_count(),
                    error = %error,
                    "Migration failure recorded"
                );
                log_completion(&report);
            }
            None => tracing::warn!(
                migration_id = %migration_id,
                video_file_id = %video_file_id,
                "Migration report not found for failure record"
            ),
        }
        Ok(())
    }

    pub async fn report(&self, migration_id: &str) -> Result<Option<MigrationReport>, AppError> {
        self.store.get(migration_id).await
    }

    pub async fn summary(&self, migration_id: &str) -> Result<Option<MigrationSummary>, AppError> {
        Ok(self.store.get(migration_id).await?.map(|report| report.summary()))
    }

    /// Failures of a run, oldest first. Empty for an unknown id.
    pub async fn failures(&self, migration_id: &str) -> Result<Vec<MigrationFailure>, AppError> {
        Ok(self
            .store
            .get(migration_id)
            .await?
            .map(|report| report.failures)
            .unwrap_or_default())
    }

    pub async fn active_migrations(&self) -> Result<Vec<MigrationSummary>, AppError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|report| !report.is_complete())
            .map(|report| report.summary())
            .collect())
    }

    /// Completed runs, most recently completed first.
    pub async fn recent_completed(&self, limit: Option<usize>) -> Result<Vec<MigrationSummary>, AppError> {
        let mut completed: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(MigrationReport::is_complete)
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(completed
            .into_iter()
            .take(limit.unwrap_or(RECENT_COMPLETED_LIMIT))
            .map(|report| report.summary())
            .collect())
    }

    pub async fn delete_report(&self, migration_id: &str) -> Result<bool, AppError> {
        let deleted = self.store.delete(migration_id).await?;
        if deleted {
            tracing::info!(migration_id = %migration_id, "Migration report deleted");
        }
        Ok(deleted)
    }
}

fn log_completion(report: &MigrationReport) {
    if report.is_complete() && report.processed_count() == report.total_files {
        tracing::info!(
            migration_id = %report.id,
            total_files = report.total_files,
            success_count = report.success_count(),
            failure_count = report.failure_count(),
            "Migration completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::memory::InMemoryMigrationReportStore;
    use stowage_core::MigrationStatus;

    fn reports() -> MigrationReports {
        MigrationReports::new(Arc::new(InMemoryMigrationReportStore::new()))
    }

    #[tokio::test]
    async fn tracks_progress_to_completion() {
        let reports = reports();
        let id = MigrationReports::generate_migration_id();
        reports.create_report(&id, 2, "Local", "Archive").await.unwrap();

        reports.record_success(&id, Uuid::new_v4()).await.unwrap();
        assert_eq!(reports.active_migrations().await.unwrap().len(), 1);

        let failed = Uuid::new_v4();
        reports.record_failure(&id, failed, "timeout").await.unwrap();

        let summary = reports.summary(&id).await.unwrap().unwrap();
        assert_eq!(summary.status, MigrationStatus::Completed);
        assert_eq!(summary.progress_percent, 100.0);
        assert!(summary.has_failures);
        assert!(reports.active_migrations().await.unwrap().is_empty());
        assert_eq!(reports.recent_completed(None).await.unwrap().len(), 1);

        let failures = reports.failures(&id).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].video_file_id, failed);
    }

    #[tokio::test]
    async fn unknown_migration_is_ignored() {
        let reports = reports();
        reports.record_success("migration_gone", Uuid::new_v4()).await.unwrap();
        reports
            .record_failure("migration_gone", Uuid::new_v4(), "boom")
            .await
            .unwrap();
        assert!(reports.summary("migration_gone").await.unwrap().is_none());
        assert!(reports.failures("migration_gone").await.unwrap().is_empty());
    }

    #[test]
    fn migration_ids_are_unique() {
        let a = MigrationReports::generate_migration_id();
        assert!(a.starts_with("migration_"));
        assert_ne!(a, MigrationReports::generate_migration_id());
    }

    #[tokio::test]
    async fn recent_completed_respects_limit() {
        let reports = reports();
        for _ in 0..3 {
            let id = MigrationReports::generate_migration_id();
            reports.create_report(&id, 1, "Local", "S3").await.unwrap();
            reports.record_success(&id, Uuid::new_v4()).await.unwrap();
        }
        assert_eq!(reports.recent_completed(Some(2)).await.unwrap().len(), 2);
        let id = reports.recent_completed(Some(1)).await.unwrap()[0].id.clone();
        assert!(reports.delete_report(&id).await.unwrap());
        assert_eq!(reports.recent_completed(None).await.unwrap().len(), 2);
    }
}
