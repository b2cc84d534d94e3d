//! Video file repository: renditions and their current location.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use stowage_core::{AppError, FileLocation, VideoFile, VideoFileRepository};
use uuid::Uuid;

/// Row type for the video_files table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct VideoFileRow {
    pub id: Uuid,
    pub video_id: Uuid,
    pub profile: Option<String>,
    pub storage_id: Option<Uuid>,
    pub remote_path: Option<String>,
    pub local_path: Option<String>,
    pub file_size: Option<i64>,
}

impl VideoFileRow {
    pub fn into_video_file(self) -> VideoFile {
        VideoFile {
            id: self.id,
            video_id: self.video_id,
            profile: self.profile,
            location: FileLocation {
                storage_id: self.storage_id,
                remote_path: self.remote_path,
                local_path: self.local_path,
            },
            file_size: self.file_size.and_then(|size| u64::try_from(size).ok()),
        }
    }
}

fn size_column(file_size: Option<u64>) -> Option<i64> {
    file_size.and_then(|size| i64::try_from(size).ok())
}

#[derive(Clone)]
pub struct PgVideoFileRepository {
    pool: PgPool,
}

impl PgVideoFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoFileRepository for PgVideoFileRepository {
    #[tracing::instrument(skip(self), fields(db.table = "video_files", db.record_id = %id))]
    async fn find(&self, id: Uuid) -> Result<Option<VideoFile>, AppError> {
        let row: Option<VideoFileRow> = sqlx::query_as::<Postgres, VideoFileRow>(
            r#"
            SELECT id, video_id, profile, storage_id, remote_path, local_path, file_size
            FROM video_files
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(VideoFileRow::into_video_file))
    }

    #[tracing::instrument(skip(self, file), fields(db.table = "video_files", db.record_id = %file.id))]
    async fn save(&self, file: &VideoFile) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO video_files (id, video_id, profile, storage_id, remote_path, local_path, file_size)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                video_id = EXCLUDED.video_id,
                profile = EXCLUDED.profile,
                storage_id = EXCLUDED.storage_id,
                remote_path = EXCLUDED.remote_path,
                local_path = EXCLUDED.local_path,
                file_size = EXCLUDED.file_size,
                updated_at = NOW()
            "#,
        )
        .bind(file.id)
        .bind(file.video_id)
        .bind(&file.profile)
        .bind(file.location.storage_id)
        .bind(&file.location.remote_path)
        .bind(&file.location.local_path)
        .bind(size_column(file.file_size))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "video_files"))]
    async fn list_by_storage(&self, storage_id: Option<Uuid>) -> Result<Vec<VideoFile>, AppError> {
        let rows: Vec<VideoFileRow> = sqlx::query_as::<Postgres, VideoFileRow>(
            r#"
            SELECT id, video_id, profile, storage_id, remote_path, local_path, file_size
            FROM video_files
            WHERE storage_id IS NOT DISTINCT FROM $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(storage_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(VideoFileRow::into_video_file).collect())
    }

    #[tracing::instrument(skip(self, location), fields(db.table = "video_files", db.record_id = %id))]
    async fn update_location(
        &self,
        id: Uuid,
        location: &FileLocation,
        file_size: Option<u64>,
    ) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE video_files
            SET storage_id = $2,
                remote_path = $3,
                local_path = $4,
                file_size = COALESCE($5, file_size),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(location.storage_id)
        .bind(&location.remote_path)
        .bind(&location.local_path)
        .bind(size_column(file_size))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Video file {} not found", id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "video_upload_failures", db.record_id = %video_id))]
    async fn mark_video_failed(&self, video_id: Uuid, reason: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO video_upload_failures (video_id, reason)
            VALUES ($1, $2)
            ON CONFLICT (video_id) DO UPDATE SET reason = EXCLUDED.reason, failed_at = NOW()
            "#,
        )
        .bind(video_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_size_reads_as_unknown() {
        let row = VideoFileRow {
            id: Uuid::new_v4(),
            video_id: Uuid::new_v4(),
            profile: None,
            storage_id: None,
            remote_path: None,
            local_path: Some("public/media/a.mp4".to_string()),
            file_size: Some(-1),
        };
        let file = row.into_video_file();
        assert!(file.location.is_local());
        assert_eq!(file.file_size, None);
        assert_eq!(size_column(Some(u64::MAX)), None);
        assert_eq!(size_column(Some(42)), Some(42));
    }
}
