use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    InProgress,
    Completed,
}

impl Display for MigrationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MigrationStatus::InProgress => write!(f, "in_progress"),
            MigrationStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for MigrationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(MigrationStatus::InProgress),
            "completed" => Ok(MigrationStatus::Completed),
            _ => Err(anyhow::anyhow!("Invalid migration status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFailure {
    pub video_file_id: Uuid,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate outcome of one bulk migration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub id: String,
    pub total_files: u32,
    pub source_name: String,
    pub destination_name: String,
    pub succeeded: Vec<Uuid>,
    pub failures: Vec<MigrationFailure>,
    pub status: MigrationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationReport {
    pub fn new(
        id: impl Into<String>,
        total_files: u32,
        source_name: impl Into<String>,
        destination_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            total_files,
            source_name: source_name.into(),
            destination_name: destination_name.into(),
            succeeded: Vec::new(),
            failures: Vec::new(),
            status: MigrationStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn success_count(&self) -> u32 {
        self.succeeded.len() as u32
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.len() as u32
    }

    pub fn processed_count(&self) -> u32 {
        self.success_count() + self.failure_count()
    }

    pub fn is_complete(&self) -> bool {
        self.status == MigrationStatus::Completed
    }

    fn has_succeeded(&self, video_file_id: Uuid) -> bool {
        self.succeeded.contains(&video_file_id)
    }

    fn has_failed(&self, video_file_id: Uuid) -> bool {
        self.failures.iter().any(|f| f.video_file_id == video_file_id)
    }

    /// Each file counts once. A success replaces an earlier failure of the same file.
    pub fn record_success(&mut self, video_file_id: Uuid) {
        if self.has_succeeded(video_file_id) {
            return;
        }
        self.failures.retain(|f| f.video_file_id != video_file_id);
        self.succeeded.push(video_file_id);
        self.refresh_status();
    }

    /// Ignored when the file already has an outcome.
    pub fn record_failure(&mut self, video_file_id: Uuid, error: impl Into<String>) {
        if self.has_succeeded(video_file_id) || self.has_failed(video_file_id) {
            return;
        }
        self.failures.push(MigrationFailure {
            video_file_id,
            error: error.into(),
            timestamp: Utc::now(),
        });
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        if self.status == MigrationStatus::InProgress && self.processed_count() >= self.total_files
        {
            self.status = MigrationStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn summary(&self) -> MigrationSummary {
        let processed = self.processed_count();
        let progress_percent = if self.total_files > 0 {
            ((processed as f64 / self.total_files as f64) * 1000.0).round() / 10.0
        } else {
            0.0
        };

        MigrationSummary {
            id: self.id.clone(),
            status: self.status,
            total_files: self.total_files,
            success_count: self.success_count(),
            failure_count: self.failure_count(),
            processed_count: processed,
            remaining_count: self.total_files.saturating_sub(processed),
            progress_percent,
            source_name: self.source_name.clone(),
            destination_name: self.destination_name.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            is_complete: self.is_complete(),
            has_failures: !self.failures.is_empty(),
        }
    }
}

/// Operator-facing view of a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub id: String,
    pub status: MigrationStatus,
    pub total_files: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub processed_count: u32,
    pub remaining_count: u32,
    pub progress_percent: f64,
    pub source_name: String,
    pub destination_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_complete: bool,
    pub has_failures: bool,
}
