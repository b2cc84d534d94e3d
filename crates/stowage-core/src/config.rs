//! Configuration module
//!
//! Process-wide settings read from the environment (and `.env` when present).
//! Per-storage settings live with each `StorageConfig` row instead.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const WORKER_MAX_CONCURRENCY: usize = 4;
const WORKER_QUEUE_CAPACITY: usize = 1024;
const WORKER_POLL_INTERVAL_MS: u64 = 1000;
const JOB_MAX_ATTEMPTS: u32 = 3;
const JOB_RETRY_DELAY_SECS: u64 = 30;
const STORAGE_SPACE_CACHE_SECS: u64 = 300;
const STORAGE_WARNING_THRESHOLD_PERCENT: f64 = 80.0;

#[derive(Clone, Debug)]
pub struct StowageConfig {
    /// Secret used for every signed URL. Never falls back to a backend credential.
    pub signing_secret: String,
    /// Project directory used to resolve relative local paths.
    pub media_root: PathBuf,
    pub database_url: Option<String>,
    pub worker_max_concurrency: usize,
    pub worker_queue_capacity: usize,
    pub worker_poll_interval_ms: u64,
    pub job_max_attempts: u32,
    pub job_retry_delay_secs: u64,
    pub space_cache_secs: u64,
    pub warning_threshold_percent: f64,
}

impl StowageConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let signing_secret = env::var("STORAGE_SIGNING_SECRET").unwrap_or_default();
        if signing_secret.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "STORAGE_SIGNING_SECRET must be set to a non-empty value"
            ));
        }

        let job_max_attempts = env::var("JOB_MAX_ATTEMPTS")
            .unwrap_or_else(|_| JOB_MAX_ATTEMPTS.to_string())
            .parse::<u32>()
            .unwrap_or(JOB_MAX_ATTEMPTS)
            .max(1);

        Ok(Self {
            signing_secret,
            media_root: PathBuf::from(env::var("MEDIA_ROOT").unwrap_or_else(|_| ".".to_string())),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            worker_max_concurrency: env::var("WORKER_MAX_CONCURRENCY")
                .unwrap_or_else(|_| WORKER_MAX_CONCURRENCY.to_string())
                .parse()
                .unwrap_or(WORKER_MAX_CONCURRENCY)
                .max(1),
            worker_queue_capacity: env::var("WORKER_QUEUE_CAPACITY")
                .unwrap_or_else(|_| WORKER_QUEUE_CAPACITY.to_string())
                .parse()
                .unwrap_or(WORKER_QUEUE_CAPACITY)
                .max(1),
            worker_poll_interval_ms: env::var("WORKER_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| WORKER_POLL_INTERVAL_MS.to_string())
                .parse()
                .unwrap_or(WORKER_POLL_INTERVAL_MS),
            job_max_attempts,
            job_retry_delay_secs: env::var("JOB_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| JOB_RETRY_DELAY_SECS.to_string())
                .parse()
                .unwrap_or(JOB_RETRY_DELAY_SECS),
            space_cache_secs: env::var("STORAGE_SPACE_CACHE_SECS")
                .unwrap_or_else(|_| STORAGE_SPACE_CACHE_SECS.to_string())
                .parse()
                .unwrap_or(STORAGE_SPACE_CACHE_SECS),
            warning_threshold_percent: env::var("STORAGE_WARNING_THRESHOLD_PERCENT")
                .unwrap_or_else(|_| STORAGE_WARNING_THRESHOLD_PERCENT.to_string())
                .parse()
                .unwrap_or(STORAGE_WARNING_THRESHOLD_PERCENT),
        })
    }

    /// Settings with every default applied, for tests and embedded use.
    pub fn with_secret(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            media_root: PathBuf::from("."),
            database_url: None,
            worker_max_concurrency: WORKER_MAX_CONCURRENCY,
            worker_queue_capacity: WORKER_QUEUE_CAPACITY,
            worker_poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            job_max_attempts: JOB_MAX_ATTEMPTS,
            job_retry_delay_secs: JOB_RETRY_DELAY_SECS,
            space_cache_secs: STORAGE_SPACE_CACHE_SECS,
            warning_threshold_percent: STORAGE_WARNING_THRESHOLD_PERCENT,
        }
    }

    pub fn space_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.space_cache_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}
