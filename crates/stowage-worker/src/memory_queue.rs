//! In-process job queue
//!
//! Used when no `DATABASE_URL` is configured, and by tests. Delayed jobs stay in
//! the queue but are invisible until their due time. A claimed job is held
//! until acknowledged.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{AppError, ClaimedJob, Job, JobPublisher, JobSource};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

struct PendingJob {
    id: Uuid,
    job: Job,
    available_at: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingJob>,
    claimed: HashMap<Uuid, Job>,
}

impl QueueState {
    fn len(&self) -> usize {
        self.pending.len() + self.claimed.len()
    }
}

#[derive(Clone)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    capacity: usize,
    wakeup: Arc<Notify>,
}

impl InMemoryJobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            capacity: capacity.max(1),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Notified whenever a job becomes visible immediately.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    /// Jobs not yet acknowledged, visible or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every unacknowledged job (claimed ones first) with the delay left before it is visible.
    pub async fn snapshot(&self) -> Vec<(Job, Duration)> {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .claimed
            .values()
            .map(|job| (job.clone(), Duration::ZERO))
            .chain(state.pending.iter().map(|pending| {
                (
                    pending.job.clone(),
                    pending.available_at.saturating_duration_since(now),
                )
            }))
            .collect()
    }

    async fn push(&self, job: Job, delay: Duration) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state.len() >= self.capacity {
            return Err(AppError::Queue(format!(
                "Job queue is full ({} jobs)",
                self.capacity
            )));
        }
        state.pending.push_back(PendingJob {
            id: Uuid::new_v4(),
            job,
            available_at: Instant::now() + delay,
        });
        drop(state);

        if delay.is_zero() {
            self.wakeup.notify_one();
        }
        Ok(())
    }
}

#[async_trait]
impl JobPublisher for InMemoryJobQueue {
    async fn publish(&self, job: Job) -> Result<(), AppError> {
        tracing::debug!(job_type = %job, attempt = job.attempt(), "Job published");
        self.push(job, Duration::ZERO).await
    }

    async fn publish_delayed(&self, job: Job, delay: Duration) -> Result<(), AppError> {
        tracing::debug!(
            job_type = %job,
            attempt = job.attempt(),
            delay_secs = delay.as_secs(),
            "Delayed job published"
        );
        self.push(job, delay).await
    }
}

#[async_trait]
impl JobSource for InMemoryJobQueue {
    async fn claim_next(&self) -> Result<Option<ClaimedJob>, AppError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let Some(index) = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, pending)| pending.available_at <= now)
            .min_by_key(|(_, pending)| pending.available_at)
            .map(|(index, _)| index)
        else {
            return Ok(None);
        };

        let Some(pending) = state.pending.remove(index) else {
            return Ok(None);
        };
        state.claimed.insert(pending.id, pending.job.clone());
        Ok(Some(ClaimedJob {
            id: pending.id,
            job: pending.job,
        }))
    }

    async fn acknowledge(&self, id: Uuid) -> Result<(), AppError> {
        self.state.lock().await.claimed.remove(&id);
        Ok(())
    }
}
