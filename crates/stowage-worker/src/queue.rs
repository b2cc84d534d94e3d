//! Job worker: worker pool, polling or wakeup, retry and escalation.
//!
//! A failed job is retried by publishing `job.retry()` (attempt + 1) after
//! [`compute_retry_delay`]; the claimed message is acknowledged either way, so the
//! attempt counter is the only state carried between tries.
//!
//! Shutdown: [`JobWorker::shutdown`] signals the pool to stop; it does not wait for
//! in-flight jobs.

use anyhow::Result;
use std::sync::{Arc, Weak};
use std::time::Duration;
use stowage_core::{ClaimedJob, Job, JobPublisher, JobSource, StowageConfig, TaskError};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::sleep;

use crate::context::JobHandlerContext;

/// Upper bound on the delay before a retry message becomes visible.
pub const MAX_RETRY_DELAY_SECS: u64 = 300;

/// `base * 2^(attempt-1)` seconds for the retry that follows failed `attempt`, capped.
#[inline]
pub fn compute_retry_delay(base_secs: u64, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_secs(base_secs.saturating_mul(factor).min(MAX_RETRY_DELAY_SECS))
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            max_attempts: 3,
            retry_delay_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &StowageConfig) -> Self {
        Self {
            max_workers: config.worker_max_concurrency,
            poll_interval_ms: config.worker_poll_interval_ms,
            max_attempts: config.job_max_attempts,
            retry_delay_secs: config.job_retry_delay_secs,
        }
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retried,
    Escalated,
}

pub struct JobWorker {
    publisher: Arc<dyn JobPublisher>,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobWorker {
    /// Spawn the worker pool.
    ///
    /// If `wakeup` is `Some`, the pool claims as soon as it is notified, in
    /// addition to polling every `poll_interval_ms`.
    pub fn new(
        source: Arc<dyn JobSource>,
        publisher: Arc<dyn JobPublisher>,
        config: WorkerConfig,
        context: Weak<dyn JobHandlerContext>,
        wakeup: Option<Arc<Notify>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let publisher_clone = publisher.clone();
        tokio::spawn(async move {
            Self::worker_pool(source, publisher_clone, config, context, shutdown_rx, wakeup).await;
        });

        Self {
            publisher,
            shutdown_tx,
        }
    }

    /// Submit a new job.
    #[tracing::instrument(skip(self, job), fields(job_type = %job))]
    pub async fn submit(&self, job: Job) -> Result<()> {
        self.publisher.publish(job).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to publish job");
            anyhow::anyhow!("Failed to publish job: {}", e)
        })
    }

    async fn worker_pool(
        source: Arc<dyn JobSource>,
        publisher: Arc<dyn JobPublisher>,
        config: WorkerConfig,
        context: Weak<dyn JobHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        wakeup: Option<Arc<Notify>>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            max_attempts = config.max_attempts,
            wakeup = wakeup.is_some(),
            "Job worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        let wakeup = wakeup.unwrap_or_else(|| Arc::new(Notify::new()));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job worker pool shutting down");
                    break;
                }
                _ = wakeup.notified() => {
                    Self::claim_and_dispatch_one(&source, &publisher, &config, &semaphore, &context).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&source, &publisher, &config, &semaphore, &context).await;
                }
            }
        }

        tracing::info!("Job worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        source: &Arc<dyn JobSource>,
        publisher: &Arc<dyn JobPublisher>,
        config: &WorkerConfig,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn JobHandlerContext>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match source.claim_next().await {
            Ok(Some(claimed)) => {
                let source = source.clone();
                let publisher = publisher.clone();
                let config = config.clone();
                let ctx = context.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_job(claimed, source, publisher, &config, ctx).await {
                        tracing::error!(error = %e, "Job processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from queue");
            }
        }
    }

    /// Run one claimed job to completion, retry or escalation, then acknowledge it.
    #[tracing::instrument(skip_all, fields(job.id = %claimed.id, job.type = %claimed.job, attempt = claimed.job.attempt()))]
    pub async fn process_job(
        claimed: ClaimedJob,
        source: Arc<dyn JobSource>,
        publisher: Arc<dyn JobPublisher>,
        config: &WorkerConfig,
        context: Weak<dyn JobHandlerContext>,
    ) -> Result<JobOutcome> {
        let ctx = context
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("JobHandlerContext was dropped, cannot process job"))?;
        let job = claimed.job;
        let attempt = job.attempt();

        let outcome = match ctx.clone().dispatch_job(&job).await {
            Ok(()) => {
                tracing::info!(job_type = %job, attempt, "Job completed successfully");
                JobOutcome::Completed
            }
            Err(e) => {
                let is_unrecoverable = e
                    .downcast_ref::<TaskError>()
                    .map(|te| !te.is_recoverable())
                    .unwrap_or(false);

                tracing::warn!(
                    job_type = %job,
                    attempt,
                    max_attempts = config.max_attempts,
                    unrecoverable = is_unrecoverable,
                    error = %e,
                    "Job attempt failed"
                );

                if !is_unrecoverable && attempt < config.max_attempts {
                    let delay = compute_retry_delay(config.retry_delay_secs, attempt);
                    tracing::info!(
                        job_type = %job,
                        next_attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        "Scheduling job retry"
                    );
                    publisher.publish_delayed(job.retry(), delay).await?;
                    JobOutcome::Retried
                } else {
                    tracing::error!(
                        job_type = %job,
                        attempt,
                        error = %e,
                        "Job failed for good, escalating"
                    );
                    ctx.escalate(&job, &e).await;
                    JobOutcome::Escalated
                }
            }
        };

        source.acknowledge(claimed.id).await?;
        Ok(outcome)
    }

    /// Signals the worker pool to stop claiming new jobs and exit the main loop.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job worker shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl Clone for JobWorker {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_queue::InMemoryJobQueue;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stowage_core::DeleteFromStorage;
    use uuid::Uuid;

    #[test]
    fn retry_delay_doubles_then_caps() {
        assert_eq!(compute_retry_delay(30, 1), Duration::from_secs(30));
        assert_eq!(compute_retry_delay(30, 2), Duration::from_secs(60));
        assert_eq!(compute_retry_delay(30, 4), Duration::from_secs(240));
        assert_eq!(compute_retry_delay(30, 5), Duration::from_secs(MAX_RETRY_DELAY_SECS));
        assert_eq!(compute_retry_delay(0, 2), Duration::ZERO);
    }

    /// Context whose handler always fails with the configured error kind.
    struct FailingContext {
        recoverable: bool,
        escalations: AtomicU32,
    }

    #[async_trait]
    impl JobHandlerContext for FailingContext {
        async fn dispatch_job(self: Arc<Self>, _job: &Job) -> Result<()> {
            let err = anyhow::anyhow!("backend unavailable");
            Err(if self.recoverable {
                TaskError::recoverable(err).into()
            } else {
                TaskError::unrecoverable(err).into()
            })
        }

        async fn escalate(self: Arc<Self>, _job: &Job, _error: &anyhow::Error) {
            self.escalations.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn run(ctx: Arc<FailingContext>, attempt: u32) -> (JobOutcome, InMemoryJobQueue) {
        let queue = InMemoryJobQueue::new(16);
        queue
            .publish(DeleteFromStorage::new(Uuid::new_v4(), "a.mp4").with_attempt(attempt).into())
            .await
            .unwrap();
        let claimed = queue.claim_next().await.unwrap().unwrap();
        let weak: Weak<dyn JobHandlerContext> = {
            let dyn_ctx: Arc<dyn JobHandlerContext> = ctx.clone();
            Arc::downgrade(&dyn_ctx)
        };
        let outcome = JobWorker::process_job(
            claimed,
            Arc::new(queue.clone()),
            Arc::new(queue.clone()),
            &WorkerConfig::default(),
            weak,
        )
        .await
        .unwrap();
        (outcome, queue)
    }

    #[tokio::test]
    async fn recoverable_failure_republishes_next_attempt() {
        let ctx = Arc::new(FailingContext {
            recoverable: true,
            escalations: AtomicU32::new(0),
        });
        let (outcome, queue) = run(ctx.clone(), 1).await;

        assert_eq!(outcome, JobOutcome::Retried);
        let jobs = queue.snapshot().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0.attempt(), 2);
        assert!(jobs[0].1 > Duration::from_secs(25));
        assert_eq!(ctx.escalations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn last_attempt_escalates_once() {
        let ctx = Arc::new(FailingContext {
            recoverable: true,
            escalations: AtomicU32::new(0),
        });
        let (outcome, queue) = run(ctx.clone(), 3).await;

        assert_eq!(outcome, JobOutcome::Escalated);
        assert!(queue.is_empty().await);
        assert_eq!(ctx.escalations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unrecoverable_failure_skips_remaining_attempts() {
        let ctx = Arc::new(FailingContext {
            recoverable: false,
            escalations: AtomicU32::new(0),
        });
        let (outcome, queue) = run(ctx.clone(), 1).await;

        assert_eq!(outcome, JobOutcome::Escalated);
        assert!(queue.is_empty().await);
    }

    #[test]
    fn non_task_error_treated_as_recoverable() {
        let err: anyhow::Error = anyhow::anyhow!("generic error");
        let is_unrecoverable = err
            .downcast_ref::<TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false);
        assert!(!is_unrecoverable);
    }
}
