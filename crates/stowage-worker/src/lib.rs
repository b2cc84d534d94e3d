//! Stowage Worker Library
//!
//! Background processing for storage jobs: an in-process queue, the worker pool
//! with retry and escalation, the upload/migrate/delete handlers, migration
//! reports and the batch migration planner.

pub mod context;
pub mod handlers;
pub mod memory_queue;
pub mod planner;
pub mod queue;
pub mod reports;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use context::{JobHandlerContext, StorageJobContext};
pub use memory_queue::InMemoryJobQueue;
pub use planner::{MigrationPlan, MigrationPlanner};
pub use queue::{compute_retry_delay, JobOutcome, JobWorker, WorkerConfig};
pub use reports::MigrationReports;
pub use telemetry::init_tracing;
