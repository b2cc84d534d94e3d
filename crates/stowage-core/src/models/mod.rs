//! Data models
//!
//! Storage configurations, file locations, migration reports and the job
//! messages exchanged through the queue.

mod job;
mod migration_report;
mod storage;
mod video_file;

pub use job::*;
pub use migration_report::*;
pub use storage::*;
pub use video_file::*;
