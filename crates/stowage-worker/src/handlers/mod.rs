//! Job handlers
//!
//! Each handler returns a [`TaskError`](stowage_core::TaskError): recoverable
//! failures are retried by the worker, unrecoverable ones go straight to the
//! handler's `escalate`.

pub mod delete;
pub mod migrate;
pub mod upload;
