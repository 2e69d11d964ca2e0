//! `queue` crate — job naming, payload types, back-off policy, and the
//! generic poll-loop worker built over `db::repository::jobs`.
//!
//! This crate owns the conventions (§4.2): queue naming, idempotency-key
//! schemes, and back-off. The actual row CRUD lives in `db`; this is the
//! only crate that's supposed to call it directly for queue operations.

pub mod backoff;
pub mod error;
pub mod job_types;
pub mod names;
pub mod worker;

pub use error::QueueError;
pub use job_types::{ContinuationJob, RunJob};
pub use worker::{JobHandler, Worker, WorkerConfig};
