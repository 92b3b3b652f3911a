//! s3migrate-core: Core library for the s3migrate bucket migration tool
//!
//! This crate provides the migration pipeline, including:
//! - The ObjectStore trait the pipeline copies through
//! - Paginated source listing and destination existence checks
//! - A bounded work queue with completion tracking
//! - Copy workers and the coordinator that drains and stops them
//! - Optional destination clearing
//! - Retry with backoff, per-call timeouts and configuration resolution
//!
//! This crate is independent of any specific S3 SDK so the pipeline can be
//! tested against an in-memory store.

pub mod clear;
pub mod config;
pub mod error;
pub mod existence;
pub mod lister;
pub mod pipeline;
pub mod plan;
pub mod queue;
pub mod retry;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use clear::{ClearReport, clear_bucket};
pub use config::{Credentials, Side, StoreConfig, VCAP_SERVICES, normalize_endpoint};
pub use error::{Error, Result};
pub use existence::key_exists;
pub use lister::list_records;
pub use pipeline::{Migrator, Phase, RunOutcome};
pub use plan::{DEFAULT_CONCURRENCY, DEFAULT_QUEUE_CAPACITY, MigrationPlan};
pub use queue::{WorkItem, WorkQueue, WorkTicket};
pub use retry::{CallPolicy, RetryBuilder, RetryConfig, is_retryable_error, retry_with_backoff};
pub use traits::{
    DeleteReport, DeleteTarget, ListPage, ObjectBody, ObjectRecord, ObjectStore, ObjectVersion,
    VersionMarker, VersionPage,
};
pub use worker::{CopyOutcome, CopyWorker, WorkerReport};
