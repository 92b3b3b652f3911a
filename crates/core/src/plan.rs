//! The immutable description of one migration run

use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::CallPolicy;

/// Default number of copy workers
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of enqueued-but-uncompleted items
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Everything the coordinator needs, resolved before the run starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub source_bucket: String,
    pub destination_bucket: String,

    /// Only source keys starting with this are migrated
    pub prefix: String,

    pub concurrency: usize,
    pub queue_capacity: usize,

    /// Delete every object and version in the destination first
    pub clear: bool,

    /// Retry and deadline for metadata calls and opening source reads
    pub policy: CallPolicy,

    /// Deadline for one whole transfer attempt
    pub transfer_timeout: Option<Duration>,
}

impl MigrationPlan {
    pub fn new(source_bucket: impl Into<String>, destination_bucket: impl Into<String>) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            destination_bucket: destination_bucket.into(),
            prefix: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            clear: false,
            policy: CallPolicy::default(),
            transfer_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_bucket.is_empty() {
            return Err(Error::Config("source bucket name is empty".to_string()));
        }
        if self.destination_bucket.is_empty() {
            return Err(Error::Config("destination bucket name is empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}
