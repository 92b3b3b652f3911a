//! s3migrate-s3: S3 SDK adapter for s3migrate
//!
//! Implements the `ObjectStore` trait from s3migrate-core on top of
//! aws-sdk-s3, with streaming multipart uploads for large objects.

mod client;

pub use client::{MIN_PART_SIZE, S3Client};
