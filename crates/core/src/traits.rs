//! ObjectStore trait definition
//!
//! The pipeline only talks to storage through this trait, so the S3 adapter
//! can be swapped for an in-memory store in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Streamed object body, chunk by chunk
pub type ObjectBody = BoxStream<'static, Result<Bytes>>;

/// Metadata for one object as reported by a listing or head call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Object key
    pub key: String,

    /// Size in bytes
    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectRecord {
    /// Create a record with only key and size set
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            version_id: None,
            etag: None,
        }
    }
}

/// One page of a paginated object listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub records: Vec<ObjectRecord>,

    /// Opaque token for the next page; `None` when the listing is complete
    pub continuation_token: Option<String>,
}

/// A specific object version or delete marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_delete_marker: bool,
}

/// Where to resume a version listing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionMarker {
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

/// One page of a version listing
#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub versions: Vec<ObjectVersion>,

    /// Marker for the next page; `None` when the listing is complete
    pub next: Option<VersionMarker>,
}

/// Target of a batch delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    pub key: String,
    pub version_id: Option<String>,
}

impl DeleteTarget {
    pub fn object(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: None,
        }
    }

    pub fn version(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: Some(version_id.into()),
        }
    }
}

/// Result of a batch delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: usize,

    /// Targets the store refused to delete, with its reason
    pub errors: Vec<(String, String)>,
}

/// Storage operations the migration pipeline needs
///
/// Implementations must report a missing object from `head_object` and a
/// missing bucket from `head_bucket` as [`crate::Error::NotFound`], and
/// rejected credentials as [`crate::Error::Auth`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check that `bucket` exists and the credentials can reach it
    async fn head_bucket(&self, bucket: &str) -> Result<()>;

    /// Fetch one page of objects under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;

    /// Metadata-only lookup of a single key
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectRecord>;

    /// Open a streaming read of an object body
    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ObjectBody>;

    /// Write an object from a stream, returning the number of bytes written
    ///
    /// `size_hint` lets the implementation pick a part size up front.
    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        size_hint: Option<u64>,
    ) -> Result<u64>;

    /// Fetch one page of object versions and delete markers
    async fn list_object_versions(
        &self,
        bucket: &str,
        marker: Option<VersionMarker>,
    ) -> Result<VersionPage>;

    /// Delete a batch of objects or object versions (at most 1000)
    async fn delete_objects(&self, bucket: &str, targets: Vec<DeleteTarget>)
    -> Result<DeleteReport>;
}
