//! Destination bucket clearing
//!
//! Removes every version and delete marker first, then whatever current
//! objects remain (the only thing an unversioned bucket has).

use serde::Serialize;

use crate::error::{Error, Result};
use crate::retry::CallPolicy;
use crate::traits::{DeleteTarget, ObjectStore};

/// Largest batch a single delete request accepts
pub const MAX_DELETE_BATCH: usize = 1000;

/// Counts from a completed clear
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub versions_deleted: usize,
    pub objects_deleted: usize,
}

/// Delete every object version and every object in `bucket`
///
/// Any failure, including a single key refused inside a batch, aborts the
/// clear. Batches already deleted are not restored.
pub async fn clear_bucket(
    store: &dyn ObjectStore,
    bucket: &str,
    policy: &CallPolicy,
) -> Result<ClearReport> {
    let mut report = ClearReport::default();

    let mut marker = None;
    loop {
        let page = policy
            .call("list_object_versions", || {
                store.list_object_versions(bucket, marker.clone())
            })
            .await
            .map_err(|e| clear_error(bucket, e))?;

        let targets: Vec<DeleteTarget> = page
            .versions
            .into_iter()
            .map(|v| DeleteTarget::version(v.key, v.version_id))
            .collect();
        report.versions_deleted += delete_all(store, bucket, targets, policy).await?;

        match page.next {
            Some(next) => marker = Some(next),
            None => break,
        }
    }

    let mut token = None;
    loop {
        let page = policy
            .call("list_objects", || store.list_objects(bucket, "", token.clone()))
            .await
            .map_err(|e| clear_error(bucket, e))?;

        let targets: Vec<DeleteTarget> = page
            .records
            .into_iter()
            .map(|r| DeleteTarget::object(r.key))
            .collect();
        if targets.is_empty() {
            break;
        }
        report.objects_deleted += delete_all(store, bucket, targets, policy).await?;

        match page.continuation_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    tracing::info!(
        bucket = bucket,
        versions = report.versions_deleted,
        objects = report.objects_deleted,
        "Cleared destination bucket"
    );
    Ok(report)
}

async fn delete_all(
    store: &dyn ObjectStore,
    bucket: &str,
    targets: Vec<DeleteTarget>,
    policy: &CallPolicy,
) -> Result<usize> {
    let mut deleted = 0;
    for batch in targets.chunks(MAX_DELETE_BATCH) {
        let result = policy
            .call("delete_objects", || store.delete_objects(bucket, batch.to_vec()))
            .await
            .map_err(|e| clear_error(bucket, e))?;

        if !result.errors.is_empty() {
            let keys: Vec<&str> = result.errors.iter().map(|(k, _)| k.as_str()).collect();
            tracing::error!(bucket = bucket, keys = ?keys, "Failed to delete some objects");
            let (key, reason) = &result.errors[0];
            return Err(Error::Clear {
                bucket: bucket.to_string(),
                reason: format!(
                    "{} object(s) could not be deleted, first {key}: {reason}",
                    result.errors.len()
                ),
            });
        }

        tracing::debug!(bucket = bucket, count = result.deleted, "Deleted batch");
        deleted += result.deleted;
    }
    Ok(deleted)
}

fn clear_error(bucket: &str, e: Error) -> Error {
    Error::Clear {
        bucket: bucket.to_string(),
        reason: e.to_string(),
    }
}
