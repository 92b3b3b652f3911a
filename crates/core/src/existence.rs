//! Destination existence check

use crate::error::Result;
use crate::retry::CallPolicy;
use crate::traits::ObjectStore;

/// Check whether `key` is already present in `bucket`
///
/// Uses a metadata-only head call. Only a not-found answer means "absent";
/// any other failure is returned so the caller never copies on a guess.
pub async fn key_exists(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    policy: &CallPolicy,
) -> Result<bool> {
    match policy
        .call("head_object", || store.head_object(bucket, key))
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::retry::RetryConfig;
    use crate::traits::{MockObjectStore, ObjectRecord};

    fn policy(max_attempts: u32) -> CallPolicy {
        CallPolicy::new(
            RetryConfig {
                max_attempts,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_present_key() {
        let mut store = MockObjectStore::new();
        store
            .expect_head_object()
            .withf(|bucket, key| bucket == "dest" && key == "a.txt")
            .returning(|_, key| Ok(ObjectRecord::new(key, 3)));

        assert!(key_exists(&store, "dest", "a.txt", &policy(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_not_found_means_absent() {
        let mut store = MockObjectStore::new();
        store
            .expect_head_object()
            .times(1)
            .returning(|bucket, key| Err(Error::NotFound(format!("{bucket}/{key}"))));

        assert!(!key_exists(&store, "dest", "a.txt", &policy(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_errors_are_not_absence() {
        let mut store = MockObjectStore::new();
        store
            .expect_head_object()
            .times(1)
            .returning(|_, _| Err(Error::Auth("AccessDenied".into())));

        let result = key_exists(&store, "dest", "a.txt", &policy(3)).await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_throttling_exhausts_retries_then_fails() {
        let mut store = MockObjectStore::new();
        store
            .expect_head_object()
            .times(2)
            .returning(|_, _| Err(Error::Throttled("SlowDown".into())));

        let result = key_exists(&store, "dest", "a.txt", &policy(2)).await;
        assert!(matches!(result, Err(Error::Throttled(_))));
    }
}
