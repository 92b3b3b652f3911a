//! Paginated enumeration of source objects
//!
//! Turns the store's page-at-a-time listing into one lazy stream of
//! [`ObjectRecord`]s. Pages are only fetched as the consumer pulls.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::{Error, Result};
use crate::retry::CallPolicy;
use crate::traits::{ObjectRecord, ObjectStore};

enum Cursor {
    Start,
    Continue(String),
    Exhausted,
}

/// List every object under `prefix` in `bucket`
///
/// The stream ends when a page comes back empty or without a continuation
/// token. A store error is yielded once (after the policy's retries) and
/// ends the stream.
pub fn list_records<'a>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: &'a str,
    policy: &'a CallPolicy,
) -> BoxStream<'a, Result<ObjectRecord>> {
    stream::try_unfold(Cursor::Start, move |cursor| async move {
        let token = match cursor {
            Cursor::Start => None,
            Cursor::Continue(token) => Some(token),
            Cursor::Exhausted => return Ok(None),
        };

        let page = policy
            .call("list_objects", || {
                store.list_objects(bucket, prefix, token.clone())
            })
            .await?;

        tracing::debug!(
            bucket = bucket,
            prefix = prefix,
            count = page.records.len(),
            truncated = page.continuation_token.is_some(),
            "Fetched listing page"
        );

        if page.records.is_empty() {
            return Ok(None);
        }

        let next = match page.continuation_token {
            Some(token) => Cursor::Continue(token),
            None => Cursor::Exhausted,
        };
        Ok::<_, Error>(Some((page.records, next)))
    })
    .map_ok(|records| stream::iter(records.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}
