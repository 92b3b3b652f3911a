//! Copy worker
//!
//! Claims items from the [`WorkQueue`] one at a time, skips keys the
//! destination already has and streams the rest from source to destination.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::existence::key_exists;
use crate::plan::MigrationPlan;
use crate::queue::{WorkItem, WorkQueue};
use crate::retry::{is_retryable_error, retry_with_backoff, with_timeout};
use crate::traits::ObjectStore;

/// What happened to one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied { bytes: u64 },
    Skipped,
    Failed { reason: String },
}

/// Per-worker tallies, merged by the coordinator after join
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub copied: usize,
    pub skipped: usize,
    pub bytes_copied: u64,
    pub failed: Vec<String>,
}

impl WorkerReport {
    fn record(&mut self, key: &str, outcome: &CopyOutcome) {
        match outcome {
            CopyOutcome::Copied { bytes } => {
                self.copied += 1;
                self.bytes_copied += bytes;
            }
            CopyOutcome::Skipped => self.skipped += 1,
            CopyOutcome::Failed { .. } => self.failed.push(key.to_string()),
        }
    }
}

/// A single consumer of the work queue
pub struct CopyWorker {
    id: usize,
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    plan: Arc<MigrationPlan>,
}

impl CopyWorker {
    pub fn new(
        id: usize,
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        plan: Arc<MigrationPlan>,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            plan,
        }
    }

    /// Process items until the queue closes or `stop` is cancelled
    ///
    /// `stop` is only observed while waiting for the next item; a transfer
    /// in progress always runs to the end.
    pub async fn run(self, queue: WorkQueue, stop: CancellationToken) -> WorkerReport {
        let mut report = WorkerReport::default();

        loop {
            let ticket = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                ticket = queue.get() => match ticket {
                    Some(ticket) => ticket,
                    None => break,
                },
            };

            // A panic costs this key, not the tallies of every key before it
            let outcome = match AssertUnwindSafe(self.process(ticket.item()))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(worker = self.id, key = %ticket.item().key, "Copy panicked");
                    CopyOutcome::Failed {
                        reason: "copy panicked".to_string(),
                    }
                }
            };
            report.record(&ticket.item().key, &outcome);
            // Completes the item whatever the outcome
            drop(ticket);
        }

        tracing::debug!(worker = self.id, "Worker stopped");
        report
    }

    /// Skip-check and copy one item, containing any error to this key
    pub async fn process(&self, item: &WorkItem) -> CopyOutcome {
        let outcome = match self.try_process(item).await {
            Ok(outcome) => outcome,
            Err(e) => CopyOutcome::Failed {
                reason: e.to_string(),
            },
        };

        match &outcome {
            CopyOutcome::Copied { bytes } => {
                tracing::info!(worker = self.id, key = %item.key, bytes = bytes, "Copied object");
            }
            CopyOutcome::Skipped => {
                tracing::debug!(
                    worker = self.id,
                    key = %item.key,
                    "Skipping key already present on destination"
                );
            }
            CopyOutcome::Failed { reason } => {
                tracing::error!(worker = self.id, key = %item.key, error = %reason, "Failed to copy object");
            }
        }

        outcome
    }

    async fn try_process(&self, item: &WorkItem) -> Result<CopyOutcome> {
        let plan = &self.plan;
        if key_exists(
            self.destination.as_ref(),
            &plan.destination_bucket,
            &item.key,
            &plan.policy,
        )
        .await?
        {
            return Ok(CopyOutcome::Skipped);
        }

        tracing::debug!(worker = self.id, key = %item.key, size = item.size, "Copying object");

        // A consumed body cannot be replayed, so the whole transfer is the retry unit
        let bytes = retry_with_backoff(
            &plan.policy.retry,
            || with_timeout(plan.transfer_timeout, "transfer", self.transfer(item)),
            is_retryable_error,
        )
        .await?;

        Ok(CopyOutcome::Copied { bytes })
    }

    async fn transfer(&self, item: &WorkItem) -> Result<u64> {
        let plan = &self.plan;
        let body = with_timeout(
            plan.policy.timeout,
            "get_object",
            self.source.get_object_stream(&plan.source_bucket, &item.key),
        )
        .await?;

        self.destination
            .put_object_stream(&plan.destination_bucket, &item.key, body, Some(item.size))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{CallPolicy, RetryConfig};
    use crate::testing::MemoryStore;
    use crate::traits::ObjectRecord;

    fn plan() -> Arc<MigrationPlan> {
        Arc::new(MigrationPlan {
            source_bucket: "src".into(),
            destination_bucket: "dest".into(),
            prefix: String::new(),
            concurrency: 1,
            queue_capacity: 4,
            clear: false,
            policy: CallPolicy::new(
                RetryConfig {
                    max_attempts: 2,
                    initial_backoff_ms: 1,
                    max_backoff_ms: 5,
                },
                None,
            ),
            transfer_timeout: None,
        })
    }

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        let source = Arc::new(MemoryStore::new());
        source.create_bucket("src", false);
        let destination = Arc::new(MemoryStore::new());
        destination.create_bucket("dest", false);
        (source, destination)
    }

    #[tokio::test]
    async fn test_copies_missing_key() {
        let (source, destination) = stores();
        source.insert("src", "a.txt", b"hello world");
        let worker = CopyWorker::new(0, source.clone(), destination.clone(), plan());

        let outcome = worker.process(&ObjectRecord::new("a.txt", 11)).await;
        assert_eq!(outcome, CopyOutcome::Copied { bytes: 11 });
        assert_eq!(&destination.contents("dest")["a.txt"][..], b"hello world");
    }

    #[tokio::test]
    async fn test_present_key_is_never_fetched() {
        let (source, destination) = stores();
        source.insert("src", "a.txt", b"new");
        destination.insert("dest", "a.txt", b"old");
        let worker = CopyWorker::new(0, source.clone(), destination.clone(), plan());

        let outcome = worker.process(&ObjectRecord::new("a.txt", 3)).await;
        assert_eq!(outcome, CopyOutcome::Skipped);
        assert!(source.get_calls().is_empty());
        assert_eq!(&destination.contents("dest")["a.txt"][..], b"old");
    }

    #[tokio::test]
    async fn test_head_failure_is_not_treated_as_absent() {
        let (source, destination) = stores();
        source.insert("src", "a.txt", b"data");
        destination.fail_head("a.txt");
        let worker = CopyWorker::new(0, source.clone(), destination.clone(), plan());

        let outcome = worker.process(&ObjectRecord::new("a.txt", 4)).await;
        assert!(matches!(outcome, CopyOutcome::Failed { .. }));
        assert!(source.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_transient_put_failure_is_retried_then_reported() {
        let (source, destination) = stores();
        source.insert("src", "a.txt", b"data");
        destination.fail_put("a.txt");
        let worker = CopyWorker::new(0, source.clone(), destination.clone(), plan());

        let outcome = worker.process(&ObjectRecord::new("a.txt", 4)).await;
        match outcome {
            CopyOutcome::Failed { reason } => assert!(reason.contains("injected put failure")),
            other => panic!("expected failure, got {other:?}"),
        }
        // Network errors are retried with a fresh source stream each time
        assert_eq!(source.get_calls().len(), 2);
        assert_eq!(destination.put_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_run_completes_items_and_stops_on_close() {
        let (source, destination) = stores();
        source.insert("src", "a", b"1");
        source.insert("src", "b", b"2");
        source.fail_get("b");
        let queue = WorkQueue::new(4);
        queue.put(ObjectRecord::new("a", 1)).await.unwrap();
        queue.put(ObjectRecord::new("b", 1)).await.unwrap();

        let worker = CopyWorker::new(0, source.clone(), destination.clone(), plan());
        let handle = tokio::spawn(worker.run(queue.clone(), CancellationToken::new()));

        queue.join().await;
        queue.close();
        let report = handle.await.unwrap();

        assert_eq!(report.copied, 1);
        assert_eq!(report.failed, vec!["b".to_string()]);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_run_exits_when_cancelled_while_idle() {
        let (source, destination) = stores();
        let queue = WorkQueue::new(1);
        let stop = CancellationToken::new();
        let worker = CopyWorker::new(0, source, destination, plan());
        let handle = tokio::spawn(worker.run(queue, stop.clone()));

        stop.cancel();
        let report = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("idle worker should observe the stop signal")
            .unwrap();
        assert_eq!(report, WorkerReport::default());
    }

    #[tokio::test]
    async fn test_panic_fails_one_key_and_keeps_the_report() {
        let (source, destination) = stores();
        for key in ["a", "b", "c"] {
            source.insert("src", key, b"data");
        }
        source.panic_on_get("b");

        let queue = WorkQueue::new(4);
        for key in ["a", "b", "c"] {
            queue.put(ObjectRecord::new(key, 4)).await.unwrap();
        }

        let worker = CopyWorker::new(0, source.clone(), destination.clone(), plan());
        let handle = tokio::spawn(worker.run(queue.clone(), CancellationToken::new()));

        queue.join().await;
        queue.close();
        let report = handle.await.expect("worker survives a panicking copy");

        assert_eq!(report.copied, 2);
        assert_eq!(report.failed, vec!["b".to_string()]);
        assert_eq!(queue.outstanding(), 0);
    }
}
