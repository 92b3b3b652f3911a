//! Pipeline coordinator
//!
//! Drives one migration run through its phases: check both buckets are
//! reachable, optionally clear the destination, fill the bounded queue from
//! the source listing, drain it, then stop the workers and collect their
//! reports.

use std::fmt;
use std::sync::Arc;

use futures::TryStreamExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clear::{ClearReport, clear_bucket};
use crate::error::{Error, Result};
use crate::lister::list_records;
use crate::plan::MigrationPlan;
use crate::queue::WorkQueue;
use crate::traits::ObjectStore;
use crate::worker::{CopyWorker, WorkerReport};

/// Coordinator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Checking,
    Clearing,
    Filling,
    Draining,
    ShuttingDown,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Checking => "checking",
            Phase::Clearing => "clearing",
            Phase::Filling => "filling",
            Phase::Draining => "draining",
            Phase::ShuttingDown => "shutting-down",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Aggregate result of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub listed: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
    pub bytes_copied: u64,
    /// Workers that died; their tallies are missing from the counts above
    pub panicked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<ClearReport>,
}

impl RunOutcome {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// True when no key failed and every worker reported back
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.panicked == 0
    }

    fn merge(&mut self, report: WorkerReport) {
        self.copied += report.copied;
        self.skipped += report.skipped;
        self.bytes_copied += report.bytes_copied;
        self.failed.extend(report.failed);
    }
}

/// Runs a [`MigrationPlan`] between two stores
pub struct Migrator {
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    plan: Arc<MigrationPlan>,
    phase: Phase,
    shutdown: CancellationToken,
    peak_outstanding: usize,
}

impl Migrator {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        plan: MigrationPlan,
    ) -> Self {
        Self {
            source,
            destination,
            plan: Arc::new(plan),
            phase: Phase::Idle,
            shutdown: CancellationToken::new(),
            peak_outstanding: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Token that stops the run early when cancelled
    ///
    /// Listing stops and idle workers exit, but transfers already in progress
    /// are finished so no partial upload is left behind. The run then
    /// returns [`Error::Interrupted`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Most items that were enqueued and uncompleted at once in the last run
    pub fn peak_outstanding(&self) -> usize {
        self.peak_outstanding
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "Pipeline phase change");
        self.phase = phase;
    }

    /// Run the migration to completion
    ///
    /// Per-key failures are recorded in the outcome. Unreachable buckets,
    /// clear and listing failures abort the run and are returned as errors.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        self.plan.validate()?;
        let mut outcome = RunOutcome::default();

        self.enter(Phase::Checking);
        check_bucket(
            self.source.as_ref(),
            "source",
            &self.plan.source_bucket,
            &self.plan,
        )
        .await?;
        check_bucket(
            self.destination.as_ref(),
            "destination",
            &self.plan.destination_bucket,
            &self.plan,
        )
        .await?;

        if self.plan.clear {
            self.enter(Phase::Clearing);
            tracing::info!(bucket = %self.plan.destination_bucket, "Clearing destination bucket");
            let report = clear_bucket(
                self.destination.as_ref(),
                &self.plan.destination_bucket,
                &self.plan.policy,
            )
            .await?;
            outcome.cleared = Some(report);
        }

        let queue = WorkQueue::new(self.plan.queue_capacity);
        let shutdown = self.shutdown.clone();
        let stop = shutdown.child_token();
        let mut workers = JoinSet::new();

        tracing::debug!(concurrency = self.plan.concurrency, "Starting copy workers");
        for id in 0..self.plan.concurrency {
            let worker = CopyWorker::new(
                id,
                self.source.clone(),
                self.destination.clone(),
                self.plan.clone(),
            );
            workers.spawn(worker.run(queue.clone(), stop.clone()));
        }

        self.enter(Phase::Filling);
        let mut filled = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(interrupted()),
            filled = self.fill(&queue) => filled,
        };

        if let Ok(listed) = &filled {
            outcome.listed = *listed;
            self.enter(Phase::Draining);
            let drained = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                _ = queue.join() => true,
            };
            if drained {
                tracing::info!("Done processing queue");
            } else {
                filled = Err(interrupted());
            }
        }

        match &filled {
            Ok(_) => {}
            Err(Error::Interrupted(_)) => {
                tracing::warn!("Shutdown requested, finishing transfers in progress");
                queue.close();
            }
            Err(e) => {
                tracing::error!(error = %e, "Listing source failed, stopping workers");
                queue.close();
            }
        }

        self.enter(Phase::ShuttingDown);
        stop.cancel();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => outcome.merge(report),
                Err(e) => {
                    tracing::error!(error = %e, "Copy worker died");
                    outcome.panicked += 1;
                }
            }
        }
        self.peak_outstanding = queue.peak_outstanding();
        self.enter(Phase::Done);

        tracing::info!(
            copied = outcome.copied,
            skipped = outcome.skipped,
            failed = outcome.failed_count(),
            peak_queued = self.peak_outstanding,
            "Migration finished"
        );
        filled?;
        Ok(outcome)
    }

    /// Enqueue every listed record, returning how many were listed
    async fn fill(&self, queue: &WorkQueue) -> Result<usize> {
        let plan = &self.plan;
        let mut records = list_records(
            self.source.as_ref(),
            &plan.source_bucket,
            &plan.prefix,
            &plan.policy,
        );

        let mut listed = 0;
        while let Some(record) = records.try_next().await? {
            listed += 1;
            queue.put(record).await.map_err(|e| {
                Error::General(format!("failed to enqueue after {listed} objects: {e}"))
            })?;
        }
        Ok(listed)
    }
}

/// Fail fast on a missing bucket or rejected credentials
async fn check_bucket(
    store: &dyn ObjectStore,
    side: &str,
    bucket: &str,
    plan: &MigrationPlan,
) -> Result<()> {
    plan.policy
        .call("head_bucket", || store.head_bucket(bucket))
        .await
        .map_err(|e| {
            tracing::error!(side, bucket, error = %e, "Bucket is not reachable");
            match e {
                Error::NotFound(_) => Error::NotFound(format!("{side} bucket {bucket}")),
                Error::Auth(msg) => Error::Auth(format!("{side} bucket {bucket}: {msg}")),
                other => other,
            }
        })
}

fn interrupted() -> Error {
    Error::Interrupted("shutdown requested".to_string())
}
