//! Bounded work queue with completion tracking
//!
//! A fixed number of slots bounds how many items can be enqueued but not yet
//! completed. A slot is taken on [`WorkQueue::put`] and only given back when
//! the [`WorkTicket`] handed to a worker is dropped, so every exit path of a
//! worker (success, error, panic unwind) marks its item complete.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::traits::ObjectRecord;

/// An object waiting to be transferred
pub type WorkItem = ObjectRecord;

#[derive(Debug)]
struct Tracker {
    outstanding: AtomicUsize,
    /// High-water mark of `outstanding`
    peak: AtomicUsize,
    drained: Notify,
}

impl Tracker {
    fn complete(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// A claimed work item; completes the item when dropped
#[derive(Debug)]
pub struct WorkTicket {
    item: WorkItem,
    _slot: OwnedSemaphorePermit,
    tracker: Arc<Tracker>,
}

impl WorkTicket {
    pub fn item(&self) -> &WorkItem {
        &self.item
    }
}

impl Drop for WorkTicket {
    fn drop(&mut self) {
        self.tracker.complete();
    }
}

/// Fixed-capacity FIFO shared by one producer and many workers
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: async_channel::Sender<WorkTicket>,
    rx: async_channel::Receiver<WorkTicket>,
    slots: Arc<Semaphore>,
    tracker: Arc<Tracker>,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` uncompleted items
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = async_channel::bounded(capacity);
        Self {
            tx,
            rx,
            slots: Arc::new(Semaphore::new(capacity)),
            tracker: Arc::new(Tracker {
                outstanding: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items enqueued and not yet completed
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding.load(Ordering::Acquire)
    }

    /// Most items that were ever outstanding at once
    pub fn peak_outstanding(&self) -> usize {
        self.tracker.peak.load(Ordering::Acquire)
    }

    /// Enqueue an item, waiting while all slots are taken
    pub async fn put(&self, item: WorkItem) -> Result<()> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::General("work queue closed".to_string()))?;

        let now = self.tracker.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.tracker.peak.fetch_max(now, Ordering::AcqRel);
        let ticket = WorkTicket {
            item,
            _slot: slot,
            tracker: self.tracker.clone(),
        };

        // A slot was free, so the channel has room; this only fails once closed.
        // The rejected ticket is dropped here, which completes it.
        self.tx
            .send(ticket)
            .await
            .map_err(|_| Error::General("work queue closed".to_string()))
    }

    /// Claim the next item, or `None` once the queue is closed and empty
    pub async fn get(&self) -> Option<WorkTicket> {
        self.rx.recv().await.ok()
    }

    /// Wait until every enqueued item has been completed
    pub async fn join(&self) {
        loop {
            let drained = self.tracker.drained.notified();
            tokio::pin!(drained);
            // Register before checking so a completion in between is not missed
            drained.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Stop accepting items and wake blocked producers and consumers
    ///
    /// Items still buffered are dropped, which completes them.
    pub fn close(&self) {
        self.tx.close();
        self.slots.close();
        while let Ok(ticket) = self.rx.try_recv() {
            drop(ticket);
        }
    }
}
