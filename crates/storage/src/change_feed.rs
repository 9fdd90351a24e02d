//! Ordered feed of committed row changes
//!
//! Every row written by a commit is published as a [`ChangeRecord`] carrying
//! the new image of the row. Records are published while the table's write
//! lock is held, so every subscriber observes changes in commit order.
//! Downstream filtering (e.g. only Head rows) is the consumer's job.

use evstore_core::{Record, RecordKey};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// A committed change to one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Commit version of the batch that wrote the row
    pub sequence: u64,
    /// Row key
    pub key: RecordKey,
    /// Row contents after the commit
    pub new_image: Record,
}

/// Fan-out of change records to any number of subscribers
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeRecord>>>,
}

impl ChangeFeed {
    /// Create a feed with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes committed from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver a commit's changes to every live subscriber
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub fn publish(&self, changes: &[ChangeRecord]) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| changes.iter().all(|c| tx.send(c.clone()).is_ok()));
        trace!(
            target: "evstore::storage",
            changes = changes.len(),
            subscribers = subscribers.len(),
            "Published changes"
        );
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}
