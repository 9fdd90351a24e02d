//! Subscriber side: idempotent consumption of at-least-once notifications
//!
//! Notifications for one stream arrive in revision order but may repeat.
//! [`Deduplicator`] keeps the highest revision seen per stream, so a redelivered
//! `(StreamId, StreamRevision)` pair is recognized and dropped.

use crate::notification::CommitNotification;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use evstore_core::{Error, Result, StreamId};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{trace, warn};

/// Per-stream high-water mark of delivered revisions
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: DashMap<StreamId, u64>,
}

impl Deduplicator {
    /// Create an empty deduplicator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notification; returns false if it was already seen
    pub fn observe(&self, notification: &CommitNotification) -> bool {
        match self.seen.entry(notification.stream_id.clone()) {
            Entry::Occupied(mut entry) => {
                if notification.stream_revision <= *entry.get() {
                    return false;
                }
                entry.insert(notification.stream_revision);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(notification.stream_revision);
                true
            }
        }
    }

    /// True if the notification was already observed
    pub fn is_duplicate(&self, notification: &CommitNotification) -> bool {
        self.seen
            .get(&notification.stream_id)
            .is_some_and(|hw| notification.stream_revision <= *hw)
    }

    /// Highest revision observed for a stream
    pub fn last_revision(&self, stream_id: &StreamId) -> Option<u64> {
        self.seen.get(stream_id).map(|hw| *hw)
    }

    /// Number of streams tracked
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True if nothing was observed yet
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// A de-duplicating subscription to a broadcast channel
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<CommitNotification>,
    dedup: Deduplicator,
    duplicates: u64,
}

impl Subscription {
    /// Wrap a raw broadcast receiver
    pub fn new(rx: broadcast::Receiver<CommitNotification>) -> Self {
        Subscription {
            rx,
            dedup: Deduplicator::new(),
            duplicates: 0,
        }
    }

    /// Next notification not seen before
    ///
    /// Returns `Ok(None)` once the publisher is gone.
    ///
    /// # Errors
    ///
    /// `NotificationDeliveryFailure` if the subscriber fell behind and
    /// notifications were dropped. The subscriber should resynchronize through
    /// the read path; the subscription stays usable.
    pub async fn recv(&mut self) -> Result<Option<CommitNotification>> {
        loop {
            match self.rx.recv().await {
                Ok(notification) => {
                    if let Some(n) = self.accept(notification) {
                        return Ok(Some(n));
                    }
                }
                Err(RecvError::Closed) => return Ok(None),
                Err(RecvError::Lagged(skipped)) => return Err(lagged(skipped)),
            }
        }
    }

    /// Next buffered notification not seen before, without waiting
    pub fn try_recv(&mut self) -> Result<Option<CommitNotification>> {
        loop {
            match self.rx.try_recv() {
                Ok(notification) => {
                    if let Some(n) = self.accept(notification) {
                        return Ok(Some(n));
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(None),
                Err(TryRecvError::Lagged(skipped)) => return Err(lagged(skipped)),
            }
        }
    }

    /// Redeliveries dropped so far
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    fn accept(&mut self, notification: CommitNotification) -> Option<CommitNotification> {
        if self.dedup.observe(&notification) {
            Some(notification)
        } else {
            self.duplicates += 1;
            trace!(
                target: "evstore::subscriber",
                stream_id = %notification.stream_id,
                revision = notification.stream_revision,
                "Dropped duplicate notification"
            );
            None
        }
    }
}

fn lagged(skipped: u64) -> Error {
    warn!(
        target: "evstore::subscriber",
        skipped,
        "Subscriber lagged, notifications dropped"
    );
    Error::NotificationDeliveryFailure(format!(
        "subscriber lagged behind by {} notifications",
        skipped
    ))
}
