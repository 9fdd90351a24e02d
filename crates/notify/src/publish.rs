//! Publish stage: hand notifications to a fan-out transport
//!
//! The [`Publisher`] trait is the seam between the pipeline and the
//! transport, so a broker or webhook can replace the in-process
//! [`BroadcastPublisher`] without touching the append path.

use crate::notification::CommitNotification;
use crate::subscriber::Subscription;
use evstore_core::Result;
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of notifications buffered for slow subscribers
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out transport for commit notifications
///
/// Delivery is at-least-once: the pipeline retries a failed `publish`, so a
/// transport may see the same notification more than once.
pub trait Publisher: Send + Sync {
    /// Deliver one notification
    ///
    /// # Errors
    ///
    /// `NotificationDeliveryFailure` for transport failures worth retrying.
    fn publish(&self, notification: &CommitNotification) -> Result<()>;

    /// Channel identifier, for logging
    fn channel(&self) -> &str;
}

/// In-process pub/sub over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    channel: String,
    tx: broadcast::Sender<CommitNotification>,
}

impl BroadcastPublisher {
    /// Create a publisher buffering up to `capacity` notifications per subscriber
    pub fn new(channel: impl Into<String>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        BroadcastPublisher {
            channel: channel.into(),
            tx,
        }
    }

    /// Subscribe to notifications published from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.tx.subscribe())
    }

    /// Raw receiver without de-duplication
    pub fn subscribe_raw(&self) -> broadcast::Receiver<CommitNotification> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, notification: &CommitNotification) -> Result<()> {
        match self.tx.send(notification.clone()) {
            Ok(receivers) => {
                trace!(
                    target: "evstore::pipeline",
                    channel = %self.channel,
                    stream_id = %notification.stream_id,
                    revision = notification.stream_revision,
                    receivers,
                    "Notification published"
                );
                Ok(())
            }
            // No subscribers: nothing to deliver to
            Err(_) => Ok(()),
        }
    }

    fn channel(&self) -> &str {
        &self.channel
    }
}
