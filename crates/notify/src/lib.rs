//! Change notification pipeline for evstore
//!
//! This crate turns the table's row-level change feed into commit
//! notifications:
//! - filter: keep only Head record changes that advanced a stream
//! - transform: project them into `{StreamId, StreamType, StreamRevision}`
//! - publish: deliver through a [`Publisher`], retrying until shutdown
//! - checkpoint: persist the last handled commit so a restart catches up
//! - subscriber: de-duplicate at-least-once deliveries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod filter;
pub mod notification;
pub mod pipeline;
pub mod publish;
pub mod subscriber;
pub mod transform;

pub use checkpoint::{Checkpoint, CHECKPOINT_FILE_NAME};
pub use notification::CommitNotification;
pub use pipeline::{NotificationPipeline, PipelineConfig, PipelineHandle, PipelineStats};
pub use publish::{BroadcastPublisher, Publisher, DEFAULT_CHANNEL_CAPACITY};
pub use subscriber::{Deduplicator, Subscription};
