//! evstore - embedded event-sourcing store
//!
//! Each stream is a sequence of immutable events plus one Head record holding
//! the stream's type and current revision. Appends are guarded by optimistic
//! concurrency on that revision, and every committed Head change is turned
//! into a `{StreamId, StreamType, StreamRevision}` notification for
//! downstream consumers.
//!
//! # Quick Start
//!
//! ```ignore
//! use evstore::{Database, EventRange, NewEvent, StreamId, StreamType};
//!
//! let db = Database::ephemeral();
//! let id = StreamId::new("order-42")?;
//! let order = StreamType::new("Order")?;
//!
//! db.append(&id, &order, 0, NewEvent::new("OrderPlaced", "{}"))?;
//! let page = db.read_events(&id, EventRange::all())?;
//! ```
//!
//! # Architecture
//!
//! - `evstore-core`: identifiers, records, errors, the `Storage` trait
//! - `evstore-storage`: the stream table, its type index, WAL and change feed
//! - `evstore-concurrency`: conditional-write transactions
//! - `evstore-engine`: `Database` with the append and read paths
//! - `evstore-notify`: the change-notification pipeline

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use evstore_core::{
    Error, Event, Limits, NewEvent, Result, Stream, StreamId, StreamSummary, StreamType,
};
pub use evstore_engine::{
    AppMode, Backoff, Clock, Database, DatabaseOptions, EventPage, EventRange, EventStoreConfig,
    InMemoryParameters, ManualClock, PageKey, ParameterSource, RetryConfig, StreamPage,
    StreamQuery, SystemClock, TomlParameters,
};
pub use evstore_notify::{
    BroadcastPublisher, Checkpoint, CommitNotification, Deduplicator, NotificationPipeline,
    PipelineConfig, PipelineHandle, PipelineStats, Publisher, Subscription,
    DEFAULT_CHANNEL_CAPACITY,
};
pub use evstore_storage::{ChangeRecord, DurabilityMode};
