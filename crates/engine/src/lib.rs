//! Event store engine
//!
//! This crate orchestrates the lower layers:
//! - Database: open (with WAL recovery) or ephemeral, plus the transaction API
//! - Append path: optimistic concurrency over the stream Head record
//! - Read path: head lookups, paginated event reads, index-backed discovery
//! - Configuration: application mode and parameter loading
//!
//! The engine is the only component that knows about:
//! - Retrying transient storage failures
//! - Wall-clock time for `CreatedAt` / `UpdatedAt`

#![warn(missing_docs)]
#![warn(clippy::all)]

mod append;
pub mod clock;
pub mod database;
pub mod page;
mod read;

pub use clock::{Clock, ManualClock, SystemClock};
pub use database::{
    AppMode, Backoff, Database, DatabaseOptions, EventStoreConfig, InMemoryParameters,
    ParameterSource, RetryConfig, TomlParameters,
};
pub use page::{EventPage, EventRange, PageKey, StreamPage, StreamQuery};
