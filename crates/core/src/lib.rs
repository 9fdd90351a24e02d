//! Core types and traits for evstore
//!
//! This crate defines the foundational types used throughout the system:
//! - StreamId / StreamType / Ordinal: stream identity and record positions
//! - RecordKey / Record: the physical row layout (Head at ordinal 0, events after)
//! - Stream / Event / StreamSummary: read-path views
//! - Error: error taxonomy shared by every crate
//! - Limits + validation: identifier and payload constraints
//! - Storage: trait seam between the transaction layer and the table

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod limits;
pub mod record;
pub mod traits;
pub mod types;
pub mod validation;

pub use error::{Error, Result};
pub use limits::Limits;
pub use record::{Event, EventRecord, HeadRecord, NewEvent, Record, RecordKey, Stream, StreamSummary};
pub use traits::{IndexCursor, IndexOrder, IndexQuery, Storage};
pub use types::{Ordinal, StreamId, StreamType, Timestamp};
