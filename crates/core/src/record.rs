//! Physical record layout of the event store
//!
//! A stream is stored as a contiguous range of rows in one sorted keyspace:
//!
//! ```text
//! (stream_id, 0)  -> Head  { stream_type, stream_revision, created_at, updated_at }
//! (stream_id, 1)  -> Event { revision: 1, event_type, payload, created_at }
//! (stream_id, 2)  -> Event { revision: 2, ... }
//! ...
//! (stream_id, N)  -> Event { revision: N, ... }      N == head.stream_revision
//! ```
//!
//! Co-locating the Head pointer with the events lets one atomic batch advance
//! both, so a reader never sees an event without a head that covers it, nor a
//! head revision without its event.

use crate::error::Result;
use crate::limits::Limits;
use crate::types::{Ordinal, StreamId, StreamType, Timestamp};
use crate::validation::{validate_event_type, validate_payload};
use serde::{Deserialize, Serialize};

/// Primary key of a row: `(stream_id, ordinal)`
///
/// Derived ordering compares the stream id first and the ordinal numerically
/// second, so all rows of a stream are adjacent with the Head first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Owning stream
    pub stream_id: StreamId,
    /// Position within the stream
    pub ordinal: Ordinal,
}

impl RecordKey {
    /// Key of a stream's Head record
    pub fn head(stream_id: StreamId) -> Self {
        RecordKey {
            stream_id,
            ordinal: Ordinal::HEAD,
        }
    }

    /// Key of the event appended at `revision`
    pub fn event(stream_id: StreamId, revision: u64) -> Self {
        RecordKey {
            stream_id,
            ordinal: Ordinal::event(revision),
        }
    }

    /// True if this key addresses a Head record
    pub fn is_head(&self) -> bool {
        self.ordinal.is_head()
    }
}

/// Metadata row holding a stream's identity and current revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRecord {
    /// Logical category of the stream
    pub stream_type: StreamType,
    /// Number of events appended so far
    pub stream_revision: u64,
    /// Time the stream was created (immutable)
    pub created_at: Timestamp,
    /// Time of the last successful append
    pub updated_at: Timestamp,
}

/// Immutable event row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position of the event within its stream
    pub revision: u64,
    /// Consumer-defined event category
    pub event_type: String,
    /// Opaque serialized payload
    pub payload: Vec<u8>,
    /// Commit time of the append that wrote this event
    pub created_at: Timestamp,
}

/// A stored row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    /// Head record at ordinal 0
    Head(HeadRecord),
    /// Event record at ordinal >= 1
    Event(EventRecord),
}

impl Record {
    /// Borrow as a Head record, if it is one
    pub fn as_head(&self) -> Option<&HeadRecord> {
        match self {
            Record::Head(head) => Some(head),
            Record::Event(_) => None,
        }
    }

    /// Borrow as an Event record, if it is one
    pub fn as_event(&self) -> Option<&EventRecord> {
        match self {
            Record::Event(event) => Some(event),
            Record::Head(_) => None,
        }
    }
}

/// An event submitted for append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Tells consumers how to interpret the payload
    pub event_type: String,
    /// Opaque serialized payload, usually JSON
    pub payload: Vec<u8>,
}

impl NewEvent {
    /// Create a new event
    pub fn new(event_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        NewEvent {
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }

    /// Check event type and payload size against limits
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        validate_event_type(&self.event_type, limits)?;
        validate_payload(&self.payload, limits)?;
        Ok(())
    }

    /// Turn into the stored row for `revision`
    pub fn into_record(self, revision: u64, created_at: Timestamp) -> EventRecord {
        EventRecord {
            revision,
            event_type: self.event_type,
            payload: self.payload,
            created_at,
        }
    }
}

/// Authoritative view of a stream, read from its Head record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Stream identifier
    pub stream_id: StreamId,
    /// Logical category
    pub stream_type: StreamType,
    /// Current revision (number of events)
    pub revision: u64,
    /// Creation time
    pub created_at: Timestamp,
    /// Time of the last append
    pub updated_at: Timestamp,
}

impl Stream {
    /// Build from a stream id and its Head record
    pub fn from_head(stream_id: StreamId, head: &HeadRecord) -> Self {
        Stream {
            stream_id,
            stream_type: head.stream_type.clone(),
            revision: head.stream_revision,
            created_at: head.created_at,
            updated_at: head.updated_at,
        }
    }
}

/// An event as returned by the read path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Owning stream
    pub stream_id: StreamId,
    /// Position within the stream
    pub revision: u64,
    /// Consumer-defined category
    pub event_type: String,
    /// Opaque payload
    pub payload: Vec<u8>,
    /// Commit time
    pub created_at: Timestamp,
}

impl Event {
    /// Build from a stream id and a stored Event record
    pub fn from_record(stream_id: StreamId, record: EventRecord) -> Self {
        Event {
            stream_id,
            revision: record.revision,
            event_type: record.event_type,
            payload: record.payload,
            created_at: record.created_at,
        }
    }
}

/// Secondary-index projection of a stream
///
/// Derived from Head records and possibly stale; never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    /// Stream identifier
    pub stream_id: StreamId,
    /// Logical category (index partition key)
    pub stream_type: StreamType,
    /// Revision as of the indexed Head write
    pub revision: u64,
    /// Creation time
    pub created_at: Timestamp,
    /// Index sort key
    pub updated_at: Timestamp,
}
