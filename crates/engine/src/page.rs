//! Pagination types for the read path
//!
//! Event pages are resumed by revision. Stream pages are resumed by an opaque
//! [`PageKey`] whose string form is `stream_id|stream_type|updated_at`, with
//! `updated_at` in RFC 3339 at nanosecond precision.

use chrono::{DateTime, SecondsFormat};
use evstore_core::{
    Error, Event, IndexCursor, Result, StreamId, StreamSummary, StreamType, Timestamp,
};
use std::fmt;
use std::str::FromStr;

/// Range of revisions to read from a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventRange {
    /// First revision, inclusive (default 1)
    pub from: Option<u64>,
    /// Last revision, inclusive (default: head revision at call time)
    pub to: Option<u64>,
    /// Maximum events in the page (default: configured page size)
    pub limit: Option<usize>,
}

impl EventRange {
    /// The whole stream, first page
    pub fn all() -> Self {
        Self::default()
    }

    /// Revisions `from..=to`
    pub fn between(from: u64, to: u64) -> Self {
        EventRange {
            from: Some(from),
            to: Some(to),
            limit: None,
        }
    }

    /// Start at `from`
    pub fn from_revision(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    /// Stop at `to`
    pub fn to_revision(mut self, to: u64) -> Self {
        self.to = Some(to);
        self
    }

    /// Bound the page size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of events
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventPage {
    /// Events in revision order
    pub events: Vec<Event>,
    /// True if the requested range continues past this page
    pub has_more: bool,
    /// Revision of the last event returned; resume at the next one
    pub last_evaluated_revision: Option<u64>,
}

impl EventPage {
    /// Number of events in the page
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if the page holds no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Revision to resume from, if the range continues
    pub fn next_from(&self) -> Option<u64> {
        if self.has_more {
            self.last_evaluated_revision.map(|r| r + 1)
        } else {
            None
        }
    }
}

/// Query over the streams of one type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamQuery {
    /// Only streams updated at or after this time
    pub updated_after: Option<Timestamp>,
    /// Resume after the page that returned this key
    pub page_key: Option<PageKey>,
    /// Maximum streams in the page (default: configured page size)
    pub limit: Option<usize>,
}

impl StreamQuery {
    /// Query all streams of the type
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to streams updated at or after `ts`
    pub fn updated_after(mut self, ts: Timestamp) -> Self {
        self.updated_after = Some(ts);
        self
    }

    /// Resume after `key`
    pub fn page_key(mut self, key: PageKey) -> Self {
        self.page_key = Some(key);
        self
    }

    /// Bound the page size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of stream summaries
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamPage {
    /// Summaries in ascending `UpdatedAt` order
    pub streams: Vec<StreamSummary>,
    /// Key to fetch the next page, if any
    pub next_page_key: Option<PageKey>,
}

impl StreamPage {
    /// True if more streams follow this page
    pub fn has_more(&self) -> bool {
        self.next_page_key.is_some()
    }
}

/// Resume position in a stream-type listing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    /// Last stream returned
    pub stream_id: StreamId,
    /// Partition the listing scans
    pub stream_type: StreamType,
    /// `UpdatedAt` of the last stream returned
    pub updated_at: Timestamp,
}

impl PageKey {
    /// Key positioned after `summary`
    pub fn after(summary: &StreamSummary) -> Self {
        PageKey {
            stream_id: summary.stream_id.clone(),
            stream_type: summary.stream_type.clone(),
            updated_at: summary.updated_at,
        }
    }

    /// Index position the key resumes after
    pub fn cursor(&self) -> IndexCursor {
        IndexCursor {
            updated_at: self.updated_at,
            stream_id: self.stream_id.clone(),
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.stream_id,
            self.stream_type,
            self.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }
}

impl FromStr for PageKey {
    type Err = Error;

    /// Parse `stream_id|stream_type|updated_at`
    ///
    /// Stream ids may themselves contain `|`, so the key is split from the
    /// right. A stream type containing `|` does not survive the round trip.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_argument(format!("malformed page key '{}'", s));

        let (rest, ts) = s.rsplit_once('|').ok_or_else(invalid)?;
        let (id, ty) = rest.rsplit_once('|').ok_or_else(invalid)?;
        let updated_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| invalid())?
            .with_timezone(&chrono::Utc);

        Ok(PageKey {
            stream_id: StreamId::new(id).map_err(|_| invalid())?,
            stream_type: StreamType::new(ty).map_err(|_| invalid())?,
            updated_at,
        })
    }
}
