//! Storage abstraction
//!
//! The [`Storage`] trait is the seam between the transaction layer and the
//! physical table. It lets the in-memory table, the WAL-backed table and test
//! doubles (fault injection) be swapped without touching the engine.

use crate::error::Result;
use crate::record::{Record, RecordKey, StreamSummary};
use crate::types::{Ordinal, StreamId, StreamType, Timestamp};

/// Position within the secondary index, used to resume a paginated query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexCursor {
    /// `UpdatedAt` of the last entry returned
    pub updated_at: Timestamp,
    /// Stream id of the last entry returned (tie breaker)
    pub stream_id: StreamId,
}

impl From<&StreamSummary> for IndexCursor {
    fn from(summary: &StreamSummary) -> Self {
        IndexCursor {
            updated_at: summary.updated_at,
            stream_id: summary.stream_id.clone(),
        }
    }
}

/// Scan direction over the `UpdatedAt` sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexOrder {
    /// Oldest update first
    #[default]
    Ascending,
    /// Most recent update first
    Descending,
}

/// Query against the `(StreamType, UpdatedAt)` secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    /// Partition to scan
    pub stream_type: StreamType,
    /// Only entries with `updated_at >= updated_after`
    pub updated_after: Option<Timestamp>,
    /// Resume strictly after this position (in scan direction)
    pub start_after: Option<IndexCursor>,
    /// Scan direction
    pub order: IndexOrder,
    /// Maximum number of entries
    pub limit: usize,
}

impl IndexQuery {
    /// Query a whole partition in ascending order
    pub fn new(stream_type: StreamType, limit: usize) -> Self {
        IndexQuery {
            stream_type,
            updated_after: None,
            start_after: None,
            order: IndexOrder::Ascending,
            limit,
        }
    }

    /// Scan most recent first
    pub fn descending(mut self) -> Self {
        self.order = IndexOrder::Descending;
        self
    }

    /// Restrict to entries updated at or after `ts`
    pub fn updated_after(mut self, ts: Timestamp) -> Self {
        self.updated_after = Some(ts);
        self
    }

    /// Resume after a cursor
    pub fn start_after(mut self, cursor: IndexCursor) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

/// Storage abstraction for the sorted stream table
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait Storage: Send + Sync {
    /// Point lookup of a single row
    fn get(&self, key: &RecordKey) -> Result<Option<Record>>;

    /// Rows of one stream with `from <= ordinal <= to`, in ordinal order,
    /// at most `limit` of them
    fn scan_stream(
        &self,
        stream_id: &StreamId,
        from: Ordinal,
        to: Ordinal,
        limit: usize,
    ) -> Result<Vec<(RecordKey, Record)>>;

    /// Query the secondary index
    ///
    /// The index is derived from Head records and may lag behind them.
    fn query_index(&self, query: &IndexQuery) -> Result<Vec<StreamSummary>>;

    /// Highest commit version applied so far
    fn current_version(&self) -> u64;

    /// Apply a batch of row writes atomically
    ///
    /// Either every write becomes visible (and durable, for durable tables) or
    /// none does. Returns the commit version assigned to the batch.
    fn apply_batch(&self, writes: Vec<(RecordKey, Record)>) -> Result<u64>;
}
