//! Secondary index over Head records
//!
//! `StreamIndex` maps `(StreamType, UpdatedAt, StreamId)` to the revision and
//! creation time of each stream, so recently active streams of a type can be
//! discovered without scanning the primary table.
//!
//! The index is a projection: it is rebuilt from Head records on recovery and
//! updated whenever a Head record is written. Callers must not use it for
//! concurrency decisions.

use evstore_core::{
    HeadRecord, IndexOrder, IndexQuery, StreamId, StreamSummary, StreamType, Timestamp,
};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexValue {
    revision: u64,
    created_at: Timestamp,
}

/// `UpdatedAt` → streams updated at that instant
type Partition = BTreeMap<Timestamp, BTreeMap<StreamId, IndexValue>>;

/// Secondary index: StreamType → (UpdatedAt, StreamId) → revision
#[derive(Debug, Default)]
pub struct StreamIndex {
    partitions: HashMap<StreamType, Partition>,
    /// Current index position of every stream, for replacing stale entries
    positions: HashMap<StreamId, (StreamType, Timestamp)>,
}

impl StreamIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move the entry for a stream after its Head was written
    pub fn upsert(&mut self, stream_id: &StreamId, head: &HeadRecord) {
        if let Some((old_type, old_ts)) = self.positions.remove(stream_id) {
            self.remove_entry(&old_type, old_ts, stream_id);
        }

        self.partitions
            .entry(head.stream_type.clone())
            .or_default()
            .entry(head.updated_at)
            .or_default()
            .insert(
                stream_id.clone(),
                IndexValue {
                    revision: head.stream_revision,
                    created_at: head.created_at,
                },
            );
        self.positions
            .insert(stream_id.clone(), (head.stream_type.clone(), head.updated_at));
    }

    fn remove_entry(&mut self, stream_type: &StreamType, ts: Timestamp, stream_id: &StreamId) {
        let Some(partition) = self.partitions.get_mut(stream_type) else {
            return;
        };
        if let Some(ids) = partition.get_mut(&ts) {
            ids.remove(stream_id);
            if ids.is_empty() {
                partition.remove(&ts);
            }
        }
        if partition.is_empty() {
            self.partitions.remove(stream_type);
        }
    }

    /// Run a query against one partition
    pub fn query(&self, query: &IndexQuery) -> Vec<StreamSummary> {
        let Some(partition) = self.partitions.get(&query.stream_type) else {
            return Vec::new();
        };
        if query.limit == 0 {
            return Vec::new();
        }

        match query.order {
            IndexOrder::Ascending => Self::scan_ascending(partition, query),
            IndexOrder::Descending => Self::scan_descending(partition, query),
        }
    }

    fn scan_ascending(partition: &Partition, query: &IndexQuery) -> Vec<StreamSummary> {
        let cursor = query.start_after.as_ref();
        let lower = match (query.updated_after, cursor.map(|c| c.updated_at)) {
            (Some(a), Some(b)) => Bound::Included(a.max(b)),
            (Some(a), None) => Bound::Included(a),
            (None, Some(b)) => Bound::Included(b),
            (None, None) => Bound::Unbounded,
        };

        let mut out = Vec::with_capacity(query.limit.min(64));
        for (ts, ids) in partition.range((lower, Bound::Unbounded)) {
            for (id, value) in ids {
                if cursor.is_some_and(|c| (ts, id) <= (&c.updated_at, &c.stream_id)) {
                    continue;
                }
                out.push(summary(&query.stream_type, *ts, id, value));
                if out.len() == query.limit {
                    return out;
                }
            }
        }
        out
    }

    fn scan_descending(partition: &Partition, query: &IndexQuery) -> Vec<StreamSummary> {
        let cursor = query.start_after.as_ref();
        let upper = match cursor {
            Some(c) => Bound::Included(c.updated_at),
            None => Bound::Unbounded,
        };

        let mut out = Vec::with_capacity(query.limit.min(64));
        for (ts, ids) in partition.range((Bound::Unbounded, upper)).rev() {
            if query.updated_after.is_some_and(|after| *ts < after) {
                break;
            }
            for (id, value) in ids.iter().rev() {
                if cursor.is_some_and(|c| (ts, id) >= (&c.updated_at, &c.stream_id)) {
                    continue;
                }
                out.push(summary(&query.stream_type, *ts, id, value));
                if out.len() == query.limit {
                    return out;
                }
            }
        }
        out
    }

    /// Number of indexed streams
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn summary(stream_type: &StreamType, ts: Timestamp, id: &StreamId, value: &IndexValue) -> StreamSummary {
    StreamSummary {
        stream_id: id.clone(),
        stream_type: stream_type.clone(),
        revision: value.revision,
        created_at: value.created_at,
        updated_at: ts,
    }
}
