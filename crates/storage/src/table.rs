//! Sorted stream table
//!
//! This module implements the [`Storage`] trait on a single ordered keyspace:
//! - `BTreeMap<RecordKey, Record>` holds Head and Event rows, sorted by
//!   `(stream_id, ordinal)` so a stream's rows are contiguous
//! - `StreamIndex` is the `(StreamType, UpdatedAt)` secondary index, updated
//!   in the same critical section as the Head rows it projects
//! - `ChangeFeed` publishes the new image of every written row in commit order
//! - An optional [`WriteAheadLog`] makes commits durable before they are visible
//!
//! Lock order is always `data` then `index`. Readers take read locks only.

use crate::change_feed::{ChangeFeed, ChangeRecord};
use crate::index::StreamIndex;
use crate::wal::{CommitBatch, DurabilityMode, WriteAheadLog, WAL_FILE_NAME};
use evstore_core::{
    IndexQuery, Ordinal, Record, RecordKey, Result, Storage, StreamId, StreamSummary,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Thread-safe sorted table of stream rows
pub struct StreamTable {
    data: RwLock<BTreeMap<RecordKey, Record>>,
    index: RwLock<StreamIndex>,
    feed: ChangeFeed,
    wal: Option<Mutex<WriteAheadLog>>,
    /// Highest commit version applied
    version: AtomicU64,
}

impl StreamTable {
    /// Create an in-memory table with no durability
    pub fn ephemeral() -> Self {
        StreamTable {
            data: RwLock::new(BTreeMap::new()),
            index: RwLock::new(StreamIndex::new()),
            feed: ChangeFeed::new(),
            wal: None,
            version: AtomicU64::new(0),
        }
    }

    /// Open a durable table in `dir`, replaying its WAL
    ///
    /// Rows and the secondary index are rebuilt from the log. Replayed commits
    /// are not re-published on the change feed; use [`changes_since`] to
    /// read them back.
    ///
    /// [`changes_since`]: StreamTable::changes_since
    pub fn open<P: AsRef<Path>>(dir: P, mode: DurabilityMode) -> Result<Self> {
        let path = dir.as_ref().join(WAL_FILE_NAME);
        let (wal, replay) = WriteAheadLog::open(&path, mode)?;

        let mut data = BTreeMap::new();
        let mut index = StreamIndex::new();
        let mut version = 0;
        for batch in replay.batches {
            version = version.max(batch.version);
            for (key, record) in batch.writes {
                if let Record::Head(head) = &record {
                    index.upsert(&key.stream_id, head);
                }
                data.insert(key, record);
            }
        }

        info!(
            target: "evstore::storage",
            path = %path.display(),
            rows = data.len(),
            streams = index.len(),
            version,
            truncated_bytes = replay.truncated_bytes,
            durability = %mode,
            "Stream table recovered"
        );

        Ok(StreamTable {
            data: RwLock::new(data),
            index: RwLock::new(index),
            feed: ChangeFeed::new(),
            wal: Some(Mutex::new(wal)),
            version: AtomicU64::new(version),
        })
    }

    /// Subscribe to row changes committed from now on
    pub fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        self.feed.subscribe()
    }

    /// Changes committed after `version`, rebuilt from the WAL
    ///
    /// Records come back in commit order with the same shape the live feed
    /// delivers, so a consumer can catch up on commits it missed (e.g.
    /// across a restart) before switching to [`subscribe_changes`]. An
    /// ephemeral table keeps no history and returns nothing.
    ///
    /// [`subscribe_changes`]: StreamTable::subscribe_changes
    pub fn changes_since(&self, version: u64) -> Result<Vec<ChangeRecord>> {
        let wal = match &self.wal {
            Some(wal) => wal,
            None => return Ok(Vec::new()),
        };
        let batches = wal.lock().read_batches()?;
        let changes: Vec<ChangeRecord> = batches
            .into_iter()
            .filter(|batch| batch.version > version)
            .flat_map(|batch| {
                let sequence = batch.version;
                batch.writes.into_iter().map(move |(key, new_image)| ChangeRecord {
                    sequence,
                    key,
                    new_image,
                })
            })
            .collect();
        debug!(
            target: "evstore::storage",
            after = version,
            changes = changes.len(),
            "Changes read back from WAL"
        );
        Ok(changes)
    }

    /// The table's change feed
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Whether commits are persisted to a WAL
    pub fn is_durable(&self) -> bool {
        self.wal.is_some()
    }

    /// Total number of rows (Heads and Events)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of streams in the secondary index
    pub fn stream_count(&self) -> usize {
        self.index.read().len()
    }

    /// Force buffered WAL writes to disk
    pub fn sync(&self) -> Result<()> {
        match &self.wal {
            Some(wal) => wal.lock().sync(),
            None => Ok(()),
        }
    }
}

impl Storage for StreamTable {
    fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn scan_stream(
        &self,
        stream_id: &StreamId,
        from: Ordinal,
        to: Ordinal,
        limit: usize,
    ) -> Result<Vec<(RecordKey, Record)>> {
        if from > to || limit == 0 {
            return Ok(Vec::new());
        }
        let start = RecordKey {
            stream_id: stream_id.clone(),
            ordinal: from,
        };
        let end = RecordKey {
            stream_id: stream_id.clone(),
            ordinal: to,
        };
        let data = self.data.read();
        Ok(data
            .range(start..=end)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn query_index(&self, query: &IndexQuery) -> Result<Vec<StreamSummary>> {
        Ok(self.index.read().query(query))
    }

    fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn apply_batch(&self, writes: Vec<(RecordKey, Record)>) -> Result<u64> {
        let mut data = self.data.write();
        let mut index = self.index.write();

        let version = self.version.load(Ordering::Acquire) + 1;
        let batch = CommitBatch { version, writes };

        // Log first: a failed append leaves the table untouched
        if let Some(wal) = &self.wal {
            wal.lock().append(&batch)?;
        }

        let mut changes = Vec::with_capacity(batch.writes.len());
        for (key, record) in batch.writes {
            if let Record::Head(head) = &record {
                index.upsert(&key.stream_id, head);
            }
            data.insert(key.clone(), record.clone());
            changes.push(ChangeRecord {
                sequence: version,
                key,
                new_image: record,
            });
        }
        self.version.store(version, Ordering::Release);
        self.feed.publish(&changes);

        debug!(
            target: "evstore::storage",
            version,
            rows = changes.len(),
            "Batch applied"
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use evstore_core::{HeadRecord, NewEvent, StreamType};

    fn sid(s: &str) -> StreamId {
        StreamId::new(s).unwrap()
    }

    fn append_rows(id: &StreamId, revision: u64) -> Vec<(RecordKey, Record)> {
        let now = Utc::now();
        vec![
            (
                RecordKey::event(id.clone(), revision),
                Record::Event(NewEvent::new("E", "").into_record(revision, now)),
            ),
            (
                RecordKey::head(id.clone()),
                Record::Head(HeadRecord {
                    stream_type: StreamType::new("Order").unwrap(),
                    stream_revision: revision,
                    created_at: now,
                    updated_at: now,
                }),
            ),
        ]
    }

    #[test]
    fn test_apply_batch_assigns_increasing_versions() {
        let table = StreamTable::ephemeral();
        let id = sid("a");
        assert_eq!(table.current_version(), 0);
        assert_eq!(table.apply_batch(append_rows(&id, 1)).unwrap(), 1);
        assert_eq!(table.apply_batch(append_rows(&id, 2)).unwrap(), 2);
        assert_eq!(table.current_version(), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.stream_count(), 1);
    }

    #[test]
    fn test_scan_stream_is_bounded_to_one_stream() {
        let table = StreamTable::ephemeral();
        for rev in 1..=3 {
            table.apply_batch(append_rows(&sid("a"), rev)).unwrap();
        }
        table.apply_batch(append_rows(&sid("b"), 1)).unwrap();

        let rows = table
            .scan_stream(&sid("a"), Ordinal::FIRST_EVENT, Ordinal::MAX, 100)
            .unwrap();
        let ordinals: Vec<u64> = rows.iter().map(|(k, _)| k.ordinal.as_u64()).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);

        let limited = table
            .scan_stream(&sid("a"), Ordinal::event(2), Ordinal::MAX, 1)
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].0.ordinal, Ordinal::event(2));

        let empty = table
            .scan_stream(&sid("a"), Ordinal::event(3), Ordinal::event(2), 10)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_head_writes_update_index() {
        let table = StreamTable::ephemeral();
        table.apply_batch(append_rows(&sid("a"), 1)).unwrap();
        table.apply_batch(append_rows(&sid("a"), 2)).unwrap();

        let q = IndexQuery::new(StreamType::new("Order").unwrap(), 10);
        let summaries = table.query_index(&q).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].revision, 2);
    }

    #[test]
    fn test_change_feed_carries_every_row_with_commit_version() {
        let table = StreamTable::ephemeral();
        let mut rx = table.subscribe_changes();
        table.apply_batch(append_rows(&sid("a"), 1)).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 1);
        assert!(!first.key.is_head());
        assert!(second.key.is_head());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ephemeral_table_has_no_history() {
        let table = StreamTable::ephemeral();
        table.apply_batch(append_rows(&sid("a"), 1)).unwrap();
        assert!(table.changes_since(0).unwrap().is_empty());
    }
}
