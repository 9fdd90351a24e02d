//! Interleaved Writer Tests
//!
//! A `Storage` wrapper runs a second writer right after the first one reads
//! the stream Head, before it commits. Verifies that:
//! - a writer that saw no Head never overwrites a Head created meanwhile
//! - stream type and CreatedAt of an existing Head are never replaced

use evstore_core::{
    IndexQuery, NewEvent, Ordinal, Record, RecordKey, Result, Storage, StreamId, StreamSummary,
    StreamType,
};
use evstore_engine::{Database, DatabaseOptions, EventRange};
use evstore_storage::StreamTable;
use parking_lot::Mutex;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

type Hook = Box<dyn FnOnce() + Send>;

/// Delegates to a real table, running a hook once after the first Head read
struct InterleavingStorage {
    inner: Arc<StreamTable>,
    after_head_read: Mutex<Option<Hook>>,
}

impl Storage for InterleavingStorage {
    fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        let found = self.inner.get(key)?;
        if key.is_head() {
            let hook = self.after_head_read.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        Ok(found)
    }

    fn scan_stream(
        &self,
        stream_id: &StreamId,
        from: Ordinal,
        to: Ordinal,
        limit: usize,
    ) -> Result<Vec<(RecordKey, Record)>> {
        self.inner.scan_stream(stream_id, from, to, limit)
    }

    fn query_index(&self, query: &IndexQuery) -> Result<Vec<StreamSummary>> {
        self.inner.query_index(query)
    }

    fn current_version(&self) -> u64 {
        self.inner.current_version()
    }

    fn apply_batch(&self, writes: Vec<(RecordKey, Record)>) -> Result<u64> {
        self.inner.apply_batch(writes)
    }
}

/// Two databases over one table; the first runs `hook` after its next Head read
fn interleaved(hook: impl FnOnce(&Database) + Send + 'static) -> (Arc<Database>, Arc<Database>) {
    let table = Arc::new(StreamTable::ephemeral());
    let plain: Arc<dyn Storage> = table.clone();
    let other = Database::with_storage(Arc::clone(&table), plain, DatabaseOptions::default());

    let second = Arc::clone(&other);
    let boxed: Hook = Box::new(move || hook(&*second));
    let storage: Arc<dyn Storage> = Arc::new(InterleavingStorage {
        inner: Arc::clone(&table),
        after_head_read: Mutex::new(Some(boxed)),
    });
    let db = Database::with_storage(table, storage, DatabaseOptions::default());
    (db, other)
}

fn sid(s: &str) -> StreamId {
    StreamId::new(s).unwrap()
}

fn order() -> StreamType {
    StreamType::new("Order").unwrap()
}

fn invoice() -> StreamType {
    StreamType::new("Invoice").unwrap()
}

// ============================================================================
// Creation Races
// ============================================================================

#[test]
fn test_create_does_not_retype_stream_created_meanwhile() {
    let (db, other) = interleaved(|other| {
        other.ensure_stream(&sid("doc-1"), &invoice()).unwrap();
    });
    let id = sid("doc-1");

    let err = db
        .append(&id, &order(), 0, NewEvent::new("Placed", "a"))
        .unwrap_err();
    assert!(err.is_conflict());

    let head = other.get_head(&id).unwrap();
    assert_eq!(head.stream_type, invoice());
    assert_eq!(head.revision, 0);
    assert!(other
        .read_events(&id, EventRange::all())
        .unwrap()
        .is_empty());

    // After re-reading, the caller finds a stream of another type
    let err = db
        .append(&id, &order(), 0, NewEvent::new("Placed", "a"))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_create_keeps_created_at_of_stream_created_meanwhile() {
    let (db, other) = interleaved(|other| {
        other.ensure_stream(&sid("order-1"), &order()).unwrap();
    });
    let id = sid("order-1");

    assert!(db
        .append(&id, &order(), 0, NewEvent::new("Placed", "a"))
        .unwrap_err()
        .is_conflict());
    let empty = other.get_head(&id).unwrap();

    let stream = db
        .append(&id, &order(), 0, NewEvent::new("Placed", "a"))
        .unwrap();
    assert_eq!(stream.revision, 1);
    assert_eq!(stream.created_at, empty.created_at);
}

#[test]
fn test_continue_conflicts_when_empty_stream_advanced_meanwhile() {
    let (db, other) = interleaved(|other| {
        other
            .append(&sid("order-1"), &order(), 0, NewEvent::new("Placed", "b"))
            .unwrap();
    });
    let id = sid("order-1");
    other.ensure_stream(&id, &order()).unwrap();

    let err = db
        .append(&id, &order(), 0, NewEvent::new("Placed", "a"))
        .unwrap_err();
    assert!(err.is_conflict());
    let events = other.read_all_events(&id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, b"b".to_vec());
}
