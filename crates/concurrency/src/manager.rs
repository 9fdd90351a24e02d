//! Transaction manager for coordinating commit operations
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Acquire the commit lock
//! 2. validate() - check every condition against current storage
//! 3. IF conflicts: abort and return error (nothing written)
//! 4. apply_batch() - storage logs the batch, then makes it visible
//! 5. mark_committed()
//! 6. Release the commit lock, return the commit version
//! ```
//!
//! Validation and application happen in one critical section, so of two
//! commits guarded by the same Head revision exactly one can succeed.

use crate::transaction::{CommitError, TransactionContext};
use evstore_core::Storage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Manages transaction lifecycle and atomic commits
pub struct TransactionManager {
    /// Serializes validate + apply
    commit_lock: Mutex<()>,

    /// Next transaction ID
    next_txn_id: AtomicU64,

    /// Commits that failed validation
    conflicts: AtomicU64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new() -> Self {
        TransactionManager {
            commit_lock: Mutex::new(()),
            next_txn_id: AtomicU64::new(1),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Begin a transaction against `store`
    pub fn begin<S: Storage + ?Sized>(&self, store: &S) -> TransactionContext {
        TransactionContext::new(self.next_txn_id(), store.current_version())
    }

    /// Number of commits rejected by validation so far
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Commit a transaction atomically
    ///
    /// # Returns
    /// - Ok(commit_version) on success; read-only transactions return the
    ///   current storage version without writing
    /// - Err(CommitError::ValidationFailed) if a condition no longer holds
    /// - Err(CommitError::Storage) if storage failed; nothing was applied
    pub fn commit<S: Storage + ?Sized>(
        &self,
        txn: &mut TransactionContext,
        store: &S,
    ) -> std::result::Result<u64, CommitError> {
        let _guard = self.commit_lock.lock();

        if let Err(e) = txn.validate(store) {
            if matches!(e, CommitError::ValidationFailed(_)) {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            debug!(
                target: "evstore::txn",
                txn_id = txn.txn_id,
                error = %e,
                "Transaction aborted during validation"
            );
            return Err(e);
        }

        if txn.is_read_only() {
            txn.mark_committed().map_err(CommitError::Storage)?;
            return Ok(store.current_version());
        }

        let writes = txn.take_writes();
        let rows = writes.len();
        match store.apply_batch(writes) {
            Ok(version) => {
                txn.mark_committed().map_err(CommitError::Storage)?;
                debug!(
                    target: "evstore::txn",
                    txn_id = txn.txn_id,
                    version,
                    rows,
                    "Transaction committed"
                );
                Ok(version)
            }
            Err(e) => {
                error!(
                    target: "evstore::txn",
                    txn_id = txn.txn_id,
                    error = %e,
                    "Failed to apply transaction batch"
                );
                let _ = txn.mark_aborted(format!("Storage failure: {}", e));
                Err(CommitError::Storage(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use evstore_core::{HeadRecord, NewEvent, Record, RecordKey, StreamId, StreamType};
    use evstore_storage::StreamTable;

    fn sid(s: &str) -> StreamId {
        StreamId::new(s).unwrap()
    }

    fn stage_append(txn: &mut TransactionContext, id: &StreamId, expected: u64) {
        let now = Utc::now();
        let revision = expected + 1;
        txn.put_if_absent(
            RecordKey::event(id.clone(), revision),
            Record::Event(NewEvent::new("E", "").into_record(revision, now)),
        )
        .unwrap();
        txn.put_head(
            id.clone(),
            HeadRecord {
                stream_type: StreamType::new("Order").unwrap(),
                stream_revision: revision,
                created_at: now,
                updated_at: now,
            },
            (expected > 0).then_some(expected),
        )
        .unwrap();
    }

    #[test]
    fn test_commit_applies_batch() {
        let store = StreamTable::ephemeral();
        let manager = TransactionManager::new();
        let id = sid("a");

        let mut txn = manager.begin(&store);
        stage_append(&mut txn, &id, 0);
        let version = manager.commit(&mut txn, &store).unwrap();

        assert_eq!(version, 1);
        assert!(txn.is_committed());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_stale_expected_revision_conflicts() {
        let store = StreamTable::ephemeral();
        let manager = TransactionManager::new();
        let id = sid("a");

        let mut first = manager.begin(&store);
        let mut second = manager.begin(&store);
        stage_append(&mut first, &id, 0);
        stage_append(&mut second, &id, 0);

        manager.commit(&mut first, &store).unwrap();
        let err = manager.commit(&mut second, &store).unwrap_err();
        assert!(matches!(err, CommitError::ValidationFailed(_)));
        assert!(second.is_aborted());
        assert_eq!(manager.conflict_count(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_read_only_commit_writes_nothing() {
        let store = StreamTable::ephemeral();
        let manager = TransactionManager::new();
        let mut txn = manager.begin(&store);
        assert_eq!(manager.commit(&mut txn, &store).unwrap(), 0);
        assert_eq!(store.current_version(), 0);
    }

    #[test]
    fn test_txn_ids_are_unique() {
        let manager = TransactionManager::new();
        let a = manager.next_txn_id();
        let b = manager.next_txn_id();
        assert_ne!(a, b);
    }
}
