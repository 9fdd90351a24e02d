//! Transaction context for OCC
//!
//! A `TransactionContext` buffers the rows a commit will write together with
//! the conditions those rows are guarded by. Nothing reaches storage until the
//! [`TransactionManager`](crate::TransactionManager) validates every condition
//! and applies the buffered rows as one batch.

use crate::validation::{validate_transaction, ValidationResult};
use evstore_core::{Error, HeadRecord, Record, RecordKey, Result, Storage, StreamId};
use std::collections::BTreeMap;
use std::fmt;

/// Error type for commit failures
#[derive(Debug)]
pub enum CommitError {
    /// Transaction aborted because a condition no longer holds
    ValidationFailed(ValidationResult),

    /// Transaction was not in the correct state for commit
    InvalidState(String),

    /// Storage failed while validating or applying the batch
    Storage(Error),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::ValidationFailed(result) => {
                write!(f, "Commit failed: {} conflict(s)", result.conflict_count())
            }
            CommitError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            CommitError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for CommitError {}

impl From<CommitError> for Error {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::ValidationFailed(result) => {
                let count = result.conflict_count();
                result.into_error().unwrap_or_else(|| {
                    Error::Corruption(format!("validation failed with {} conflict(s)", count))
                })
            }
            CommitError::InvalidState(msg) => Error::invalid_argument(msg),
            CommitError::Storage(e) => e,
        }
    }
}

/// A guard checked against storage at commit time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// No row may exist at the key
    NotExists(RecordKey),

    /// The stream's Head must exist and be at `expected`
    HeadRevision {
        /// Stream whose Head is checked
        stream_id: StreamId,
        /// Required current revision
        expected: u64,
    },
}

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Validating` (begin commit)
/// - `Validating` → `Committed` (batch applied)
/// - `Validating` → `Aborted` (conflict detected or storage failure)
/// - `Active` → `Aborted` (user abort or error)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is executing, can read/write
    Active,
    /// Transaction is being validated
    Validating,
    /// Transaction committed successfully
    Committed,
    /// Transaction was aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

/// Transaction context: buffered writes plus commit conditions
///
/// # Lifecycle
///
/// 1. **BEGIN**: obtained from `TransactionManager::begin`, status is `Active`
/// 2. **READ/WRITE**: `get()`, `put()`, `put_if_absent()`, `put_head()`
/// 3. **COMMIT**: `TransactionManager::commit` validates and applies
pub struct TransactionContext {
    /// Unique transaction ID
    pub txn_id: u64,

    /// Storage version when the transaction began
    pub start_version: u64,

    /// Rows to write, keyed so a later write to the same row replaces the earlier
    write_set: BTreeMap<RecordKey, Record>,

    /// Conditions validated at commit
    conditions: Vec<Condition>,

    /// Current transaction status
    pub status: TransactionStatus,
}

impl TransactionContext {
    /// Create a new transaction context
    ///
    /// # Example
    ///
    /// ```
    /// use evstore_concurrency::TransactionContext;
    ///
    /// let txn = TransactionContext::new(1, 100);
    /// assert!(txn.is_active());
    /// assert!(txn.is_read_only());
    /// ```
    pub fn new(txn_id: u64, start_version: u64) -> Self {
        TransactionContext {
            txn_id,
            start_version,
            write_set: BTreeMap::new(),
            conditions: Vec::new(),
            status: TransactionStatus::Active,
        }
    }

    // === Read Operations ===

    /// Read a row with read-your-writes semantics
    pub fn get<S: Storage + ?Sized>(&self, key: &RecordKey, store: &S) -> Result<Option<Record>> {
        self.ensure_active()?;
        if let Some(record) = self.write_set.get(key) {
            return Ok(Some(record.clone()));
        }
        store.get(key)
    }

    /// Read a stream's Head with read-your-writes semantics
    pub fn get_head<S: Storage + ?Sized>(
        &self,
        stream_id: &StreamId,
        store: &S,
    ) -> Result<Option<HeadRecord>> {
        match self.get(&RecordKey::head(stream_id.clone()), store)? {
            None => Ok(None),
            Some(Record::Head(head)) => Ok(Some(head)),
            Some(Record::Event(_)) => Err(Error::Corruption(format!(
                "event row stored at head position of stream {}",
                stream_id
            ))),
        }
    }

    // === Write Operations ===

    /// Buffer an unconditional row write
    pub fn put(&mut self, key: RecordKey, record: Record) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key, record);
        Ok(())
    }

    /// Buffer a row write that must not overwrite an existing row
    pub fn put_if_absent(&mut self, key: RecordKey, record: Record) -> Result<()> {
        self.ensure_active()?;
        self.conditions.push(Condition::NotExists(key.clone()));
        self.write_set.insert(key, record);
        Ok(())
    }

    /// Buffer a Head write guarded by the Head the transaction read
    ///
    /// `expected` is the revision the Head must still have at commit, or
    /// `None` if the stream must not exist yet. An empty stream (revision 0)
    /// and a missing one are different states.
    pub fn put_head(
        &mut self,
        stream_id: StreamId,
        head: HeadRecord,
        expected: Option<u64>,
    ) -> Result<()> {
        let key = RecordKey::head(stream_id.clone());
        match expected {
            None => self.put_if_absent(key, Record::Head(head)),
            Some(expected) => {
                self.ensure_active()?;
                self.conditions.push(Condition::HeadRevision {
                    stream_id,
                    expected,
                });
                self.write_set.insert(key, Record::Head(head));
                Ok(())
            }
        }
    }

    // === Accessors ===

    /// Conditions registered so far
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Number of buffered row writes
    pub fn write_count(&self) -> usize {
        self.write_set.len()
    }

    /// Check if the transaction writes nothing
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Abort reason, if aborted
    pub fn abort_reason(&self) -> Option<&str> {
        match &self.status {
            TransactionStatus::Aborted { reason } => Some(reason),
            _ => None,
        }
    }

    // === State ===

    /// Check if transaction is active
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Check if transaction is committed
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }

    /// Check if transaction is aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// Check if transaction can accept operations
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!(
                "Transaction {} is not active: {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// Transition to Committed state
    ///
    /// `Validating` → `Committed`
    pub fn mark_committed(&mut self) -> Result<()> {
        match &self.status {
            TransactionStatus::Validating => {
                self.status = TransactionStatus::Committed;
                Ok(())
            }
            _ => Err(Error::invalid_argument(format!(
                "Cannot commit transaction {} from state {:?}",
                self.txn_id, self.status
            ))),
        }
    }

    /// Abort the transaction and discard its buffered writes
    ///
    /// Can be called from `Active` (user abort) or `Validating` (conflict).
    pub fn mark_aborted(&mut self, reason: String) -> Result<()> {
        match &self.status {
            TransactionStatus::Committed => Err(Error::invalid_argument(format!(
                "Cannot abort committed transaction {}",
                self.txn_id
            ))),
            TransactionStatus::Aborted { .. } => Err(Error::invalid_argument(format!(
                "Transaction {} already aborted",
                self.txn_id
            ))),
            _ => {
                self.status = TransactionStatus::Aborted { reason };
                self.write_set.clear();
                Ok(())
            }
        }
    }

    // === Commit ===

    /// Validate every condition against current storage
    ///
    /// On success the transaction is left in `Validating`, ready for its
    /// batch to be applied. On conflict it is aborted.
    ///
    /// Must be called while holding the commit lock, otherwise a concurrent
    /// commit may invalidate the result before the batch is applied.
    pub fn validate<S: Storage + ?Sized>(&mut self, store: &S) -> std::result::Result<(), CommitError> {
        if !self.is_active() {
            return Err(CommitError::InvalidState(format!(
                "Cannot commit transaction {} from {:?} state - must be Active",
                self.txn_id, self.status
            )));
        }
        self.status = TransactionStatus::Validating;

        let result = match validate_transaction(self, store) {
            Ok(result) => result,
            Err(e) => {
                self.status = TransactionStatus::Aborted {
                    reason: format!("Validation could not complete: {}", e),
                };
                self.write_set.clear();
                return Err(CommitError::Storage(e));
            }
        };

        if !result.is_valid() {
            self.status = TransactionStatus::Aborted {
                reason: format!("Commit failed: {} conflict(s) detected", result.conflict_count()),
            };
            self.write_set.clear();
            return Err(CommitError::ValidationFailed(result));
        }
        Ok(())
    }

    /// Take the buffered writes as a batch in key order
    pub(crate) fn take_writes(&mut self) -> Vec<(RecordKey, Record)> {
        std::mem::take(&mut self.write_set).into_iter().collect()
    }
}
