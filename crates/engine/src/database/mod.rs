//! Database struct and open logic
//!
//! This module provides the main Database struct that orchestrates:
//! - Table initialization (ephemeral or WAL-backed, with recovery on open)
//! - The transaction API used by the append and read paths
//! - Bounded retry of transient storage failures
//!
//! ## Transaction API
//!
//! 1. **Closure API** (recommended): `db.transaction(|txn, store| { ... })`
//!    - Automatic commit on success, abort on error
//!    - Returns the closure's return value
//!
//! 2. **Manual API**: `begin_transaction()` + `commit_transaction()`
//!    - For cases requiring external control over commit timing
//!
//! Conflicts are never retried here. `transaction_with_retry` only repeats an
//! attempt that failed with a retryable (infrastructure) error.

pub mod config;
mod transactions;

pub use config::{
    AppMode, EventStoreConfig, InMemoryParameters, ParameterSource, TomlParameters,
    DEFAULT_INDEX_NAME, DEFAULT_PAGE_SIZE, MODE_ENV_VAR,
};
pub use transactions::{Backoff, RetryConfig};

use crate::clock::{Clock, SystemClock};
use evstore_concurrency::{TransactionContext, TransactionManager};
use evstore_core::{Error, Limits, Result, Storage};
use evstore_storage::{ChangeRecord, DurabilityMode, StreamTable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

// ============================================================================
// Options
// ============================================================================

/// Tunables for a [`Database`]
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Identifier and payload limits
    pub limits: Limits,
    /// Retry policy for transient storage failures
    pub retry: RetryConfig,
    /// Default number of items per read page
    pub page_size: usize,
    /// WAL durability mode for durable databases
    pub durability: DurabilityMode,
    /// Source of `CreatedAt` / `UpdatedAt`
    pub clock: Arc<dyn Clock>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            limits: Limits::default(),
            retry: RetryConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            durability: DurabilityMode::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl DatabaseOptions {
    /// Options derived from process configuration
    pub fn from_config(config: &EventStoreConfig) -> Self {
        DatabaseOptions::default()
            .with_page_size(config.page_size)
            .with_durability(config.durability)
    }

    /// Set identifier and payload limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the default page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the WAL durability mode
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

// ============================================================================
// Database
// ============================================================================

/// Event store database
///
/// Owns the stream table, the commit manager and the clock. All append and
/// read operations are methods on this type (see `append.rs` and `read.rs`).
///
/// # Example
///
/// ```
/// use evstore_core::{NewEvent, StreamId, StreamType};
/// use evstore_engine::Database;
///
/// let db = Database::ephemeral();
/// let id = StreamId::new("order-42").unwrap();
/// let ty = StreamType::new("Order").unwrap();
/// let stream = db.append(&id, &ty, 0, NewEvent::new("Placed", b"{}".to_vec())).unwrap();
/// assert_eq!(stream.revision, 1);
/// ```
pub struct Database {
    /// Physical table; owns the change feed
    table: Arc<StreamTable>,

    /// Storage seen by transactions (the table itself unless injected)
    storage: Arc<dyn Storage>,

    /// Commit serialization and validation
    manager: TransactionManager,

    /// Tunables
    options: DatabaseOptions,

    /// Data directory (None for ephemeral databases)
    data_dir: Option<PathBuf>,
}

impl Database {
    /// Open a durable database in `path` with default options
    ///
    /// The directory is created if missing. Committed batches found in the
    /// write-ahead log are replayed before the database is returned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        Self::open_with_options(path, DatabaseOptions::default())
    }

    /// Open a durable database with explicit options
    pub fn open_with_options<P: AsRef<Path>>(
        path: P,
        options: DatabaseOptions,
    ) -> Result<Arc<Self>> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let table = Arc::new(StreamTable::open(&dir, options.durability)?);
        info!(
            target: "evstore::db",
            path = %dir.display(),
            durability = %options.durability,
            version = table.current_version(),
            streams = table.stream_count(),
            "Database opened"
        );

        let storage: Arc<dyn Storage> = table.clone();
        Ok(Arc::new(Database {
            table,
            storage,
            manager: TransactionManager::new(),
            options,
            data_dir: Some(dir),
        }))
    }

    /// Create an in-memory database with default options
    pub fn ephemeral() -> Arc<Self> {
        Self::ephemeral_with_options(DatabaseOptions::default())
    }

    /// Create an in-memory database with explicit options
    pub fn ephemeral_with_options(options: DatabaseOptions) -> Arc<Self> {
        let table = Arc::new(StreamTable::ephemeral());
        let storage: Arc<dyn Storage> = table.clone();
        Self::with_storage(table, storage, options)
    }

    /// Build a database whose transactions go through `storage`
    ///
    /// `table` still supplies the change feed. Used to interpose wrappers
    /// (fault injection, instrumentation) that delegate to `table`.
    pub fn with_storage(
        table: Arc<StreamTable>,
        storage: Arc<dyn Storage>,
        options: DatabaseOptions,
    ) -> Arc<Self> {
        Arc::new(Database {
            table,
            storage,
            manager: TransactionManager::new(),
            options,
            data_dir: None,
        })
    }

    /// Open the database described by process configuration
    ///
    /// Durable when `DATA_DIR` is set, ephemeral otherwise.
    pub fn from_config(config: &EventStoreConfig) -> Result<Arc<Self>> {
        let options = DatabaseOptions::from_config(config);
        match &config.data_dir {
            Some(dir) => Self::open_with_options(dir, options),
            None => {
                info!(
                    target: "evstore::db",
                    table = %config.table_name,
                    "No DATA_DIR configured, running ephemeral"
                );
                Ok(Self::ephemeral_with_options(options))
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Options this database was built with
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Identifier and payload limits
    pub fn limits(&self) -> &Limits {
        &self.options.limits
    }

    /// Data directory, if durable
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// True if commits are written to a write-ahead log
    pub fn is_durable(&self) -> bool {
        self.table.is_durable()
    }

    /// Highest commit version applied
    pub fn current_version(&self) -> u64 {
        self.storage.current_version()
    }

    /// Number of commits rejected by conditional-write validation
    pub fn conflict_count(&self) -> u64 {
        self.manager.conflict_count()
    }

    /// Subscribe to row-level changes of every subsequent commit
    pub fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<ChangeRecord> {
        self.table.subscribe_changes()
    }

    /// Changes committed after `version`, read back from the WAL
    ///
    /// Empty for an ephemeral database.
    pub fn changes_since(&self, version: u64) -> Result<Vec<ChangeRecord>> {
        self.table.changes_since(version)
    }

    /// Force buffered WAL writes to disk
    pub fn flush(&self) -> Result<()> {
        self.table.sync()
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub(crate) fn now(&self) -> evstore_core::Timestamp {
        self.options.clock.now()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Execute one transaction attempt: commit on success, abort on error.
    fn run_single_attempt<T>(&self, txn: &mut TransactionContext, result: Result<T>) -> Result<(T, u64)> {
        match result {
            Ok(value) => {
                let commit_version = self.commit_transaction(txn)?;
                Ok((value, commit_version))
            }
            Err(e) => {
                let _ = txn.mark_aborted(format!("Closure error: {}", e));
                Err(e)
            }
        }
    }

    /// Execute a transaction with the given closure
    ///
    /// The closure stages reads and conditional writes; nothing reaches
    /// storage until every condition is validated at commit.
    ///
    /// # Returns
    /// * `Ok(T)` - Closure return value on successful commit
    /// * `Err(ConcurrencyConflict)` - a condition no longer held
    /// * `Err` - closure error or storage failure (nothing written)
    ///
    /// # Example
    /// ```text
    /// let revision = db.transaction(|txn, store| {
    ///     let head = txn.get_head(&id, store)?;
    ///     txn.put_head(id.clone(), next_head, Some(expected))?;
    ///     Ok(next_head.stream_revision)
    /// })?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionContext, &dyn Storage) -> Result<T>,
    {
        let mut txn = self.begin_transaction();
        let result = f(&mut txn, self.storage());
        self.run_single_attempt(&mut txn, result)
            .map(|(value, _)| value)
    }

    /// Execute a transaction, retrying transient storage failures
    ///
    /// The closure is called again (against fresh storage state) until it
    /// commits or fails with a non-retryable error, or until `config`'s
    /// attempt limit or time budget is spent.
    /// Conflicts are returned on the first occurrence.
    pub fn transaction_with_retry<F, T>(&self, config: &RetryConfig, f: F) -> Result<T>
    where
        F: Fn(&mut TransactionContext, &dyn Storage) -> Result<T>,
    {
        let mut backoff = config.backoff();
        loop {
            let mut txn = self.begin_transaction();
            let result = f(&mut txn, self.storage());
            let e = match self.run_single_attempt(&mut txn, result) {
                Ok((value, _)) => return Ok(value),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        target: "evstore::commit",
                        attempt = backoff.retries(),
                        max_retries = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage failure, retrying transaction"
                    );
                    std::thread::sleep(delay);
                }
                None => {
                    error!(
                        target: "evstore::commit",
                        attempts = backoff.retries() + 1,
                        elapsed_ms = backoff.elapsed().as_millis() as u64,
                        error = %e,
                        "Transaction retries exhausted"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Run a read, retrying transient storage failures
    pub(crate) fn read_with_retry<F, T>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: Fn(&dyn Storage) -> Result<T>,
    {
        let config = &self.options.retry;
        let mut backoff = config.backoff();
        loop {
            let e = match f(self.storage()) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        target: "evstore::read",
                        operation,
                        attempt = backoff.retries(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage failure, retrying read"
                    );
                    std::thread::sleep(delay);
                }
                None => {
                    error!(
                        target: "evstore::read",
                        operation,
                        attempts = backoff.retries() + 1,
                        error = %e,
                        "Read retries exhausted"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Begin a new transaction (for manual control)
    ///
    /// Prefer the `transaction()` closure API for automatic handling.
    pub fn begin_transaction(&self) -> TransactionContext {
        self.manager.begin(self.storage())
    }

    /// Commit a manually managed transaction
    ///
    /// Returns the commit version. A failed condition surfaces as
    /// `ConcurrencyConflict`; a storage failure leaves storage untouched.
    pub fn commit_transaction(&self, txn: &mut TransactionContext) -> Result<u64> {
        self.manager
            .commit(txn, self.storage())
            .map_err(Error::from)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.data_dir)
            .field("version", &self.current_version())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_core::{HeadRecord, RecordKey, StreamId, StreamType};
    use tempfile::TempDir;

    fn head(revision: u64) -> HeadRecord {
        let now = chrono::Utc::now();
        HeadRecord {
            stream_type: StreamType::new("Order").unwrap(),
            stream_revision: revision,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_closure_error_writes_nothing() {
        let db = Database::ephemeral();
        let id = StreamId::new("a").unwrap();
        let result: Result<()> = db.transaction(|txn, _| {
            txn.put_head(id.clone(), head(0), None)?;
            Err(Error::invalid_argument("nope"))
        });
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(db.current_version(), 0);
    }

    #[test]
    fn test_failed_condition_is_conflict() {
        let db = Database::ephemeral();
        let id = StreamId::new("a").unwrap();
        db.transaction(|txn, _| txn.put_head(id.clone(), head(1), None))
            .unwrap();

        let err = db
            .transaction(|txn, _| txn.put_head(id.clone(), head(1), None))
            .unwrap_err();
        match err {
            Error::ConcurrencyConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(db.conflict_count(), 1);
    }

    #[test]
    fn test_conflict_is_not_retried() {
        let db = Database::ephemeral();
        let id = StreamId::new("a").unwrap();
        db.transaction(|txn, _| txn.put_head(id.clone(), head(1), None))
            .unwrap();

        let calls = std::sync::atomic::AtomicUsize::new(0);
        let err = db
            .transaction_with_retry(&RetryConfig::default(), |txn, _| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                txn.put_head(id.clone(), head(1), None)
            })
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_transaction() {
        let db = Database::ephemeral();
        let id = StreamId::new("a").unwrap();
        let mut txn = db.begin_transaction();
        txn.put_head(id.clone(), head(1), None).unwrap();
        assert_eq!(db.commit_transaction(&mut txn).unwrap(), 1);
        assert!(db
            .storage()
            .get(&RecordKey::head(id))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("db");
        let db = Database::open(&path).unwrap();
        assert!(db.is_durable());
        assert_eq!(db.data_dir(), Some(path.as_path()));
        assert!(path.join(evstore_storage::WAL_FILE_NAME).exists());
    }

    #[test]
    fn test_from_config_without_data_dir_is_ephemeral() {
        let mode = AppMode::Development;
        let params = InMemoryParameters::new()
            .with_param(mode, "PORT", "8080")
            .with_param(mode, "TABLE_NAME", "t")
            .with_param(mode, "NOTIFICATION_CHANNEL", "c")
            .with_param(mode, "PAGE_SIZE", "7");
        let config = EventStoreConfig::load(mode, &params).unwrap();
        let db = Database::from_config(&config).unwrap();
        assert!(!db.is_durable());
        assert_eq!(db.options().page_size, 7);
    }
}
