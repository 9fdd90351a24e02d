//! Write-Ahead Log (WAL) module.
//!
//! - **Single file**: `evstore.wal` inside the data directory
//! - **Self-delimiting records**: each commit is one length-prefixed, CRC32-checked record
//! - **Durability modes**: Always (fsync per commit), Buffered
//! - **Crash recovery**: a torn final record is truncated on open
//!
//! The table writes a commit to the log before making it visible, so replaying
//! the log in order rebuilds exactly the set of acknowledged commits.

mod durability;
pub mod format;
mod log;

pub use durability::DurabilityMode;
pub use format::{CommitBatch, WalRecordError};
pub use log::{WalReplay, WriteAheadLog};

/// File name of the WAL inside a data directory
pub const WAL_FILE_NAME: &str = "evstore.wal";
