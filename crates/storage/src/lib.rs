//! Storage layer for evstore
//!
//! This crate implements the sorted stream table behind the [`Storage`] trait:
//! - StreamTable: BTreeMap-based rows with RwLock, Head at ordinal 0
//! - StreamIndex: `(StreamType, UpdatedAt)` secondary index over Head rows
//! - ChangeFeed: commit-ordered new images of every written row
//! - WriteAheadLog: CRC-framed commit log with torn-tail recovery
//! - Version management with AtomicU64
//!
//! [`Storage`]: evstore_core::Storage

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change_feed;
pub mod index;
pub mod table;
pub mod wal;

pub use change_feed::{ChangeFeed, ChangeRecord};
pub use index::StreamIndex;
pub use table::StreamTable;
pub use wal::{DurabilityMode, WAL_FILE_NAME};
