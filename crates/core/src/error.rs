//! Error types for evstore
//!
//! Every fallible operation in the workspace returns [`Error`]. The variants
//! split into two groups:
//!
//! - **Domain results** the caller is expected to handle programmatically:
//!   [`Error::ConcurrencyConflict`], [`Error::StreamNotFound`],
//!   [`Error::InvalidArgument`].
//! - **Infrastructure failures** that are retried locally before escalation:
//!   [`Error::StorageUnavailable`], [`Error::NotificationDeliveryFailure`].
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::StreamId;
use std::io;
use thiserror::Error;

/// Result type alias for evstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the event store
#[derive(Debug, Error)]
pub enum Error {
    /// The caller's expected revision did not match the stream head
    ///
    /// Recoverable: re-read the head and resubmit with the fresh revision.
    #[error("Concurrency conflict on stream {stream_id}: expected revision {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Stream the append targeted
        stream_id: StreamId,
        /// Revision the caller believed was current
        expected: u64,
        /// Revision actually found (0 if the stream does not exist)
        actual: u64,
    },

    /// No Head record exists for the stream
    #[error("Stream not found: {stream_id}")]
    StreamNotFound {
        /// Stream that was looked up
        stream_id: StreamId,
    },

    /// Malformed stream id, stream type, event or ordinal range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The durable store failed transiently
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        /// Description of the underlying failure
        message: String,
    },

    /// A commit notification could not be delivered to the transport
    #[error("Notification delivery failed: {0}")]
    NotificationDeliveryFailure(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, undecodable record)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Missing or malformed configuration parameter
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Build a `ConcurrencyConflict` for a stream
    pub fn conflict(stream_id: &StreamId, expected: u64, actual: u64) -> Self {
        Error::ConcurrencyConflict {
            stream_id: stream_id.clone(),
            expected,
            actual,
        }
    }

    /// Build a `StreamNotFound` for a stream
    pub fn not_found(stream_id: &StreamId) -> Self {
        Error::StreamNotFound {
            stream_id: stream_id.clone(),
        }
    }

    /// Build an `InvalidArgument` error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Build a `StorageUnavailable` error
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Error::StorageUnavailable {
            message: message.into(),
        }
    }

    /// True for optimistic concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }

    /// True when the referenced stream has no Head record
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::StreamNotFound { .. })
    }

    /// True for transient infrastructure failures worth retrying locally
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable { .. } | Error::NotificationDeliveryFailure(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::StorageUnavailable {
            message: e.to_string(),
        }
    }
}
