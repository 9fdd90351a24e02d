//! Identifier types for streams and record positions
//!
//! - [`StreamId`]: unique stream identifier (validated string)
//! - [`StreamType`]: logical stream category used for discovery
//! - [`Ordinal`]: position of a record within a stream; `0` is the Head record
//! - [`Timestamp`]: UTC wall-clock time used for `CreatedAt` / `UpdatedAt`

use crate::error::Result;
use crate::limits::Limits;
use crate::validation::{validate_stream_id, validate_stream_type};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// UTC timestamp stored on Head and Event records
pub type Timestamp = DateTime<Utc>;

/// Unique identifier of a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Create a stream id, validating it against default limits
    pub fn new(value: impl Into<String>) -> Result<Self> {
        Self::with_limits(value, &Limits::default())
    }

    /// Create a stream id, validating it against custom limits
    pub fn with_limits(value: impl Into<String>, limits: &Limits) -> Result<Self> {
        let value = value.into();
        validate_stream_id(&value, limits)?;
        Ok(StreamId(value))
    }

    /// Generate a fresh random stream id (UUID v4)
    pub fn generate() -> Self {
        StreamId(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Logical category of a stream (e.g. `"Order"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamType(String);

impl StreamType {
    /// Create a stream type, validating it against default limits
    pub fn new(value: impl Into<String>) -> Result<Self> {
        Self::with_limits(value, &Limits::default())
    }

    /// Create a stream type, validating it against custom limits
    pub fn with_limits(value: impl Into<String>, limits: &Limits) -> Result<Self> {
        let value = value.into();
        validate_stream_type(&value, limits)?;
        Ok(StreamType(value))
    }

    /// Borrow the type as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position of a record within a stream
///
/// Ordinal `0` is reserved for the Head record. Ordinals `1..=revision` hold
/// events, so ordering numerically yields events in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ordinal(u64);

impl Ordinal {
    /// The reserved Head record position
    pub const HEAD: Ordinal = Ordinal(0);

    /// The first event position
    pub const FIRST_EVENT: Ordinal = Ordinal(1);

    /// The last representable position
    pub const MAX: Ordinal = Ordinal(u64::MAX);

    /// Ordinal of the event appended at `revision`
    pub fn event(revision: u64) -> Self {
        Ordinal(revision)
    }

    /// Raw ordinal value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// True if this is the Head record position
    pub fn is_head(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_validation() {
        assert!(StreamId::new("order-42").is_ok());
        assert!(StreamId::new("").unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = StreamId::generate();
        let b = StreamId::generate();
        assert_ne!(a, b);
        assert!(StreamId::new(a.as_str()).is_ok());
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_stream_type_custom_limits() {
        let limits = Limits::with_small_limits();
        assert!(StreamType::with_limits("Order", &limits).is_ok());
        assert!(StreamType::with_limits("AVeryLongStreamTypeName", &limits).is_err());
    }

    #[test]
    fn test_ordinal_orders_numerically() {
        let mut ordinals = vec![Ordinal::event(10), Ordinal::HEAD, Ordinal::event(2)];
        ordinals.sort();
        assert_eq!(ordinals, vec![Ordinal::HEAD, Ordinal::event(2), Ordinal::event(10)]);
        assert!(Ordinal::HEAD.is_head());
        assert!(!Ordinal::FIRST_EVENT.is_head());
    }

    #[test]
    fn test_serde_transparent() {
        let id = StreamId::new("order-42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"order-42\"");
        let back: StreamId = serde_json::from_str("\"order-42\"").unwrap();
        assert_eq!(back, id);
    }
}
