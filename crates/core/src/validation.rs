//! Identifier and event validation
//!
//! Rules enforced on every write and lookup:
//! - Stream ids and stream types must not be empty
//! - They must not contain NUL bytes (\0)
//! - They must not exceed the configured byte length
//! - Event types follow the same rules; payloads are bounded in size

use crate::error::Error;
use crate::limits::Limits;
use thiserror::Error;

/// Identifier validation errors
///
/// Converted into `Error::InvalidArgument` at the API boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Identifier is empty (length 0)
    #[error("{what} cannot be empty")]
    Empty {
        /// Which identifier was rejected
        what: &'static str,
    },

    /// Identifier contains a NUL byte
    #[error("{what} cannot contain NUL bytes")]
    ContainsNul {
        /// Which identifier was rejected
        what: &'static str,
    },

    /// Identifier exceeds maximum length
    #[error("{what} too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Which identifier was rejected
        what: &'static str,
        /// Actual length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Payload exceeds maximum size
    #[error("payload too large: {actual} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        actual: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl IdentifierError {
    /// Short reason code, stable across releases
    pub fn reason_code(&self) -> &'static str {
        match self {
            IdentifierError::Empty { .. } => "empty",
            IdentifierError::ContainsNul { .. } => "contains_nul",
            IdentifierError::TooLong { .. } => "too_long",
            IdentifierError::PayloadTooLarge { .. } => "payload_too_large",
        }
    }
}

impl From<IdentifierError> for Error {
    fn from(e: IdentifierError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

fn validate_identifier(what: &'static str, value: &str, max: usize) -> Result<(), IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::Empty { what });
    }
    if value.contains('\x00') {
        return Err(IdentifierError::ContainsNul { what });
    }
    if value.len() > max {
        return Err(IdentifierError::TooLong {
            what,
            actual: value.len(),
            max,
        });
    }
    Ok(())
}

/// Validate a stream id
pub fn validate_stream_id(value: &str, limits: &Limits) -> Result<(), IdentifierError> {
    validate_identifier("stream id", value, limits.max_stream_id_bytes)
}

/// Validate a stream type
pub fn validate_stream_type(value: &str, limits: &Limits) -> Result<(), IdentifierError> {
    validate_identifier("stream type", value, limits.max_stream_type_bytes)
}

/// Validate an event type
pub fn validate_event_type(value: &str, limits: &Limits) -> Result<(), IdentifierError> {
    validate_identifier("event type", value, limits.max_event_type_bytes)
}

/// Validate an event payload size
pub fn validate_payload(payload: &[u8], limits: &Limits) -> Result<(), IdentifierError> {
    if payload.len() > limits.max_payload_bytes {
        return Err(IdentifierError::PayloadTooLarge {
            actual: payload.len(),
            max: limits.max_payload_bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        let limits = Limits::default();
        assert!(validate_stream_id("order-42", &limits).is_ok());
        assert!(validate_stream_id("3f0e5f8c-0d43-4a4f-9f7e-2b5d1c9e7a10", &limits).is_ok());
        assert!(validate_stream_type("Order", &limits).is_ok());
        assert!(validate_event_type("OrderPlaced", &limits).is_ok());
    }

    #[test]
    fn test_valid_unicode_and_whitespace() {
        let limits = Limits::default();
        assert!(validate_stream_id("заказ 42", &limits).is_ok());
        assert!(validate_stream_type("  spaced  ", &limits).is_ok());
    }

    #[test]
    fn test_invalid_empty() {
        let err = validate_stream_id("", &Limits::default()).unwrap_err();
        assert_eq!(err, IdentifierError::Empty { what: "stream id" });
        assert_eq!(err.reason_code(), "empty");
    }

    #[test]
    fn test_invalid_nul() {
        let err = validate_stream_type("a\x00b", &Limits::default()).unwrap_err();
        assert_eq!(err.reason_code(), "contains_nul");
    }

    #[test]
    fn test_length_boundary() {
        let limits = Limits::default();
        let at_max = "x".repeat(limits.max_stream_id_bytes);
        let over = "x".repeat(limits.max_stream_id_bytes + 1);
        assert!(validate_stream_id(&at_max, &limits).is_ok());
        assert!(matches!(
            validate_stream_id(&over, &limits),
            Err(IdentifierError::TooLong { actual: 257, max: 256, .. })
        ));
    }

    #[test]
    fn test_payload_limit() {
        let limits = Limits::with_small_limits();
        assert!(validate_payload(&[0u8; 64], &limits).is_ok());
        let err = validate_payload(&[0u8; 65], &limits).unwrap_err();
        assert_eq!(err.reason_code(), "payload_too_large");
    }

    #[test]
    fn test_converts_to_invalid_argument() {
        let err: Error = IdentifierError::Empty { what: "stream type" }.into();
        assert!(matches!(err, Error::InvalidArgument(ref m) if m.contains("stream type")));
    }
}
