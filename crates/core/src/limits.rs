//! Size limits for identifiers, events and pages
//!
//! These limits are enforced by the validation helpers before any write reaches
//! storage. Violations surface as `InvalidArgument` errors.

/// Size limits for stream identifiers, events and read pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum stream id length in bytes (default: 256)
    pub max_stream_id_bytes: usize,

    /// Maximum stream type length in bytes (default: 128)
    pub max_stream_type_bytes: usize,

    /// Maximum event type length in bytes (default: 128)
    pub max_event_type_bytes: usize,

    /// Maximum event payload size in bytes (default: 400KB)
    pub max_payload_bytes: usize,

    /// Maximum number of items returned by a single page (default: 1000)
    pub max_page_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_stream_id_bytes: 256,
            max_stream_type_bytes: 128,
            max_event_type_bytes: 128,
            max_payload_bytes: 400 * 1024,
            max_page_size: 1000,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_stream_id_bytes: 16,
            max_stream_type_bytes: 16,
            max_event_type_bytes: 16,
            max_payload_bytes: 64,
            max_page_size: 4,
        }
    }

    /// Clamp a requested page size into `1..=max_page_size`
    pub fn clamp_page_size(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_stream_id_bytes, 256);
        assert_eq!(limits.max_payload_bytes, 409_600);
    }

    #[test]
    fn test_clamp_page_size() {
        let limits = Limits::with_small_limits();
        assert_eq!(limits.clamp_page_size(0), 1);
        assert_eq!(limits.clamp_page_size(3), 3);
        assert_eq!(limits.clamp_page_size(100), 4);
    }
}
