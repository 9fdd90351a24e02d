//! Durability mode for WAL operations.

use std::fmt;
use std::str::FromStr;

/// Durability mode for WAL writes.
///
/// | Mode | Per-commit work | Loss window on crash |
/// |------|-----------------|----------------------|
/// | Always | flush + fsync | none |
/// | Buffered | flush, fsync every `batch_size` commits | up to `batch_size - 1` commits |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every commit.
    ///
    /// An append acknowledged to the caller survives process and OS crashes.
    #[default]
    Always,

    /// Flush to the OS on every commit, fsync every `batch_size` commits.
    ///
    /// Survives process crashes. An OS crash may lose the last unsynced batch,
    /// which recovery treats as a torn tail.
    Buffered {
        /// Commits between fsyncs
        batch_size: u64,
    },
}

impl DurabilityMode {
    /// Check if this mode fsyncs every commit.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Buffered mode with the default batch size (64 commits).
    pub fn buffered_default() -> Self {
        DurabilityMode::Buffered { batch_size: 64 }
    }
}

impl fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurabilityMode::Always => f.write_str("always"),
            DurabilityMode::Buffered { .. } => f.write_str("buffered"),
        }
    }
}

impl FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "strict" => Ok(DurabilityMode::Always),
            "buffered" | "batched" => Ok(DurabilityMode::buffered_default()),
            other => Err(format!(
                "unknown durability mode '{}', expected 'always' or 'buffered'",
                other
            )),
        }
    }
}
