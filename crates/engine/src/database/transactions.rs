//! Retry policy for transient failures
//!
//! Only errors reporting `is_retryable()` are retried. Concurrency conflicts
//! are domain results and always go straight back to the caller, who must
//! re-read the head before trying again.
//!
//! A [`RetryConfig`] is stateless; each retry loop walks it with a
//! [`Backoff`] cursor, which enforces both the attempt limit and the
//! optional total time budget.

use std::time::{Duration, Instant};

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for retrying transient failures
///
/// # Example
/// ```
/// use evstore_engine::RetryConfig;
///
/// let config = RetryConfig::default()
///     .with_max_retries(5)
///     .with_base_delay_ms(2)
///     .with_max_delay_ms(200)
///     .with_max_elapsed_ms(1_000);
/// assert_eq!(config.max_retries, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Delay before the first retry in milliseconds; doubles per attempt
    pub base_delay_ms: u64,
    /// Ceiling on a single delay in milliseconds
    pub max_delay_ms: u64,
    /// Total time budget across all attempts, if any
    ///
    /// A retry whose delay would overrun the budget is not taken.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            max_elapsed_ms: None,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry until the operation succeeds or the caller gives up
    ///
    /// Delays grow from 50ms to a 5s ceiling. Used for notification
    /// delivery, where giving up would lose a notification.
    pub fn unbounded() -> Self {
        Self {
            max_retries: usize::MAX,
            base_delay_ms: 50,
            max_delay_ms: 5_000,
            max_elapsed_ms: None,
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set the total time budget
    pub fn with_max_elapsed_ms(mut self, max_elapsed_ms: u64) -> Self {
        self.max_elapsed_ms = Some(max_elapsed_ms);
        self
    }

    /// True if retries are only limited by the caller
    pub fn is_unbounded(&self) -> bool {
        self.max_retries == usize::MAX && self.max_elapsed_ms.is_none()
    }

    /// Delay before retry number `attempt` (0-based)
    ///
    /// `base * 2^attempt`, saturating, then capped at `max_delay_ms`.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let multiplier = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u64.checked_shl(shift))
            .unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Start walking this policy for one operation
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            attempt: 0,
            started: Instant::now(),
        }
    }
}

// ============================================================================
// Backoff Cursor
// ============================================================================

/// Retry state of one operation under a [`RetryConfig`]
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    attempt: usize,
    started: Instant,
}

impl Backoff<'_> {
    /// Delay to wait before the next retry, or `None` once retries are spent
    ///
    /// Each `Some` counts as one retry.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_retries {
            return None;
        }
        let delay = self.config.calculate_delay(self.attempt);
        if let Some(budget) = self.config.max_elapsed_ms {
            if self.started.elapsed() + delay > Duration::from_millis(budget) {
                return None;
            }
        }
        self.attempt += 1;
        Some(delay)
    }

    /// Retries taken so far
    pub fn retries(&self) -> usize {
        self.attempt
    }

    /// Time since the operation started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(20));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(40));
        assert_eq!(config.calculate_delay(10), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(64), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(usize::MAX), Duration::from_millis(100));
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.backoff().next_delay(), None);
    }

    #[test]
    fn test_backoff_stops_at_max_retries() {
        let config = RetryConfig::default().with_max_retries(2);
        let mut backoff = config.backoff();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.retries(), 2);
    }

    #[test]
    fn test_backoff_respects_time_budget() {
        // The first delay alone overruns the budget
        let config = RetryConfig::default()
            .with_max_retries(10)
            .with_base_delay_ms(50)
            .with_max_elapsed_ms(20);
        assert_eq!(config.backoff().next_delay(), None);

        let roomy = RetryConfig::default().with_max_elapsed_ms(60_000);
        let mut backoff = roomy.backoff();
        for _ in 0..3 {
            assert!(backoff.next_delay().is_some());
        }
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_unbounded_keeps_going_at_ceiling() {
        let config = RetryConfig::unbounded();
        assert!(config.is_unbounded());
        let mut backoff = config.backoff();
        let delays: Vec<Duration> = (0..200).filter_map(|_| backoff.next_delay()).collect();
        assert_eq!(delays.len(), 200);
        assert_eq!(delays[0], Duration::from_millis(50));
        assert_eq!(delays[199], Duration::from_millis(5_000));
        assert!(!RetryConfig::default().is_unbounded());
    }
}
