//! Retry policy for chunk transfers.
//!
//! A worker consults its [`RetryPolicy`] after every transient failure to
//! decide whether to try again and how long to wait first. The retry
//! bound and backoff curve are configuration, never hard-coded in the
//! worker.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use fastget::download::RetryPolicy;
//!
//! let policy = RetryPolicy::exponential(4);
//! assert_eq!(policy.max_attempts(), 4);
//! assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
//! assert_eq!(policy.delay_for_attempt(4), None);
//! ```

use std::time::Duration;

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default number of attempts per chunk (initial attempt included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How a chunk transfer handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail on the first transient error.
    None,

    /// Fixed number of attempts with a constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },

    /// Exponential backoff, capped at `max_delay`.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Upper bound for any single delay.
        max_delay: Duration,
        /// Multiplier applied after each failure.
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Creates an exponential backoff policy with the default curve
    /// (100ms initial, doubling, capped at 30s).
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Creates a fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Returns a copy of this policy with a different attempt bound.
    pub fn with_max_attempts(self, attempts: u32) -> Self {
        match self {
            Self::None => Self::None,
            Self::Fixed { delay, .. } => Self::Fixed {
                max_attempts: attempts,
                delay,
            },
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => Self::ExponentialBackoff {
                max_attempts: attempts,
                initial_delay,
                max_delay,
                multiplier,
            },
        }
    }

    /// Delay before retry number `attempt` (1-based: 1 is the first retry),
    /// or `None` when no attempts remain.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let capped = delay_ms.min(max_delay.as_millis() as f64) as u64;
                Some(Duration::from_millis(capped).min(*max_delay))
            }
        }
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => (*max_attempts).max(1),
            Self::ExponentialBackoff { max_attempts, .. } => (*max_attempts).max(1),
        }
    }
}
