//! Retry bound and backoff delays for transient failures.
//!
//! Attempts are zero-indexed: attempt `0` is the first call, and the delay slept
//! after a retryable failure on attempt `n` is `base_delay * 2^n`.

use crate::error::CallError;
use rand::Rng;
use std::time::Duration;

/// Defines how many attempts a call gets and how long to wait between them.
///
/// # Examples
///
/// ```
/// use cocapi::RetryPolicy;
/// use std::time::Duration;
///
/// // 100ms, 200ms, 400ms ...
/// let policy = RetryPolicy {
///     max_attempts: 4,
///     base_delay: Duration::from_millis(100),
///     max_delay: None,
///     jitter: false,
/// };
///
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Optional cap on each delay.
    pub max_delay: Option<Duration>,
    /// Whether to scale delays by a random factor between 50% and 100%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: None,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff delay that follows a failure on the given attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt);
        let delay = self
            .base_delay
            .saturating_mul(multiplier.try_into().unwrap_or(u32::MAX));
        let delay = match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        };

        if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(jitter_factor)
        } else {
            delay
        }
    }

    /// Returns `true` if another attempt follows the given one.
    pub fn has_attempt_after(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// Decides whether a failed attempt is retried, and after what delay.
    ///
    /// Returns `None` when the error is terminal or the attempts are used up.
    pub fn next_delay(&self, attempt: u32, error: &CallError) -> Option<Duration> {
        if error.is_retryable() && self.has_attempt_after(attempt) {
            Some(self.delay_for_attempt(attempt))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: None,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let strategy = policy(5);

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_by_max_delay() {
        let strategy = RetryPolicy {
            max_delay: Some(Duration::from_millis(250)),
            ..policy(5)
        };
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(4), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_half_and_full_delay() {
        let strategy = RetryPolicy {
            jitter: true,
            ..policy(5)
        };
        for _ in 0..50 {
            let delay = strategy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_next_delay_respects_attempt_bound() {
        let strategy = policy(3);
        let error = CallError::from_status(500);

        assert_eq!(
            strategy.next_delay(0, &error),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            strategy.next_delay(1, &error),
            Some(Duration::from_millis(200))
        );
        assert_eq!(strategy.next_delay(2, &error), None);
    }

    #[test]
    fn test_terminal_errors_are_not_retried() {
        let strategy = policy(3);
        assert_eq!(strategy.next_delay(0, &CallError::from_status(404)), None);
    }
}
