//! Client-side request pacing with a token bucket.
//!
//! Tokens accumulate at `requests_per_second` up to `burst`; every outbound call
//! consumes one. The limiter knows nothing about server-reported limits: it only
//! enforces the locally configured rate.
//!
//! The refill-and-consume step runs under a mutex that is never held across the
//! wait. A caller that finds the bucket empty releases the lock, sleeps for the
//! time one token takes to accrue, and then re-evaluates, so concurrent waiters
//! never proceed on the same token.

use crate::{Error, Result};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Tolerance for float drift when a waiter wakes with "almost one" token.
const TOKEN_EPSILON: f64 = 1e-9;

/// Configuration for client-side rate limiting.
///
/// # Examples
///
/// ```
/// use cocapi::rate_limit::RateLimitConfig;
///
/// let config = RateLimitConfig::builder()
///     .requests_per_second(5.0)
///     .burst(10)
///     .build();
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether outbound calls are paced at all.
    pub enabled: bool,

    /// Steady refill rate in tokens per second. Defaults to 10.
    pub requests_per_second: f64,

    /// Bucket capacity, i.e. how many calls may go out back to back. Defaults to 20.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10.0,
            burst: 20,
        }
    }
}

impl RateLimitConfig {
    /// Creates a new builder for configuring rate limiting.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Creates a disabled rate limit configuration.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Rejects rates and capacities the bucket cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(Error::ConfigurationError(
                "requests_per_second must be a positive number".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(Error::ConfigurationError(
                "burst must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for `RateLimitConfig`.
#[derive(Default)]
pub struct RateLimitConfigBuilder {
    enabled: Option<bool>,
    requests_per_second: Option<f64>,
    burst: Option<u32>,
}

impl RateLimitConfigBuilder {
    /// Sets whether rate limiting is enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the steady refill rate.
    pub fn requests_per_second(mut self, rate: f64) -> Self {
        self.requests_per_second = Some(rate);
        self
    }

    /// Sets the bucket capacity.
    pub fn burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Builds the `RateLimitConfig`.
    pub fn build(self) -> RateLimitConfig {
        let default = RateLimitConfig::default();
        RateLimitConfig {
            enabled: self.enabled.unwrap_or(default.enabled),
            requests_per_second: self
                .requests_per_second
                .unwrap_or(default.requests_per_second),
            burst: self.burst.unwrap_or(default.burst),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared by every call issued through one client.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            rate: requests_per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Creates a limiter from configuration, or `None` when pacing is disabled.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.requests_per_second, config.burst))
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_take() {
                Ok(()) => return,
                Err(wait) => wait,
            };

            tracing::debug!(
                wait_ms = wait.as_millis(),
                "Rate limiter empty - waiting for a token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Returns the current token count after refilling.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Refills, then either consumes a token or reports how long until one accrues.
    fn try_take(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 - TOKEN_EPSILON {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_passes_without_waiting() {
        let limiter = RateLimiter::new(10.0, 5);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.available_tokens() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(10.0, 1);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_stay_within_bounds() {
        let limiter = RateLimiter::new(50.0, 3);

        for i in 0..20 {
            limiter.acquire().await;
            let tokens = limiter.available_tokens();
            assert!((0.0..=3.0).contains(&tokens), "tokens out of range: {}", tokens);

            if i % 4 == 0 {
                tokio::time::advance(Duration::from_secs(1)).await;
                assert!(limiter.available_tokens() <= 3.0);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_capped_at_burst() {
        let limiter = RateLimiter::new(100.0, 4);
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens(), 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_do_not_share_a_token() {
        let limiter = Arc::new(RateLimiter::new(10.0, 1));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        // one token up front, two more at 100ms intervals
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::default().validate().is_ok());
        assert!(RateLimitConfig::disabled().validate().is_ok());

        let zero_rate = RateLimitConfig::builder().requests_per_second(0.0).build();
        assert!(zero_rate.validate().is_err());

        let zero_burst = RateLimitConfig::builder().burst(0).build();
        assert!(zero_burst.validate().is_err());
    }

    #[test]
    fn test_disabled_config_builds_no_limiter() {
        assert!(RateLimiter::from_config(&RateLimitConfig::disabled()).is_none());
        assert!(RateLimiter::from_config(&RateLimitConfig::default()).is_some());
    }
}
