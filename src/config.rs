//! Client configuration.
//!
//! [`ApiConfig`] is built once by the [`ClientBuilder`](crate::ClientBuilder) and
//! shared by every call as an immutable snapshot. The only field that may change
//! afterwards is the base URL, through the explicit setters on
//! [`ClientAdmin`](crate::ClientAdmin); a call in flight keeps the snapshot it
//! started with.

use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use std::time::Duration;

/// The official API endpoint.
pub const OFFICIAL_BASE_URL: &str = "https://api.clashofclans.com/v1";

/// Recognized client options.
///
/// # Examples
///
/// ```
/// use cocapi::ApiConfig;
/// use std::time::Duration;
///
/// let config = ApiConfig {
///     cache_ttl: Duration::from_secs(600),
///     enable_metrics: true,
///     ..ApiConfig::default()
/// };
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL every endpoint path is appended to.
    pub base_url: String,

    /// Upper bound for each individual transport call.
    pub timeout: Duration,

    /// Total number of attempts per logical call, including the first.
    pub max_retries: u32,

    /// Base delay for exponential backoff (`retry_delay * 2^attempt`).
    pub retry_delay: Duration,

    /// Optional ceiling applied to each backoff delay.
    pub max_retry_delay: Option<Duration>,

    /// Scale each backoff delay by a random factor in `[0.5, 1.0]`.
    pub retry_jitter: bool,

    /// Whether successful GET responses are cached.
    pub enable_caching: bool,

    /// Default time-to-live for cache entries.
    pub cache_ttl: Duration,

    /// Client-side request pacing.
    pub rate_limit: RateLimitConfig,

    /// Whether per-call metrics are recorded.
    pub enable_metrics: bool,

    /// Number of most recent metric samples kept.
    pub metrics_window_size: usize,

    /// Inject a `status_code` field into object payloads.
    pub include_status_code: bool,

    /// Idle connections kept per host by the pooled transport.
    pub max_idle_connections: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: OFFICIAL_BASE_URL.to_string(),
            timeout: Duration::from_secs(20),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: None,
            retry_jitter: false,
            enable_caching: true,
            cache_ttl: Duration::from_secs(300),
            rate_limit: RateLimitConfig::default(),
            enable_metrics: false,
            metrics_window_size: 1000,
            include_status_code: false,
            max_idle_connections: 20,
        }
    }
}

impl ApiConfig {
    /// Checks the options for values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)?;

        if self.max_retries == 0 {
            return Err(Error::ConfigurationError(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }
        if self.metrics_window_size == 0 {
            return Err(Error::ConfigurationError(
                "metrics_window_size must be at least 1".to_string(),
            ));
        }
        self.rate_limit.validate()
    }

    /// The backoff policy described by these options.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: self.retry_delay,
            max_delay: self.max_retry_delay,
            jitter: self.retry_jitter,
        }
    }

    /// Joins the base URL and an endpoint path.
    pub(crate) fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ApiConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let config = ApiConfig {
            max_retries: 0,
            ..ApiConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_rejects_unparseable_base_url() {
        let config = ApiConfig {
            base_url: "not a url".to_string(),
            ..ApiConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_endpoint_url_joins_without_double_slash() {
        let config = ApiConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(
            config.endpoint_url("/locations"),
            "http://localhost:8080/v1/locations"
        );
    }
}
