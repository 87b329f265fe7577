//! The request execution core.
//!
//! [`RequestExecutor`] turns one [`ApiRequest`] into a response payload. The
//! steps run strictly in order:
//!
//! 1. cache lookup (GET only; a hit returns immediately),
//! 2. rate-limiter acquire,
//! 3. request middleware,
//! 4. the attempt loop: transport call under the configured timeout, then
//!    classification, with exponential backoff between retryable failures,
//! 5. on success: response middleware, cache store, metrics, post-processing.
//!
//! Every outcome is a [`serde_json::Value`]. Failures use the uniform
//! [`ErrorPayload`] shape and never pass through response middleware, the
//! cache or the post-processor.
//!
//! The executor is written once against `async`. The async client awaits it on
//! the caller's runtime; the blocking client drives it on a private runtime.

use crate::cache::{CacheKey, ResponseCache};
use crate::config::{ApiConfig, OFFICIAL_BASE_URL};
use crate::error::{CallError, ErrorPayload};
use crate::metrics::MetricsRecorder;
use crate::middleware::{MiddlewarePipeline, OutgoingRequest};
use crate::rate_limit::RateLimiter;
use crate::request::{ApiRequest, Params};
use crate::transport::{Transport, TransportError, TransportRequest};
use crate::{Error, Result};
use http::HeaderMap;
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;
use url::Url;

/// Path of the lightweight call used to verify a new client.
pub const SELF_TEST_PATH: &str = "/locations";

/// Optional shaping step applied to success payloads, including cache hits.
///
/// It never sees error payloads, so its absence or failure cannot change how a
/// request is classified.
///
/// ```
/// use cocapi::PostProcessor;
/// use serde_json::Value;
///
/// struct ItemsOnly;
///
/// impl PostProcessor for ItemsOnly {
///     fn process(&self, _path: &str, payload: Value) -> Value {
///         match payload.get("items") {
///             Some(items) => items.clone(),
///             None => payload,
///         }
///     }
/// }
/// ```
pub trait PostProcessor: Send + Sync {
    fn process(&self, path: &str, payload: Value) -> Value;
}

/// Shared state and orchestration for every call issued through one client.
pub struct RequestExecutor {
    config: RwLock<Arc<ApiConfig>>,
    default_headers: HeaderMap,
    cache: ResponseCache,
    rate_limiter: Option<RateLimiter>,
    middleware: MiddlewarePipeline,
    metrics: MetricsRecorder,
    post_processor: Option<Arc<dyn PostProcessor>>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config())
            .field("cache_entries", &self.cache.len())
            .field("rate_limited", &self.rate_limiter.is_some())
            .field("metrics_enabled", &self.metrics.is_enabled())
            .finish()
    }
}

impl RequestExecutor {
    /// Creates an executor from a validated configuration.
    ///
    /// `default_headers` are sent with every request, ahead of per-request
    /// headers and request middleware.
    pub fn new(
        config: ApiConfig,
        default_headers: HeaderMap,
        post_processor: Option<Arc<dyn PostProcessor>>,
    ) -> Self {
        let cache = ResponseCache::new(config.cache_ttl);
        if !config.enable_caching {
            cache.disable();
        }

        Self {
            rate_limiter: RateLimiter::from_config(&config.rate_limit),
            metrics: MetricsRecorder::new(config.metrics_window_size, config.enable_metrics),
            middleware: MiddlewarePipeline::new(),
            config: RwLock::new(Arc::new(config)),
            default_headers,
            cache,
            post_processor,
        }
    }

    /// The configuration snapshot new calls start with.
    pub fn config(&self) -> Arc<ApiConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn middleware(&self) -> &MiddlewarePipeline {
        &self.middleware
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn base_url(&self) -> String {
        self.config().base_url.clone()
    }

    /// Points subsequent calls at a different base URL.
    ///
    /// Moving away from the official endpoint logs a warning unless `force`
    /// is set. Calls already in flight keep the URL they started with.
    pub fn set_base_url(&self, base_url: &str, force: bool) -> Result<()> {
        Url::parse(base_url)?;

        if base_url != OFFICIAL_BASE_URL && !force {
            tracing::warn!(
                official = OFFICIAL_BASE_URL,
                new = base_url,
                "Changing base URL away from the official endpoint; pass force to silence this warning"
            );
        }

        let previous = self.replace_base_url(base_url);
        tracing::info!(from = %previous, to = base_url, "Base URL changed");
        Ok(())
    }

    /// Restores the official base URL.
    pub fn reset_base_url(&self) {
        let previous = self.replace_base_url(OFFICIAL_BASE_URL);
        if previous != OFFICIAL_BASE_URL {
            tracing::warn!(
                from = %previous,
                official = OFFICIAL_BASE_URL,
                "Base URL reset to the official endpoint"
            );
        } else {
            tracing::info!("Base URL is already the official endpoint");
        }
    }

    fn replace_base_url(&self, base_url: &str) -> String {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut config = ApiConfig::clone(&guard);
        let previous = std::mem::replace(&mut config.base_url, base_url.to_string());
        *guard = Arc::new(config);
        previous
    }

    /// Runs `GET /locations` through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelfTestFailed`] carrying the classified failure.
    pub async fn self_test(&self, transport: &dyn Transport) -> Result<()> {
        let response = self.execute(transport, ApiRequest::get(SELF_TEST_PATH)).await;
        match ErrorPayload::from_value(&response) {
            Some(payload) => {
                tracing::error!(
                    message = %payload.message,
                    error_type = %payload.error_type,
                    "Client self-test failed"
                );
                Err(Error::self_test(payload))
            }
            None => Ok(()),
        }
    }

    /// Executes one logical request and returns its payload or error payload.
    pub async fn execute(&self, transport: &dyn Transport, request: ApiRequest) -> Value {
        let config = self.config();
        let started = Instant::now();
        let method = request.method.as_str().to_string();
        let url = config.endpoint_url(&request.path);
        let cache_key = request
            .is_cacheable()
            .then(|| CacheKey::new(&url, &request.query_params));

        if let Some(cached) = cache_key.as_ref().and_then(|key| self.cache.get(key)) {
            tracing::debug!(path = %request.path, "Cache hit");
            self.metrics
                .record(&request.path, &method, 200, started.elapsed(), true, None);
            return self.finish(&request.path, cached, 200, &config);
        }

        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let mut headers = self.default_headers.clone();
        headers.extend(request.headers.clone());
        let outgoing = self.middleware.apply_request(OutgoingRequest {
            url,
            headers,
            params: request.query_params.clone(),
        });

        let target = match request_url(&outgoing.url, &outgoing.params) {
            Ok(target) => target,
            Err(e) => {
                let error = CallError::InvalidUrl(e.to_string());
                self.metrics.record(
                    &request.path,
                    &method,
                    0,
                    started.elapsed(),
                    false,
                    Some(error.kind()),
                );
                return self.error_value(&error, &config);
            }
        };

        let policy = config.retry_policy();
        for attempt in 0..policy.max_attempts {
            let call = transport.send(TransportRequest {
                method: request.method.clone(),
                url: target.clone(),
                headers: outgoing.headers.clone(),
                body: request.body.clone(),
                timeout: config.timeout,
            });

            let outcome = tokio::time::timeout(config.timeout, call)
                .await
                .unwrap_or(Err(TransportError::Timeout));

            let error = match outcome {
                Ok(response) if response.is_success() => {
                    match serde_json::from_str::<Value>(&response.body) {
                        Ok(payload) => {
                            tracing::info!(
                                status = response.status,
                                latency_ms = started.elapsed().as_millis(),
                                attempts = attempt + 1,
                                "Received HTTP response"
                            );
                            let payload = self.middleware.apply_response(payload);
                            if let Some(key) = cache_key {
                                self.cache.set(key, payload.clone(), None);
                            }
                            self.metrics.record(
                                &request.path,
                                &method,
                                response.status,
                                started.elapsed(),
                                false,
                                None,
                            );
                            return self.finish(&request.path, payload, response.status, &config);
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                status = response.status,
                                "Failed to parse response body as JSON"
                            );
                            CallError::Json {
                                status: response.status,
                                reason: e.to_string(),
                            }
                        }
                    }
                }
                Ok(response) => CallError::from_status(response.status),
                Err(TransportError::Timeout) => CallError::Timeout {
                    timeout: config.timeout,
                },
                Err(TransportError::Connection(reason)) => CallError::Connection { reason },
            };

            self.metrics.record(
                &request.path,
                &method,
                error.status().unwrap_or(0),
                started.elapsed(),
                false,
                Some(error.kind()),
            );

            match policy.next_delay(attempt, &error) {
                Some(delay) => {
                    tracing::warn!(
                        error = %error,
                        attempt = attempt + 1,
                        path = %request.path,
                        "Request failed"
                    );
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = attempt + 1,
                        "Retrying request after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(
                        error = %error,
                        error_type = %error.kind(),
                        attempts = attempt + 1,
                        path = %request.path,
                        "Request failed"
                    );
                    return self.error_value(&error, &config);
                }
            }
        }

        self.error_value(&CallError::RetryExhausted, &config)
    }

    /// Renders a pre-network rejection in the uniform error shape.
    pub fn reject(&self, payload: ErrorPayload) -> Value {
        with_status_code(payload.to_value(), 0, self.config().include_status_code)
    }

    fn finish(&self, path: &str, payload: Value, status: u16, config: &ApiConfig) -> Value {
        let payload = match &self.post_processor {
            Some(processor) => processor.process(path, payload),
            None => payload,
        };
        with_status_code(payload, status, config.include_status_code)
    }

    fn error_value(&self, error: &CallError, config: &ApiConfig) -> Value {
        let payload = error.to_payload();
        let status = payload.status_code.unwrap_or(0);
        with_status_code(payload.to_value(), status, config.include_status_code)
    }
}

fn request_url(base: &str, params: &Params) -> std::result::Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    if !params.is_empty() {
        let mut pairs: Vec<(&String, &String)> = params.iter().collect();
        pairs.sort();
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}

fn with_status_code(mut payload: Value, status: u16, enabled: bool) -> Value {
    if enabled {
        if let Some(map) = payload.as_object_mut() {
            map.insert("status_code".to_string(), json!(status));
        }
    }
    payload
}
