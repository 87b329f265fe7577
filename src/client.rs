//! API clients.
//!
//! [`ClientBuilder`] produces either a [`BlockingClient`] or an [`AsyncClient`].
//! Both delegate every call to the same [`RequestExecutor`]; they differ only in
//! how suspension points are driven:
//!
//! - the blocking client owns a private current-thread tokio runtime and blocks
//!   the calling thread on each call,
//! - the async client runs on the caller's runtime and must be inside an active
//!   [`Session`] to issue requests.
//!
//! Administrative operations (base URL, cache, metrics, middleware) are shared
//! through the [`ClientAdmin`] trait.

use crate::cache::{CacheStats, ResponseCache};
use crate::config::ApiConfig;
use crate::executor::{PostProcessor, RequestExecutor};
use crate::metrics::{
    EndpointMetrics, MetricsRecorder, MetricsSummary, PerformanceReport, RecentError,
};
use crate::middleware::{MiddlewareInfo, MiddlewarePipeline, RequestMiddleware, ResponseMiddleware};
use crate::rate_limit::RateLimitConfig;
use crate::request::{ApiRequest, Params};
use crate::transport::{ReqwestTransport, Transport};
use crate::{Error, Result};
use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use url::Url;

/// Builder for configuring and creating a client.
///
/// # Examples
///
/// ```no_run
/// use cocapi::{ClientBuilder, rate_limit::RateLimitConfig};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), cocapi::Error> {
/// let client = ClientBuilder::new("my-token")
///     .timeout(Duration::from_secs(10))
///     .max_retries(5)
///     .cache_ttl(Duration::from_secs(600))
///     .rate_limit_config(RateLimitConfig::builder().requests_per_second(5.0).build())
///     .enable_metrics(true)
///     .default_header("User-Agent", "clan-tracker/1.0")?
///     .build()?;
///
/// let locations = client.request("/locations", None);
/// println!("{}", locations);
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    token: String,
    config: ApiConfig,
    default_headers: HeaderMap,
    transport: Option<Arc<dyn Transport>>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    verify_connection: bool,
}

impl ClientBuilder {
    /// Creates a builder for the given API token with default settings.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            config: ApiConfig::default(),
            default_headers: HeaderMap::new(),
            transport: None,
            post_processor: None,
            verify_connection: true,
        }
    }

    /// Replaces every option at once.
    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        Url::parse(url.as_ref())?;
        self.config.base_url = url.as_ref().to_string();
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the total number of attempts per call.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Sets the base backoff delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Caps each backoff delay.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.max_retry_delay = Some(delay);
        self
    }

    /// Randomizes backoff delays between 50% and 100% of their nominal value.
    pub fn retry_jitter(mut self, jitter: bool) -> Self {
        self.config.retry_jitter = jitter;
        self
    }

    pub fn enable_caching(mut self, enabled: bool) -> Self {
        self.config.enable_caching = enabled;
        self
    }

    /// Sets the default cache TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Sets the rate limit configuration.
    ///
    /// By default calls are paced at 10 per second with a burst of 20.
    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.config.enable_metrics = enabled;
        self
    }

    /// Sets how many recent metric samples are kept.
    pub fn metrics_window_size(mut self, size: usize) -> Self {
        self.config.metrics_window_size = size;
        self
    }

    /// Injects a `status_code` field into object payloads.
    pub fn include_status_code(mut self, include: bool) -> Self {
        self.config.include_status_code = include;
        self
    }

    pub fn max_idle_connections(mut self, max: usize) -> Self {
        self.config.max_idle_connections = max;
        self
    }

    /// Uses a custom transport instead of the pooled `reqwest` one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Installs a post-processor for success payloads.
    pub fn post_processor(mut self, processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(processor);
        self
    }

    /// Whether the startup self-test runs. Enabled by default.
    pub fn verify_connection(mut self, verify: bool) -> Self {
        self.verify_connection = verify;
        self
    }

    /// Builds a blocking client and runs the self-test.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the runtime or HTTP
    /// client cannot be created, or the self-test fails.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime, like any blocking call.
    pub fn build(self) -> Result<BlockingClient> {
        let verify = self.verify_connection;
        let (executor, source) = self.into_parts()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let transport = source.open()?;
        let client = BlockingClient {
            executor,
            transport,
            runtime,
        };

        if verify {
            client
                .runtime
                .block_on(client.executor.self_test(client.transport.as_ref()))?;
        }

        tracing::info!(base_url = %client.executor.base_url(), "Blocking client ready");
        Ok(client)
    }

    /// Builds an async client. The self-test runs in [`AsyncClient::enter`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build_async(self) -> Result<AsyncClient> {
        let verify_connection = self.verify_connection;
        let (executor, source) = self.into_parts()?;

        Ok(AsyncClient {
            inner: Arc::new(AsyncInner {
                executor,
                source,
                verify_connection,
                session: Mutex::new(None),
            }),
        })
    }

    fn into_parts(self) -> Result<(RequestExecutor, TransportSource)> {
        if self.token.trim().is_empty() {
            return Err(Error::ConfigurationError(
                "API token must not be empty".to_string(),
            ));
        }
        self.config.validate()?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::try_from(format!("Bearer {}", self.token))
            .map_err(|e| Error::ConfigurationError(format!("Invalid API token: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.extend(self.default_headers);

        let source = match self.transport {
            Some(transport) => TransportSource::Provided(transport),
            None => TransportSource::Pooled {
                max_idle_per_host: self.config.max_idle_connections,
            },
        };

        let executor = RequestExecutor::new(self.config, headers, self.post_processor);
        Ok((executor, source))
    }
}

/// Where a client gets its transport from when a session starts.
enum TransportSource {
    Pooled { max_idle_per_host: usize },
    Provided(Arc<dyn Transport>),
}

impl TransportSource {
    fn open(&self) -> Result<Arc<dyn Transport>> {
        match self {
            TransportSource::Pooled { max_idle_per_host } => {
                Ok(Arc::new(ReqwestTransport::new(*max_idle_per_host)?))
            }
            TransportSource::Provided(transport) => Ok(Arc::clone(transport)),
        }
    }
}

/// Administrative operations shared by both clients.
pub trait ClientAdmin {
    /// The executor backing this client.
    fn executor(&self) -> &RequestExecutor;

    fn config(&self) -> Arc<ApiConfig> {
        self.executor().config()
    }

    fn base_url(&self) -> String {
        self.executor().base_url()
    }

    /// Changes the base URL. Moving away from the official endpoint logs a
    /// warning unless `force` is set.
    fn set_base_url(&self, url: &str, force: bool) -> Result<()> {
        self.executor().set_base_url(url, force)
    }

    fn reset_base_url(&self) {
        self.executor().reset_base_url()
    }

    fn cache(&self) -> &ResponseCache {
        self.executor().cache()
    }

    /// Drops every cached response and returns how many there were.
    fn clear_cache(&self) -> usize {
        self.executor().cache().clear()
    }

    fn cache_stats(&self) -> CacheStats {
        self.executor().cache().stats()
    }

    fn metrics(&self) -> &MetricsRecorder {
        self.executor().metrics()
    }

    fn metrics_summary(&self) -> MetricsSummary {
        self.executor().metrics().summary()
    }

    fn endpoint_metrics(&self, endpoint: &str) -> Option<EndpointMetrics> {
        self.executor().metrics().per_endpoint(endpoint)
    }

    fn recent_errors(&self, limit: usize) -> Vec<RecentError> {
        self.executor().metrics().recent_errors(limit)
    }

    fn performance_insights(&self) -> Option<PerformanceReport> {
        self.executor().metrics().insights()
    }

    fn export_metrics_csv(&self) -> String {
        self.executor().metrics().export_csv()
    }

    fn clear_metrics(&self) {
        self.executor().metrics().clear()
    }

    fn middleware(&self) -> &MiddlewarePipeline {
        self.executor().middleware()
    }

    fn add_request_middleware(&self, middleware: impl RequestMiddleware + 'static)
    where
        Self: Sized,
    {
        self.executor().middleware().add_request_middleware(middleware)
    }

    fn add_response_middleware(&self, middleware: impl ResponseMiddleware + 'static)
    where
        Self: Sized,
    {
        self.executor().middleware().add_response_middleware(middleware)
    }

    fn middleware_info(&self) -> MiddlewareInfo {
        self.executor().middleware().info()
    }
}

/// A client whose calls block the current thread.
///
/// Must not be used from within an async runtime; use [`AsyncClient`] there.
pub struct BlockingClient {
    executor: RequestExecutor,
    transport: Arc<dyn Transport>,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("executor", &self.executor)
            .finish()
    }
}

impl BlockingClient {
    /// Creates a new `ClientBuilder` for the given token.
    pub fn builder(token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(token)
    }

    /// Issues a GET request for `endpoint` (relative to the base URL).
    ///
    /// Returns the response payload or the uniform error payload.
    pub fn request(&self, endpoint: &str, params: Option<Params>) -> Value {
        self.call(ApiRequest::get(endpoint).with_query_params(params.unwrap_or_default()))
    }

    /// Executes an arbitrary request.
    pub fn call(&self, request: ApiRequest) -> Value {
        self.runtime
            .block_on(self.executor.execute(self.transport.as_ref(), request))
    }
}

impl ClientAdmin for BlockingClient {
    fn executor(&self) -> &RequestExecutor {
        &self.executor
    }
}

struct AsyncInner {
    executor: RequestExecutor,
    source: TransportSource,
    verify_connection: bool,
    session: Mutex<Option<Arc<dyn Transport>>>,
}

/// A client for use on a tokio runtime.
///
/// Cloning is cheap; clones share the session, cache, metrics and middleware.
///
/// # Examples
///
/// ```no_run
/// use cocapi::ClientBuilder;
///
/// # async fn example() -> Result<(), cocapi::Error> {
/// let client = ClientBuilder::new("my-token").build_async()?;
///
/// let session = client.enter().await?;
/// let clan = client.request_async("/clans/%232PP", None).await?;
/// println!("{}", clan["name"]);
/// session.exit();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncClient {
    inner: Arc<AsyncInner>,
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("executor", &self.inner.executor)
            .field("session_active", &self.is_active())
            .finish()
    }
}

impl AsyncClient {
    /// Starts a session: opens the transport and runs the self-test.
    ///
    /// The session ends when the returned [`Session`] is dropped or exited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionAlreadyActive`] if a session is open, or
    /// [`Error::SelfTestFailed`] if the self-test fails. In the latter case the
    /// session is closed before returning.
    pub async fn enter(&self) -> Result<Session> {
        let transport = {
            let mut slot = self.lock_session();
            if slot.is_some() {
                return Err(Error::SessionAlreadyActive);
            }
            let transport = self.inner.source.open()?;
            *slot = Some(Arc::clone(&transport));
            transport
        };
        let session = Session {
            client: self.clone(),
        };

        if self.inner.verify_connection {
            self.inner.executor.self_test(transport.as_ref()).await?;
        }

        tracing::debug!("Async session started");
        Ok(session)
    }

    /// Returns `true` while a session is open.
    pub fn is_active(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Issues a GET request for `endpoint` (relative to the base URL).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] outside a session. Call failures are
    /// reported as error payloads, not as `Err`.
    pub async fn request_async(&self, endpoint: &str, params: Option<Params>) -> Result<Value> {
        self.call_async(ApiRequest::get(endpoint).with_query_params(params.unwrap_or_default()))
            .await
    }

    /// Executes an arbitrary request within the active session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] outside a session.
    pub async fn call_async(&self, request: ApiRequest) -> Result<Value> {
        let transport = self
            .lock_session()
            .clone()
            .ok_or(Error::NoActiveSession)?;
        Ok(self
            .inner
            .executor
            .execute(transport.as_ref(), request)
            .await)
    }

    fn close(&self) {
        if self.lock_session().take().is_some() {
            tracing::debug!("Async session closed");
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn Transport>>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientAdmin for AsyncClient {
    fn executor(&self) -> &RequestExecutor {
        &self.inner.executor
    }
}

/// An open session of an [`AsyncClient`].
///
/// Dropping the session closes it on every exit path, including early returns
/// and panics. Requests already holding the transport finish normally.
#[must_use = "the session closes as soon as it is dropped"]
pub struct Session {
    client: AsyncClient,
}

impl Session {
    /// Closes the session.
    pub fn exit(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        self.client.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
