//! Request and response middleware.
//!
//! Middleware are transforms registered on a client and applied in registration
//! order. Request middleware see the outgoing URL, headers and query parameters;
//! response middleware see each successfully parsed payload before it is cached.
//!
//! A step that returns `Err` is logged and skipped: the next step receives the
//! value the failed step was given, and the request carries on.
//!
//! Closures work as middleware directly:
//!
//! ```
//! use cocapi::middleware::{BoxError, MiddlewarePipeline, OutgoingRequest};
//! use http::HeaderValue;
//!
//! let pipeline = MiddlewarePipeline::new();
//! pipeline.add_request_middleware(|request: &OutgoingRequest| {
//!     let mut request = request.clone();
//!     request.headers.insert("x-app", HeaderValue::from_static("stats-bot"));
//!     Ok::<_, BoxError>(request)
//! });
//! assert_eq!(pipeline.info().request_middleware_count, 1);
//! ```

use crate::request::Params;
use http::{HeaderMap, HeaderValue};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Error type returned by a failing middleware step.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The parts of a request that request middleware may rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    /// Full endpoint URL, without the query string
    pub url: String,
    pub headers: HeaderMap,
    pub params: Params,
}

/// A transform applied to outgoing requests.
pub trait RequestMiddleware: Send + Sync {
    /// Name reported by [`MiddlewarePipeline::info`].
    fn name(&self) -> &str {
        "anonymous"
    }

    fn process(&self, request: &OutgoingRequest) -> Result<OutgoingRequest, BoxError>;
}

impl<F> RequestMiddleware for F
where
    F: Fn(&OutgoingRequest) -> Result<OutgoingRequest, BoxError> + Send + Sync,
{
    fn process(&self, request: &OutgoingRequest) -> Result<OutgoingRequest, BoxError> {
        self(request)
    }
}

/// A transform applied to successful response payloads.
pub trait ResponseMiddleware: Send + Sync {
    /// Name reported by [`MiddlewarePipeline::info`].
    fn name(&self) -> &str {
        "anonymous"
    }

    fn process(&self, response: &Value) -> Result<Value, BoxError>;
}

impl<F> ResponseMiddleware for F
where
    F: Fn(&Value) -> Result<Value, BoxError> + Send + Sync,
{
    fn process(&self, response: &Value) -> Result<Value, BoxError> {
        self(response)
    }
}

/// Counts and names of registered middleware.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiddlewareInfo {
    pub request_middleware_count: usize,
    pub response_middleware_count: usize,
    pub request_middleware_names: Vec<String>,
    pub response_middleware_names: Vec<String>,
}

/// Ordered request and response middleware lists.
///
/// Registration takes `&self`, so middleware can be added to a client that is
/// already shared. Each application works on a snapshot of the list taken when
/// it starts.
#[derive(Default)]
pub struct MiddlewarePipeline {
    request: RwLock<Vec<Arc<dyn RequestMiddleware>>>,
    response: RwLock<Vec<Arc<dyn ResponseMiddleware>>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request middleware.
    pub fn add_request_middleware(&self, middleware: impl RequestMiddleware + 'static) {
        self.request
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(middleware));
    }

    /// Appends a response middleware.
    pub fn add_response_middleware(&self, middleware: impl ResponseMiddleware + 'static) {
        self.response
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(middleware));
    }

    /// Folds the request middleware over `request`, left to right.
    pub fn apply_request(&self, request: OutgoingRequest) -> OutgoingRequest {
        let steps = self
            .request
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        steps
            .iter()
            .fold(request, |request, step| match step.process(&request) {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::warn!(
                        middleware = step.name(),
                        error = %e,
                        "Request middleware failed"
                    );
                    request
                }
            })
    }

    /// Folds the response middleware over `response`, left to right.
    pub fn apply_response(&self, response: Value) -> Value {
        let steps = self
            .response
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        steps
            .iter()
            .fold(response, |response, step| match step.process(&response) {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::warn!(
                        middleware = step.name(),
                        error = %e,
                        "Response middleware failed"
                    );
                    response
                }
            })
    }

    pub fn clear_request_middleware(&self) {
        self.request
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn clear_response_middleware(&self) {
        self.response
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn clear_all_middleware(&self) {
        self.clear_request_middleware();
        self.clear_response_middleware();
    }

    pub fn info(&self) -> MiddlewareInfo {
        let request = self.request.read().unwrap_or_else(PoisonError::into_inner);
        let response = self.response.read().unwrap_or_else(PoisonError::into_inner);

        MiddlewareInfo {
            request_middleware_count: request.len(),
            response_middleware_count: response.len(),
            request_middleware_names: request.iter().map(|m| m.name().to_string()).collect(),
            response_middleware_names: response.iter().map(|m| m.name().to_string()).collect(),
        }
    }
}

/// Sets the `User-Agent` header.
#[derive(Debug, Clone)]
pub struct UserAgent {
    user_agent: String,
}

impl UserAgent {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl RequestMiddleware for UserAgent {
    fn name(&self) -> &str {
        "user_agent"
    }

    fn process(&self, request: &OutgoingRequest) -> Result<OutgoingRequest, BoxError> {
        let mut request = request.clone();
        request
            .headers
            .insert(http::header::USER_AGENT, HeaderValue::from_str(&self.user_agent)?);
        Ok(request)
    }
}

/// Adds a random `X-Request-ID` header to every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestId;

impl RequestMiddleware for RequestId {
    fn name(&self) -> &str {
        "request_id"
    }

    fn process(&self, request: &OutgoingRequest) -> Result<OutgoingRequest, BoxError> {
        let id: u128 = rand::thread_rng().gen();
        let mut request = request.clone();
        request
            .headers
            .insert("x-request-id", HeaderValue::from_str(&format!("{:032x}", id))?);
        Ok(request)
    }
}

/// Logs each outgoing request at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugLogging;

impl RequestMiddleware for DebugLogging {
    fn name(&self) -> &str {
        "debug_logging"
    }

    fn process(&self, request: &OutgoingRequest) -> Result<OutgoingRequest, BoxError> {
        tracing::debug!(
            url = %request.url,
            headers = ?request.headers.keys().collect::<Vec<_>>(),
            params = ?request.params,
            "API request"
        );
        Ok(request.clone())
    }
}

/// Adds `_processed_at` (seconds since the Unix epoch) to object payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTimestamp;

impl ResponseMiddleware for ResponseTimestamp {
    fn name(&self) -> &str {
        "response_timestamp"
    }

    fn process(&self, response: &Value) -> Result<Value, BoxError> {
        let mut response = response.clone();
        if let Some(map) = response.as_object_mut() {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
            map.insert("_processed_at".to_string(), json!(now.as_secs_f64()));
        }
        Ok(response)
    }
}

/// Adds `_response_size_bytes`, the length of the payload's JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseSize;

impl ResponseMiddleware for ResponseSize {
    fn name(&self) -> &str {
        "response_size"
    }

    fn process(&self, response: &Value) -> Result<Value, BoxError> {
        let size = serde_json::to_vec(response)?.len();
        let mut response = response.clone();
        if let Some(map) = response.as_object_mut() {
            map.insert("_response_size_bytes".to_string(), json!(size));
        }
        Ok(response)
    }
}
