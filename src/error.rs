//! Error types for the API client.
//!
//! Two layers of errors exist. [`Error`] is returned from client construction
//! and session management: a client that cannot be built, or whose self-test
//! fails, is reported loudly through `Result`. Per-call failures are classified
//! as [`CallError`] inside the executor and converted to the uniform
//! [`ErrorPayload`] value before they reach the caller, so an individual
//! request never returns `Err`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Value of the `result` discriminator carried by every error payload.
pub const ERROR_MARKER: &str = "error";

/// Errors raised while building a client or managing its session.
///
/// # Examples
///
/// ```no_run
/// use cocapi::{ClientAdmin, ClientBuilder, Error};
///
/// match ClientBuilder::new("my-token").build() {
///     Ok(client) => println!("connected to {}", client.base_url()),
///     Err(Error::SelfTestFailed { message, .. }) => eprintln!("backend unreachable: {}", message),
///     Err(e) => eprintln!("could not build client: {}", e),
/// }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The underlying HTTP client could not be created.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid configuration was provided.
    ///
    /// Covers non-positive rates, empty tokens and invalid header names or values.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid base URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The private runtime backing the blocking client could not be started.
    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// The startup self-test (`GET /locations`) failed.
    ///
    /// A client that cannot reach its backend is never handed out.
    #[error("API initialization failed: {message}")]
    SelfTestFailed {
        /// Message from the error payload the self-test produced
        message: String,
        /// Classification of the failure
        error_type: ErrorKind,
        /// HTTP status code, when a response was received
        status_code: Option<u16>,
    },

    /// An async request was issued while no session was active.
    #[error("No active session: call `enter()` before issuing async requests")]
    NoActiveSession,

    /// `enter()` was called while a session was already active.
    #[error("A session is already active for this client")]
    SessionAlreadyActive,
}

impl Error {
    pub(crate) fn self_test(payload: ErrorPayload) -> Self {
        Error::SelfTestFailed {
            message: payload.message,
            error_type: payload.error_type,
            status_code: payload.status_code,
        }
    }
}

/// A specialized `Result` type for client construction and session management.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification tag carried in the `error_type` field of an error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 400
    BadRequest,
    /// HTTP 403, usually an invalid token or an IP not on the key's allow-list
    Forbidden,
    /// HTTP 404
    NotFound,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError,
    /// Any other non-2xx status
    Http,
    /// The transport call exceeded the configured timeout
    Timeout,
    /// Connection refused, reset, DNS failure or any other transport failure
    Connection,
    /// A 2xx response whose body was not valid JSON
    Json,
    /// The request was rejected before any network activity
    InvalidParam,
    /// The attempt loop ended without a classified outcome
    RetryExhausted,
}

impl ErrorKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Http => "http",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Json => "json",
            ErrorKind::InvalidParam => "invalid_param",
            ErrorKind::RetryExhausted => "retry_exhausted",
        }
    }

    /// Returns `true` for failures that the executor retries with backoff.
    ///
    /// ```
    /// use cocapi::ErrorKind;
    ///
    /// assert!(ErrorKind::RateLimited.is_retryable());
    /// assert!(ErrorKind::Timeout.is_retryable());
    /// assert!(!ErrorKind::NotFound.is_retryable());
    /// assert!(!ErrorKind::Json.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ServerError
                | ErrorKind::Timeout
                | ErrorKind::Connection
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classified outcome of a failed call attempt.
///
/// The `Display` output is the human-readable message placed in the payload.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("Bad request - check your parameters")]
    BadRequest,

    #[error("Forbidden - invalid API token or access denied")]
    Forbidden,

    #[error("Not found - check clan/player tag")]
    NotFound,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Server error - try again later")]
    ServerError { status: u16 },

    #[error("HTTP error {status}")]
    Http { status: u16 },

    #[error("Request timeout after {} seconds", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    #[error("Connection error - check your internet connection")]
    Connection { reason: String },

    #[error("Invalid JSON response from API")]
    Json { status: u16, reason: String },

    /// A parameter outside the method's allow-list was supplied.
    #[error("Invalid params for method")]
    InvalidParams { rejected: Vec<String> },

    /// The base URL and path did not form a valid URL.
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Max retries exceeded")]
    RetryExhausted,
}

impl CallError {
    /// Maps a non-2xx HTTP status to its classification.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => CallError::BadRequest,
            403 => CallError::Forbidden,
            404 => CallError::NotFound,
            429 => CallError::RateLimited,
            s if s >= 500 => CallError::ServerError { status: s },
            s => CallError::Http { status: s },
        }
    }

    /// Returns the classification tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::BadRequest => ErrorKind::BadRequest,
            CallError::Forbidden => ErrorKind::Forbidden,
            CallError::NotFound => ErrorKind::NotFound,
            CallError::RateLimited => ErrorKind::RateLimited,
            CallError::ServerError { .. } => ErrorKind::ServerError,
            CallError::Http { .. } => ErrorKind::Http,
            CallError::Timeout { .. } => ErrorKind::Timeout,
            CallError::Connection { .. } => ErrorKind::Connection,
            CallError::Json { .. } => ErrorKind::Json,
            CallError::InvalidParams { .. } | CallError::InvalidUrl(_) => ErrorKind::InvalidParam,
            CallError::RetryExhausted => ErrorKind::RetryExhausted,
        }
    }

    /// Returns the HTTP status code if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::BadRequest => Some(400),
            CallError::Forbidden => Some(403),
            CallError::NotFound => Some(404),
            CallError::RateLimited => Some(429),
            CallError::ServerError { status }
            | CallError::Http { status }
            | CallError::Json { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if this failure is eligible for another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Converts this error into the uniform payload shape.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            message: self.to_string(),
            error_type: self.kind(),
            status_code: self.status(),
        }
    }
}

/// The uniform error shape returned in place of a response payload.
///
/// On the wire it is `{ "result": "error", "message": ..., "error_type": ..., "status_code"?: ... }`.
///
/// # Examples
///
/// ```
/// use cocapi::{ErrorKind, ErrorPayload};
///
/// let value = serde_json::json!({
///     "result": "error",
///     "message": "Not found - check clan/player tag",
///     "error_type": "not_found",
///     "status_code": 404,
/// });
///
/// let payload = ErrorPayload::from_value(&value).unwrap();
/// assert_eq!(payload.error_type, ErrorKind::NotFound);
/// assert_eq!(payload.status_code, Some(404));
///
/// assert!(ErrorPayload::from_value(&serde_json::json!({"items": []})).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description
    pub message: String,
    /// Classification tag
    pub error_type: ErrorKind,
    /// HTTP status code, when one is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ErrorPayload {
    /// The payload returned when a request carries a parameter outside its allow-list.
    pub fn invalid_params() -> Self {
        CallError::InvalidParams {
            rejected: Vec::new(),
        }
        .to_payload()
    }

    /// Recovers a typed error from a response value.
    ///
    /// Returns `None` for success payloads.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !is_error_payload(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Renders the wire shape.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "result": ERROR_MARKER,
            "message": self.message,
            "error_type": self.error_type.as_str(),
        });
        if let (Some(status), Some(map)) = (self.status_code, value.as_object_mut()) {
            map.insert("status_code".to_string(), json!(status));
        }
        value
    }
}

impl From<ErrorPayload> for Value {
    fn from(payload: ErrorPayload) -> Self {
        payload.to_value()
    }
}

impl From<CallError> for ErrorPayload {
    fn from(error: CallError) -> Self {
        error.to_payload()
    }
}

/// Returns `true` if `value` carries the `result: "error"` discriminator.
pub fn is_error_payload(value: &Value) -> bool {
    value.get("result").and_then(Value::as_str) == Some(ERROR_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(CallError::from_status(400).kind(), ErrorKind::BadRequest);
        assert_eq!(CallError::from_status(403).kind(), ErrorKind::Forbidden);
        assert_eq!(CallError::from_status(404).kind(), ErrorKind::NotFound);
        assert_eq!(CallError::from_status(429).kind(), ErrorKind::RateLimited);
        assert_eq!(CallError::from_status(503).kind(), ErrorKind::ServerError);
        assert_eq!(CallError::from_status(418).kind(), ErrorKind::Http);
    }

    #[test]
    fn test_only_transient_failures_retry() {
        assert!(CallError::from_status(429).is_retryable());
        assert!(CallError::from_status(500).is_retryable());
        assert!(CallError::Timeout {
            timeout: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(CallError::Connection {
            reason: "reset".into()
        }
        .is_retryable());

        assert!(!CallError::from_status(400).is_retryable());
        assert!(!CallError::from_status(404).is_retryable());
        assert!(!CallError::Json {
            status: 200,
            reason: "eof".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_payload_shape() {
        let value = CallError::from_status(502).to_payload().to_value();
        assert_eq!(value["result"], "error");
        assert_eq!(value["message"], "Server error - try again later");
        assert_eq!(value["error_type"], "server_error");
        assert_eq!(value["status_code"], 502);
    }

    #[test]
    fn test_transport_payload_has_no_status() {
        let value = CallError::Timeout {
            timeout: Duration::from_secs(20),
        }
        .to_payload()
        .to_value();
        assert_eq!(value["message"], "Request timeout after 20 seconds");
        assert!(value.get("status_code").is_none());
    }

    #[test]
    fn test_invalid_params_message() {
        let value = ErrorPayload::invalid_params().to_value();
        assert_eq!(value["message"], "Invalid params for method");
        assert_eq!(value["error_type"], "invalid_param");
    }

    #[test]
    fn test_error_payload_round_trip_from_value() {
        let payload = CallError::from_status(404).to_payload();
        assert_eq!(ErrorPayload::from_value(&payload.to_value()), Some(payload));
    }
}
