//! The HTTP transport seam.
//!
//! The executor never talks to `reqwest` directly. It hands a fully built
//! [`TransportRequest`] to a [`Transport`] and gets back the status code and raw
//! body, or a [`TransportError`] for failures that produced no response.
//! [`ReqwestTransport`] is the pooled implementation used by default; tests and
//! embedders can supply their own.

use async_trait::async_trait;
use http::{HeaderMap, Method};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// A single transport call, ready to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Full URL including the query string
    pub url: Url,
    pub headers: HeaderMap,
    /// JSON body for POST requests
    pub body: Option<Value>,
    /// Upper bound for this call
    pub timeout: Duration,
}

/// The status and unparsed body of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for statuses in `[200, 300)`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A failure that produced no HTTP response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection refused, reset, DNS failure, TLS failure or a broken body stream.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Performs HTTP calls on behalf of the executor.
///
/// Implementations must be shareable across concurrent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest)
        -> Result<TransportResponse, TransportError>;
}

/// Pooled [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport keeping up to `max_idle_per_host` idle connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(max_idle_per_host: usize) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_idle_per_host)
            .build()
            .map_err(|e| {
                crate::Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            "Executing HTTP request"
        );

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(request.timeout);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(TransportResponse { status, body })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(error.to_string())
    }
}
