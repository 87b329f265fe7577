//! # cocapi - a reliable client for the Clash of Clans API
//!
//! cocapi wraps the Clash of Clans REST API and adds client-side reliability
//! around every call: response caching with per-entry expiration, retries with
//! exponential backoff on transient failures, request/response middleware,
//! token-bucket rate limiting, and usage metrics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cocapi::{ClientAdmin, ClientBuilder, ErrorPayload};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), cocapi::Error> {
//!     // Building the client runs a self-test against GET /locations
//!     let client = ClientBuilder::new("my-api-token")
//!         .timeout(Duration::from_secs(10))
//!         .enable_metrics(true)
//!         .build()?;
//!
//!     let clan = client.api().clan("#2PP", None);
//!     match ErrorPayload::from_value(&clan) {
//!         Some(error) => eprintln!("{} ({})", error.message, error.error_type),
//!         None => println!("Clan name: {}", clan["name"]),
//!     }
//!
//!     println!("{:?}", client.metrics_summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Async
//!
//! ```no_run
//! use cocapi::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cocapi::Error> {
//!     let client = ClientBuilder::new("my-api-token").build_async()?;
//!
//!     // Requests are only valid while a session is active
//!     let session = client.enter().await?;
//!     let (members, war) = tokio::join!(
//!         client.api().clan_members("#2PP", None),
//!         client.api().clan_current_war("#2PP"),
//!     );
//!     println!("{} / {}", members?, war?);
//!     session.exit();
//!     Ok(())
//! }
//! ```
//!
//! ## Errors are values
//!
//! Individual calls never fail with `Err`. Every failure is returned as a
//! payload of the form
//! `{"result": "error", "message": ..., "error_type": ..., "status_code"?: ...}`
//! which [`ErrorPayload::from_value`] turns back into a typed error. Only client
//! construction and session misuse produce [`Error`].
//!
//! | `error_type` | Cause | Retried |
//! |---|---|---|
//! | `bad_request` | HTTP 400 | no |
//! | `forbidden` | HTTP 403 | no |
//! | `not_found` | HTTP 404 | no |
//! | `rate_limited` | HTTP 429 | yes |
//! | `server_error` | HTTP 5xx | yes |
//! | `http` | other non-2xx | no |
//! | `timeout` | transport timeout | yes |
//! | `connection` | other transport failure | yes |
//! | `json` | unparseable 2xx body | no |
//! | `invalid_param` | rejected before sending | no |
//! | `retry_exhausted` | attempt loop ended without an outcome | no |
//!
//! ## Middleware
//!
//! ```no_run
//! use cocapi::middleware::{RequestId, ResponseTimestamp, UserAgent};
//! use cocapi::{ClientAdmin, ClientBuilder};
//!
//! # fn example() -> Result<(), cocapi::Error> {
//! let client = ClientBuilder::new("my-api-token").build()?;
//! client.add_request_middleware(UserAgent::new("clan-tracker/1.0"));
//! client.add_request_middleware(RequestId);
//! client.add_response_middleware(ResponseTimestamp);
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod client;
pub mod config;
pub mod endpoints;
mod error;
pub mod executor;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod transport;

pub use client::{AsyncClient, BlockingClient, ClientAdmin, ClientBuilder, Session};
pub use config::ApiConfig;
pub use endpoints::{Api, Requester};
pub use error::{is_error_payload, CallError, Error, ErrorKind, ErrorPayload, Result};
pub use executor::{PostProcessor, RequestExecutor};
pub use request::{ApiRequest, Params};
pub use retry::RetryPolicy;
