//! Request description types.

use crate::error::CallError;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use std::collections::HashMap;

/// Query parameters of a request.
pub type Params = HashMap<String, String>;

/// Parameters accepted by every paginated endpoint.
pub const PAGING_PARAMS: &[&str] = &["limit", "after", "before"];

/// Builds a [`Params`] map from key/value pairs.
///
/// ```
/// let params = cocapi::request::params([("limit", 5)]);
/// assert_eq!(params["limit"], "5");
/// ```
pub fn params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.to_string()))
        .collect()
}

/// One logical API request: method, endpoint path, query parameters, extra
/// headers and an optional JSON body.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// The HTTP method (GET for everything except token verification).
    pub method: Method,

    /// The endpoint path, relative to the base URL and always starting with `/`.
    pub path: String,

    /// Additional headers for this request.
    pub headers: HeaderMap,

    /// Query parameters for this request.
    pub query_params: Params,

    /// JSON body, sent with POST requests.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Creates a request for the given method and path.
    ///
    /// A missing leading `/` is added.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: normalize_path(path.into()),
            headers: HeaderMap::new(),
            query_params: Params::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, path)
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query_params.insert(key.into(), value.to_string());
        self
    }

    /// Adds multiple query parameters to the request.
    pub fn with_query_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query_params.extend(params);
        self
    }

    /// Returns `true` if responses to this request may be cached.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }

    /// Rejects parameters outside the given allow-list.
    pub fn validate_params(&self, allowed: &[&str]) -> Result<(), CallError> {
        let mut rejected: Vec<String> = self
            .query_params
            .keys()
            .filter(|key| !allowed.contains(&key.as_str()))
            .cloned()
            .collect();

        if rejected.is_empty() {
            Ok(())
        } else {
            rejected.sort();
            Err(CallError::InvalidParams { rejected })
        }
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_gets_leading_slash() {
        assert_eq!(ApiRequest::get("clans/new-feature").path, "/clans/new-feature");
        assert_eq!(ApiRequest::get("/locations").path, "/locations");
    }

    #[test]
    fn test_validate_params_reports_rejected_keys() {
        let request = ApiRequest::get("/clans/%23ABC")
            .with_query_param("limit", 5)
            .with_query_param("foo", "bar");

        match request.validate_params(PAGING_PARAMS) {
            Err(CallError::InvalidParams { rejected }) => assert_eq!(rejected, vec!["foo"]),
            other => panic!("Expected InvalidParams, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_params_accepts_allowed_and_empty() {
        assert!(ApiRequest::get("/leagues")
            .validate_params(PAGING_PARAMS)
            .is_ok());
        assert!(ApiRequest::get("/leagues")
            .with_query_param("after", "cursor")
            .validate_params(PAGING_PARAMS)
            .is_ok());
    }

    #[test]
    fn test_only_get_is_cacheable() {
        assert!(ApiRequest::get("/locations").is_cacheable());
        assert!(!ApiRequest::post("/players/%23P/verifytoken", serde_json::json!({})).is_cacheable());
    }

    #[test]
    fn test_invalid_header_rejected() {
        assert!(ApiRequest::get("/x").with_header("bad header", "v").is_err());
    }
}
