//! Abstract blob transport trait.
//!
//! Every transport must implement [`BlobTransport`].  The trait works in
//! terms of one fully-described request and one raw response, so the
//! file-system layer never needs to know whether bytes cross a network.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// A pending request against the blob service.
///
/// `resource` is the un-encoded path relative to the blob endpoint:
/// `{container}` for container operations, `{container}/{blob}` for
/// blob operations.
#[derive(Debug, Clone)]
pub struct BlobRequest {
    /// HTTP method.
    pub method: Method,
    /// Un-encoded resource path (no leading slash).
    pub resource: String,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
    /// Request headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body (empty for GET/HEAD/DELETE).
    pub body: Bytes,
}

impl BlobRequest {
    /// Start a request with no query, headers or body.
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a query parameter.
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Attach a body.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Set a header in place (case-insensitive replace).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// Look up a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Look up a query parameter value by exact name.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A raw response from the blob service.
#[derive(Debug, Clone)]
pub struct BlobResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl BlobResponse {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// True for 404.
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }
}

/// Failures that prevent a response from being produced at all.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The per-request deadline elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request could not be built (bad URL, bad header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other transport failure.
    #[error("transport failure: {0}")]
    Other(String),
}

/// Async request/response contract consumed by the file-system layer.
pub trait BlobTransport: Send + Sync + 'static {
    /// Execute `request` and return the raw response, whatever its status.
    fn send(
        &self,
        request: BlobRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BlobResponse, TransportError>> + Send + '_>>;
}
