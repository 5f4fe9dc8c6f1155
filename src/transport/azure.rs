//! Azure Blob Storage transport over HTTPS.
//!
//! Sends already-signed [`BlobRequest`]s to the Blob REST API using
//! `reqwest`.  URL mapping:
//!
//! ```text
//! {blob_endpoint}/{percent-encoded resource}?{percent-encoded query}
//! ```
//!
//! Works against both host-style endpoints
//! (`https://{account}.blob.core.windows.net`) and path-style emulator
//! endpoints (`http://127.0.0.1:10000/devstoreaccount1`).

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{BlobRequest, BlobResponse, BlobTransport, TransportError};

/// Percent-encoding set for blob names: encode everything except
/// unreserved characters and '/'.
const BLOB_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encoding set for query values: like [`BLOB_ENCODE_SET`] but
/// '/' is encoded too.
const QUERY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode a resource path (`container/blob`) for use in a URL.
pub fn encode_resource(resource: &str) -> String {
    utf8_percent_encode(resource, &BLOB_ENCODE_SET).to_string()
}

/// Transport that forwards requests to an Azure Blob endpoint.
pub struct AzureTransport {
    /// HTTP client for Blob REST API calls.
    client: reqwest::Client,
    /// The blob service endpoint, without trailing slash.
    base_url: String,
    /// Deadline applied to every request.
    timeout: Duration,
}

impl AzureTransport {
    /// Create a transport for `blob_endpoint` with a per-request deadline.
    pub fn new(blob_endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to create HTTP client: {e}")))?;

        let base_url = blob_endpoint.trim_end_matches('/').to_string();

        info!(
            "Azure transport initialized: endpoint={} timeout={:?}",
            base_url, timeout
        );

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Build the full URL for a request.
    pub fn request_url(&self, request: &BlobRequest) -> String {
        let mut url = format!("{}/{}", self.base_url, encode_resource(&request.resource));
        if !request.query.is_empty() {
            let query = request
                .query
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(k, &QUERY_ENCODE_SET),
                        utf8_percent_encode(v, &QUERY_ENCODE_SET)
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    /// Map a reqwest failure onto the transport error kinds.
    fn map_reqwest_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }

    async fn execute(&self, request: BlobRequest) -> Result<BlobResponse, TransportError> {
        let url = self.request_url(&request);

        debug!("Azure {} {}", request.method, url);

        let mut req = self
            .client
            .request(request.method.clone(), &url)
            .timeout(self.timeout);
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        // PUT always carries a body so a zero-byte upload still sends
        // `Content-Length: 0`, which the service requires.
        if request.method == http::Method::PUT || !request.body.is_empty() {
            req = req.body(request.body.clone());
        }

        let resp = req.send().await.map_err(|e| self.map_reqwest_error(e))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| self.map_reqwest_error(e))?;

        Ok(BlobResponse {
            status,
            headers,
            body,
        })
    }
}

impl BlobTransport for AzureTransport {
    fn send(
        &self,
        request: BlobRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BlobResponse, TransportError>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}

// -- Tests -------------------------------------------------------------------
