//! In-memory blob transport.
//!
//! Emulates the subset of the Blob REST API this client speaks: container
//! create/delete/probe, Put/Get/Head/Delete Blob, Copy Blob, Set Blob
//! Metadata and List Blobs, with the service's status codes and
//! `x-ms-error-code` headers.  Containers are held in a
//! `tokio::sync::RwLock<HashMap<...>>`.
//!
//! When built with [`MemoryTransport::with_signer`] every request must
//! carry a valid Shared Key `Authorization` header or it is rejected with
//! `403 AuthenticationFailed`, exactly like the real service.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::backend::{BlobRequest, BlobResponse, BlobTransport, TransportError};
use crate::auth::SharedKeySigner;
use crate::metadata::{BlobEntry, Metadata, DEFAULT_CONTENT_TYPE, META_HEADER_PREFIX};
use crate::xml::{render_error, render_list_blobs};

/// Default number of blobs per listing page.
const DEFAULT_PAGE_SIZE: usize = 5000;

/// One stored blob.
#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    content_type: String,
    metadata: Metadata,
    last_modified: DateTime<Utc>,
    etag: String,
}

impl StoredBlob {
    fn new(data: Bytes, content_type: String, metadata: Metadata) -> Self {
        let etag = Self::compute_etag(&data);
        Self {
            data,
            content_type,
            metadata,
            last_modified: Utc::now(),
            etag,
        }
    }

    /// Quoted MD5-hex ETag for the blob body.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"0x{}\"", hex::encode_upper(hasher.finalize()))
    }

    fn content_md5(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(&self.data);
        BASE64_STANDARD.encode(hasher.finalize())
    }
}

/// Blobs of one container, ordered by name as the service lists them.
type Container = BTreeMap<String, StoredBlob>;

/// In-process emulation of the Blob REST API.
pub struct MemoryTransport {
    /// Container name -> blobs.
    containers: tokio::sync::RwLock<HashMap<String, Container>>,
    /// Endpoint used to resolve `x-ms-copy-source` URLs.
    endpoint: String,
    /// When set, every request's signature is verified.
    signer: Option<SharedKeySigner>,
    /// Maximum blobs per listing page.
    page_size: usize,
    /// When set, every Copy Blob request fails with 500.
    fail_copies: AtomicBool,
    /// Number of requests received.
    requests: AtomicUsize,
}

impl MemoryTransport {
    /// Create an empty emulator reachable at `endpoint`.
    pub fn new(endpoint: &str) -> Self {
        Self {
            containers: tokio::sync::RwLock::new(HashMap::new()),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            signer: None,
            page_size: DEFAULT_PAGE_SIZE,
            fail_copies: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    /// Require every request to be signed with `signer`'s key.
    pub fn with_signer(mut self, signer: SharedKeySigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Limit listing pages to `page_size` blobs (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make subsequent Copy Blob requests fail (or succeed again).
    pub fn set_fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every blob name in `container`, including shadow versions.
    pub async fn blob_names(&self, container: &str) -> Vec<String> {
        self.containers
            .read()
            .await
            .get(container)
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn handle(&self, request: BlobRequest) -> BlobResponse {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(signer) = &self.signer {
            if !signer.verify(&request) {
                return error_response(
                    &request.method,
                    StatusCode::FORBIDDEN,
                    "AuthenticationFailed",
                    "Server failed to authenticate the request.",
                );
            }
        }

        let resource = request.resource.clone();
        match resource.split_once('/') {
            Some((container, blob)) if !blob.is_empty() => {
                self.handle_blob(&request, container, blob).await
            }
            _ => {
                self.handle_container(&request, resource.trim_end_matches('/'))
                    .await
            }
        }
    }

    // -- Container operations -------------------------------------------------

    async fn handle_container(&self, request: &BlobRequest, container: &str) -> BlobResponse {
        if request.query_value("restype") != Some("container") {
            return error_response(
                &request.method,
                StatusCode::BAD_REQUEST,
                "InvalidQueryParameterValue",
                "Value for one of the query parameters specified in the request URI is invalid.",
            );
        }

        match (&request.method, request.query_value("comp")) {
            (&Method::PUT, None) => {
                let mut containers = self.containers.write().await;
                if containers.contains_key(container) {
                    return error_response(
                        &request.method,
                        StatusCode::CONFLICT,
                        "ContainerAlreadyExists",
                        "The specified container already exists.",
                    );
                }
                containers.insert(container.to_string(), Container::new());
                empty_response(StatusCode::CREATED)
            }
            (&Method::DELETE, None) => {
                if self.containers.write().await.remove(container).is_some() {
                    empty_response(StatusCode::ACCEPTED)
                } else {
                    container_not_found(&request.method)
                }
            }
            (&Method::HEAD, None) | (&Method::GET, None) => {
                if self.containers.read().await.contains_key(container) {
                    empty_response(StatusCode::OK)
                } else {
                    container_not_found(&request.method)
                }
            }
            (&Method::GET, Some("list")) => self.list_blobs(request, container).await,
            _ => error_response(
                &request.method,
                StatusCode::BAD_REQUEST,
                "UnsupportedHttpVerb",
                "The resource doesn't support the specified HTTP verb.",
            ),
        }
    }

    async fn list_blobs(&self, request: &BlobRequest, container: &str) -> BlobResponse {
        let containers = self.containers.read().await;
        let Some(blobs) = containers.get(container) else {
            return container_not_found(&request.method);
        };

        let prefix = request.query_value("prefix").unwrap_or_default();
        let marker = request.query_value("marker").unwrap_or_default();

        let mut entries: Vec<BlobEntry> = Vec::new();
        let mut next_marker: Option<String> = None;
        for (name, blob) in blobs
            .iter()
            .filter(|(name, _)| name.as_str() >= marker && name.starts_with(prefix))
        {
            if entries.len() == self.page_size {
                next_marker = Some(name.clone());
                break;
            }
            entries.push(BlobEntry {
                name: name.clone(),
                size: blob.data.len() as u64,
                last_modified: Some(blob.last_modified),
                content_type: blob.content_type.clone(),
                etag: Some(blob.etag.clone()),
            });
        }

        let body = render_list_blobs(container, prefix, marker, &entries, next_marker.as_deref());
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "content-type", "application/xml");
        BlobResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(body),
        }
    }

    // -- Blob operations ------------------------------------------------------

    async fn handle_blob(&self, request: &BlobRequest, container: &str, blob: &str) -> BlobResponse {
        if request.method == Method::PUT {
            if let Some(source) = request.header_value("x-ms-copy-source") {
                return self.copy_blob(request, container, blob, source).await;
            }
        }

        let mut containers = self.containers.write().await;
        let Some(blobs) = containers.get_mut(container) else {
            return container_not_found(&request.method);
        };

        match request.method {
            Method::GET | Method::HEAD => match blobs.get(blob) {
                Some(stored) => {
                    let body = if request.method == Method::GET {
                        stored.data.clone()
                    } else {
                        Bytes::new()
                    };
                    BlobResponse {
                        status: StatusCode::OK,
                        headers: blob_headers(stored),
                        body,
                    }
                }
                None => blob_not_found(&request.method),
            },
            Method::DELETE => match blobs.remove(blob) {
                Some(_) => empty_response(StatusCode::ACCEPTED),
                None => blob_not_found(&request.method),
            },
            Method::PUT if request.query_value("comp") == Some("metadata") => {
                match blobs.get_mut(blob) {
                    Some(stored) => {
                        stored.metadata = request_metadata(request);
                        stored.last_modified = Utc::now();
                        empty_response(StatusCode::OK)
                    }
                    None => blob_not_found(&request.method),
                }
            }
            Method::PUT => {
                if request.header_value("x-ms-blob-type") != Some("BlockBlob") {
                    return error_response(
                        &request.method,
                        StatusCode::BAD_REQUEST,
                        "MissingRequiredHeader",
                        "An HTTP header that's mandatory for this request is not specified.",
                    );
                }
                let content_type = request
                    .header_value("content-type")
                    .filter(|v| !v.is_empty())
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let stored = StoredBlob::new(
                    request.body.clone(),
                    content_type,
                    request_metadata(request),
                );
                let mut headers = HeaderMap::new();
                insert_header(&mut headers, "etag", &stored.etag);
                insert_header(&mut headers, "content-md5", &stored.content_md5());
                blobs.insert(blob.to_string(), stored);
                BlobResponse {
                    status: StatusCode::CREATED,
                    headers,
                    body: Bytes::new(),
                }
            }
            _ => error_response(
                &request.method,
                StatusCode::METHOD_NOT_ALLOWED,
                "UnsupportedHttpVerb",
                "The resource doesn't support the specified HTTP verb.",
            ),
        }
    }

    async fn copy_blob(
        &self,
        request: &BlobRequest,
        container: &str,
        blob: &str,
        source: &str,
    ) -> BlobResponse {
        if self.fail_copies.load(Ordering::SeqCst) {
            return error_response(
                &request.method,
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalError",
                "The server encountered an internal error.",
            );
        }

        let Some((src_container, src_blob)) = self.parse_copy_source(source) else {
            return error_response(
                &request.method,
                StatusCode::BAD_REQUEST,
                "CannotVerifyCopySource",
                "The copy source is not within this account.",
            );
        };

        let mut containers = self.containers.write().await;
        if !containers.contains_key(container) {
            return container_not_found(&request.method);
        }
        let Some(source_blob) = containers
            .get(&src_container)
            .and_then(|blobs| blobs.get(&src_blob))
            .cloned()
        else {
            return error_response(
                &request.method,
                StatusCode::NOT_FOUND,
                "CannotVerifyCopySource",
                "The specified blob does not exist.",
            );
        };

        let copied = StoredBlob {
            last_modified: Utc::now(),
            ..source_blob
        };
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "etag", &copied.etag);
        insert_header(&mut headers, "x-ms-copy-status", "success");
        insert_header(&mut headers, "x-ms-copy-id", &uuid::Uuid::new_v4().to_string());

        if let Some(blobs) = containers.get_mut(container) {
            blobs.insert(blob.to_string(), copied);
        }

        BlobResponse {
            status: StatusCode::ACCEPTED,
            headers,
            body: Bytes::new(),
        }
    }

    /// Resolve an absolute copy-source URL into `(container, blob)`.
    fn parse_copy_source(&self, source: &str) -> Option<(String, String)> {
        let path = source.strip_prefix(&self.endpoint)?.strip_prefix('/')?;
        let decoded = percent_encoding::percent_decode_str(path)
            .decode_utf8()
            .ok()?;
        let (container, blob) = decoded.split_once('/')?;
        if blob.is_empty() {
            return None;
        }
        Some((container.to_string(), blob.to_string()))
    }
}

impl BlobTransport for MemoryTransport {
    fn send(
        &self,
        request: BlobRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BlobResponse, TransportError>> + Send + '_>> {
        Box::pin(async move { Ok(self.handle(request).await) })
    }
}

// -- Response helpers ---------------------------------------------------------

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

fn empty_response(status: StatusCode) -> BlobResponse {
    BlobResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

/// Error response with `x-ms-error-code`; HEAD responses carry no body.
fn error_response(method: &Method, status: StatusCode, code: &str, message: &str) -> BlobResponse {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "x-ms-error-code", code);
    let body = if *method == Method::HEAD {
        Bytes::new()
    } else {
        insert_header(&mut headers, "content-type", "application/xml");
        Bytes::from(render_error(code, message))
    };
    BlobResponse {
        status,
        headers,
        body,
    }
}

fn container_not_found(method: &Method) -> BlobResponse {
    error_response(
        method,
        StatusCode::NOT_FOUND,
        "ContainerNotFound",
        "The specified container does not exist.",
    )
}

fn blob_not_found(method: &Method) -> BlobResponse {
    error_response(
        method,
        StatusCode::NOT_FOUND,
        "BlobNotFound",
        "The specified blob does not exist.",
    )
}

/// Property and metadata headers returned by Get/Head Blob.
fn blob_headers(blob: &StoredBlob) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "content-length", &blob.data.len().to_string());
    insert_header(&mut headers, "content-type", &blob.content_type);
    insert_header(
        &mut headers,
        "last-modified",
        &httpdate::fmt_http_date(blob.last_modified.into()),
    );
    insert_header(&mut headers, "etag", &blob.etag);
    insert_header(&mut headers, "content-md5", &blob.content_md5());
    insert_header(&mut headers, "x-ms-blob-type", "BlockBlob");
    for (key, value) in &blob.metadata {
        insert_header(&mut headers, &format!("{META_HEADER_PREFIX}{key}"), value);
    }
    headers
}

/// Collect `x-ms-meta-*` request headers, lower-casing keys.
fn request_metadata(request: &BlobRequest) -> Metadata {
    request
        .headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            let key = name.strip_prefix(META_HEADER_PREFIX)?;
            (!key.is_empty()).then(|| (key.to_string(), value.clone()))
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_list_blobs;

    const ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

    async fn transport_with_container() -> MemoryTransport {
        let t = MemoryTransport::new(ENDPOINT);
        let resp = t
            .send(BlobRequest::new(Method::PUT, "box").query("restype", "container"))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);
        t
    }

    fn put(resource: &str, body: &'static [u8]) -> BlobRequest {
        BlobRequest::new(Method::PUT, resource)
            .header("x-ms-blob-type", "BlockBlob")
            .body(Bytes::from_static(body))
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let t = transport_with_container().await;
        let resp = t
            .send(put("box/a.txt", b"hello").header("Content-Type", "text/plain"))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);
        assert!(resp.header("etag").is_some());

        let resp = t.send(BlobRequest::new(Method::GET, "box/a.txt")).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, Bytes::from_static(b"hello"));
        assert_eq!(resp.header("content-type"), Some("text/plain"));
        assert_eq!(resp.header("content-length"), Some("5"));
    }

    #[tokio::test]
    async fn test_head_missing_blob_has_error_code_header_and_no_body() {
        let t = transport_with_container().await;
        let resp = t.send(BlobRequest::new(Method::HEAD, "box/none")).await.unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.header("x-ms-error-code"), Some("BlobNotFound"));
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn test_missing_container() {
        let t = MemoryTransport::new(ENDPOINT);
        let resp = t.send(BlobRequest::new(Method::GET, "nope/a.txt")).await.unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.header("x-ms-error-code"), Some("ContainerNotFound"));
    }

    #[tokio::test]
    async fn test_create_container_twice_conflicts() {
        let t = transport_with_container().await;
        let resp = t
            .send(BlobRequest::new(Method::PUT, "box").query("restype", "container"))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_copy_blob_and_source_resolution() {
        let t = transport_with_container().await;
        t.send(put("box/dir/a b.txt", b"data")).await.unwrap();

        let source = format!("{ENDPOINT}/box/dir/a%20b.txt");
        let resp = t
            .send(BlobRequest::new(Method::PUT, "box/copy.txt").header("x-ms-copy-source", source))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::ACCEPTED);
        assert_eq!(resp.header("x-ms-copy-status"), Some("success"));

        let resp = t.send(BlobRequest::new(Method::GET, "box/copy.txt")).await.unwrap();
        assert_eq!(resp.body, Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn test_copy_failure_injection() {
        let t = transport_with_container().await;
        t.send(put("box/a.txt", b"data")).await.unwrap();
        t.set_fail_copies(true);

        let resp = t
            .send(
                BlobRequest::new(Method::PUT, "box/b.txt")
                    .header("x-ms-copy-source", format!("{ENDPOINT}/box/a.txt")),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(t.blob_names("box").await, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let t = transport_with_container().await.with_page_size(2);
        for name in ["box/a", "box/b", "box/c", "box/other/d"] {
            t.send(put(name, b"x")).await.unwrap();
        }

        let list = |marker: Option<&str>| {
            let mut req = BlobRequest::new(Method::GET, "box")
                .query("restype", "container")
                .query("comp", "list")
                .query("prefix", "");
            if let Some(m) = marker {
                req = req.query("marker", m);
            }
            req
        };

        let resp = t.send(list(None)).await.unwrap();
        let page = parse_list_blobs(std::str::from_utf8(&resp.body).unwrap()).unwrap();
        let names: Vec<_> = page.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(page.next_marker.as_deref(), Some("c"));

        let resp = t.send(list(Some("c"))).await.unwrap();
        let page = parse_list_blobs(std::str::from_utf8(&resp.body).unwrap()).unwrap();
        let names: Vec<_> = page.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "other/d"]);
        assert!(page.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_set_metadata_replaces_map() {
        let t = transport_with_container().await;
        t.send(put("box/a.txt", b"x").header("x-ms-meta-old", "1"))
            .await
            .unwrap();
        let resp = t
            .send(
                BlobRequest::new(Method::PUT, "box/a.txt")
                    .query("comp", "metadata")
                    .header("X-MS-META-Color", "blue"),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);

        let resp = t.send(BlobRequest::new(Method::HEAD, "box/a.txt")).await.unwrap();
        assert_eq!(resp.header("x-ms-meta-color"), Some("blue"));
        assert!(resp.header("x-ms-meta-old").is_none());
    }

    #[tokio::test]
    async fn test_unsigned_request_rejected_when_signer_configured() {
        let signer =
            SharedKeySigner::new("devstoreaccount1", "YmxvYmZzLXRlc3QtYWNjb3VudC1rZXktMDAwMDAx")
                .unwrap();
        let t = MemoryTransport::new(ENDPOINT).with_signer(signer.clone());

        let unsigned = BlobRequest::new(Method::PUT, "box").query("restype", "container");
        let resp = t.send(unsigned.clone()).await.unwrap();
        assert_eq!(resp.status, StatusCode::FORBIDDEN);
        assert_eq!(resp.header("x-ms-error-code"), Some("AuthenticationFailed"));

        let mut signed = unsigned;
        signer.authorize(&mut signed).unwrap();
        let resp = t.send(signed).await.unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(t.request_count(), 2);
    }
}
