//! File-system style client bound to one container.
//!
//! [`FileSystem`] owns the credentials, the container name, a
//! [`SharedKeySigner`] and an `Arc<dyn BlobTransport>`.  Every request it
//! issues gets `x-ms-date`, `x-ms-version` and `x-ms-client-request-id`
//! headers and is signed before being handed to the transport.
//!
//! Blob names are always derived from an [`ObjectKey`]; the version
//! namespace is reached only through the operations in
//! [`crate::versioning`].

use bytes::Bytes;
use http::{Method, StatusCode};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::auth::{rfc1123_date, SharedKeySigner, SERVICE_VERSION};
use crate::config::{Credentials, StorageConfig};
use crate::errors::{BlobError, Result};
use crate::metadata::{
    metadata_to_headers, properties_from_headers, BlobEntry, BlobProperties, Metadata,
    DEFAULT_CONTENT_TYPE,
};
use crate::metrics;
use crate::path::{is_reserved, BlobPath, ObjectKey};
use crate::transport::azure::{encode_resource, AzureTransport};
use crate::transport::backend::{BlobRequest, BlobResponse, BlobTransport};
use crate::xml::parse_list_blobs;

/// A blob container exposed through file-like operations.
pub struct FileSystem {
    transport: Arc<dyn BlobTransport>,
    signer: SharedKeySigner,
    credentials: Credentials,
    container: String,
}

impl FileSystem {
    /// Bind `container` using `credentials` over an arbitrary transport.
    pub fn new(
        credentials: Credentials,
        container: impl Into<String>,
        transport: Arc<dyn BlobTransport>,
    ) -> Result<Self> {
        let signer = SharedKeySigner::from_credentials(&credentials)?;
        let container = container.into();

        info!(
            "Blob file system initialized: account={} container={} endpoint={}",
            credentials.account_name, container, credentials.blob_endpoint
        );

        Ok(Self {
            transport,
            signer,
            credentials,
            container,
        })
    }

    /// Resolve credentials from `config` and connect over HTTPS.
    pub fn connect(config: &StorageConfig) -> Result<Self> {
        let credentials = config.credentials()?;
        let transport = AzureTransport::new(&credentials.blob_endpoint, config.timeout())?;
        Self::new(credentials, config.container.clone(), Arc::new(transport))
    }

    /// The container this handle is bound to.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// The resolved credentials.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    // -- Request plumbing -----------------------------------------------------

    /// Stamp, sign and send one request.
    pub(crate) async fn execute(&self, mut request: BlobRequest) -> Result<BlobResponse> {
        request.set_header("x-ms-date", rfc1123_date());
        request.set_header("x-ms-version", SERVICE_VERSION);
        request.set_header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string());
        self.signer.authorize(&mut request)?;

        let method = request.method.clone();
        let resource = request.resource.clone();
        debug!("{} {}", method, resource);

        match self.transport.send(request).await {
            Ok(response) => {
                metrics::record_request(method.as_str(), response.status.as_u16());
                debug!("{} {} -> {}", method, resource, response.status);
                Ok(response)
            }
            Err(e) => {
                metrics::record_transport_failure(method.as_str());
                warn!("{} {} failed: {}", method, resource, e);
                Err(e.into())
            }
        }
    }

    fn container_request(&self, method: Method) -> BlobRequest {
        BlobRequest::new(method, self.container.as_str()).query("restype", "container")
    }

    fn blob_request(&self, method: Method, key: ObjectKey<'_>) -> BlobRequest {
        BlobRequest::new(method, format!("{}/{}", self.container, key.blob_name()))
    }

    /// Classify a blob-level response: `Ok(true)` on success, `Ok(false)`
    /// when the blob is missing, `Err` otherwise (a missing container
    /// included).
    fn blob_outcome(&self, response: &BlobResponse) -> Result<bool> {
        if response.is_success() {
            return Ok(true);
        }
        let err = BlobError::from_response(response, &self.container);
        if response.is_not_found() && !matches!(err, BlobError::ContainerNotFound { .. }) {
            return Ok(false);
        }
        Err(err)
    }

    // -- Object primitives ----------------------------------------------------

    pub(crate) async fn put_object(
        &self,
        key: ObjectKey<'_>,
        content: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let request = self
            .blob_request(Method::PUT, key)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", content_type)
            .body(content);
        let response = self.execute(request).await?;
        if !response.is_success() {
            return Err(BlobError::from_response(&response, &self.container));
        }
        Ok(())
    }

    /// Download an object; `None` when it does not exist.
    pub(crate) async fn get_object(
        &self,
        key: ObjectKey<'_>,
    ) -> Result<Option<(Bytes, BlobProperties)>> {
        let response = self.execute(self.blob_request(Method::GET, key)).await?;
        if !self.blob_outcome(&response)? {
            return Ok(None);
        }
        let properties = properties_from_headers(&response.headers);
        Ok(Some((response.body, properties)))
    }

    /// Probe an object's properties; `None` when it does not exist.
    pub(crate) async fn head_object(&self, key: ObjectKey<'_>) -> Result<Option<BlobProperties>> {
        let response = self.execute(self.blob_request(Method::HEAD, key)).await?;
        if !self.blob_outcome(&response)? {
            return Ok(None);
        }
        Ok(Some(properties_from_headers(&response.headers)))
    }

    /// Delete an object; `false` when there was nothing to delete.
    pub(crate) async fn delete_object(&self, key: ObjectKey<'_>) -> Result<bool> {
        let response = self.execute(self.blob_request(Method::DELETE, key)).await?;
        self.blob_outcome(&response)
    }

    /// Server-side copy inside the bound container.
    pub(crate) async fn copy_object(&self, from: ObjectKey<'_>, to: ObjectKey<'_>) -> Result<()> {
        let source = format!(
            "{}/{}",
            self.credentials.blob_endpoint,
            encode_resource(&format!("{}/{}", self.container, from.blob_name()))
        );
        let request = self
            .blob_request(Method::PUT, to)
            .header("x-ms-copy-source", source);
        let response = self.execute(request).await?;
        if !self.blob_outcome(&response)? {
            return Err(BlobError::BlobNotFound {
                path: from.blob_name(),
            });
        }
        Ok(())
    }

    /// List every object whose name starts with `prefix`, following
    /// `NextMarker` until the listing is exhausted.
    pub(crate) async fn list_objects(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut request = self
                .container_request(Method::GET)
                .query("comp", "list")
                .query("prefix", prefix);
            if let Some(m) = &marker {
                request = request.query("marker", m.as_str());
            }

            let response = self.execute(request).await?;
            if !response.is_success() {
                return Err(BlobError::from_response(&response, &self.container));
            }

            let page = parse_list_blobs(&String::from_utf8_lossy(&response.body))?;
            entries.extend(page.entries);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(entries)
    }

    // -- Content operations ---------------------------------------------------

    /// Write `content` to `path` as `application/octet-stream`, shadowing
    /// the previous content first.
    pub async fn write(&self, path: &BlobPath, content: impl Into<Bytes>) -> Result<()> {
        self.write_with_content_type(path, content, DEFAULT_CONTENT_TYPE)
            .await
    }

    /// Write `content` with an explicit content type.
    pub async fn write_with_content_type(
        &self,
        path: &BlobPath,
        content: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<()> {
        self.preserve_current(path).await;
        self.put_object(ObjectKey::Primary(path), content.into(), content_type)
            .await
    }

    /// Drain `reader` and write its bytes to `path`.
    pub async fn write_stream<R>(&self, path: &BlobPath, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| BlobError::InvalidStream {
                message: e.to_string(),
            })?;
        self.write(path, buf).await
    }

    /// Read the full content of `path`.
    pub async fn get(&self, path: &BlobPath) -> Result<Bytes> {
        match self.get_object(ObjectKey::Primary(path)).await? {
            Some((content, _)) => Ok(content),
            None => Err(BlobError::BlobNotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Read `path` as an async reader.
    pub async fn read_stream(&self, path: &BlobPath) -> Result<std::io::Cursor<Bytes>> {
        Ok(std::io::Cursor::new(self.get(path).await?))
    }

    /// Delete the live object at `path`.  Its version history is kept.
    pub async fn delete(&self, path: &BlobPath) -> Result<()> {
        if !self.delete_object(ObjectKey::Primary(path)).await? {
            return Err(BlobError::BlobNotFound {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    pub async fn exists(&self, path: &BlobPath) -> Result<bool> {
        Ok(self.head_object(ObjectKey::Primary(path)).await?.is_some())
    }

    /// List primary objects under `prefix`.  Shadow versions are never
    /// included, and a prefix inside the version namespace is rejected.
    pub async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        if is_reserved(prefix) {
            return Err(BlobError::ReservedPath {
                path: prefix.to_string(),
            });
        }
        let entries = self.list_objects(prefix).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| !is_reserved(&entry.name))
            .collect())
    }

    /// Server-side copy of `src` to `dst`.  No version of `dst` is taken.
    pub async fn copy(&self, src: &BlobPath, dst: &BlobPath) -> Result<()> {
        self.copy_object(ObjectKey::Primary(src), ObjectKey::Primary(dst))
            .await
    }

    /// Copy `src` to `dst`, then delete `src`.  Moving a blob onto itself
    /// leaves it in place.
    pub async fn move_blob(&self, src: &BlobPath, dst: &BlobPath) -> Result<()> {
        if src == dst {
            if !self.exists(src).await? {
                return Err(BlobError::BlobNotFound {
                    path: src.to_string(),
                });
            }
            return Ok(());
        }
        self.copy(src, dst).await?;
        self.delete(src).await
    }

    /// Absolute URL of `path`.
    pub fn get_url(&self, path: &BlobPath) -> String {
        format!(
            "{}/{}",
            self.credentials.blob_endpoint,
            encode_resource(&format!("{}/{}", self.container, path))
        )
    }

    // -- Properties and metadata ----------------------------------------------

    /// Size in bytes, or `None` if `path` does not exist.
    pub async fn size(&self, path: &BlobPath) -> Result<Option<u64>> {
        Ok(self
            .head_object(ObjectKey::Primary(path))
            .await?
            .map(|p| p.size))
    }

    /// Content type, or `None` if `path` does not exist.
    pub async fn mime_type(&self, path: &BlobPath) -> Result<Option<String>> {
        Ok(self
            .head_object(ObjectKey::Primary(path))
            .await?
            .map(|p| p.content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())))
    }

    /// All properties of `path`.
    pub async fn properties(&self, path: &BlobPath) -> Result<BlobProperties> {
        self.head_object(ObjectKey::Primary(path))
            .await?
            .ok_or_else(|| BlobError::BlobNotFound {
                path: path.to_string(),
            })
    }

    /// Replace the user metadata of `path`.
    pub async fn set_metadata(&self, path: &BlobPath, metadata: &Metadata) -> Result<()> {
        let mut request = self
            .blob_request(Method::PUT, ObjectKey::Primary(path))
            .query("comp", "metadata");
        for (name, value) in metadata_to_headers(metadata)? {
            request.set_header(&name, value);
        }

        let response = self.execute(request).await?;
        if !self.blob_outcome(&response)? {
            return Err(BlobError::BlobNotFound {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    pub async fn get_metadata(&self, path: &BlobPath) -> Result<Metadata> {
        Ok(self.properties(path).await?.metadata)
    }

    // -- Container operations -------------------------------------------------

    /// Create the bound container.  Returns `false` if it already existed.
    pub async fn create_container(&self) -> Result<bool> {
        let response = self.execute(self.container_request(Method::PUT)).await?;
        if response.status == StatusCode::CONFLICT {
            return Ok(false);
        }
        if !response.is_success() {
            return Err(BlobError::from_response(&response, &self.container));
        }
        info!("Created container: {}", self.container);
        Ok(true)
    }

    /// Delete the bound container and everything in it.
    pub async fn delete_container(&self) -> Result<()> {
        let response = self.execute(self.container_request(Method::DELETE)).await?;
        if response.is_not_found() {
            return Err(BlobError::ContainerNotFound {
                container: self.container.clone(),
            });
        }
        if !response.is_success() {
            return Err(BlobError::from_response(&response, &self.container));
        }
        info!("Deleted container: {}", self.container);
        Ok(())
    }

    pub async fn container_exists(&self) -> Result<bool> {
        let response = self.execute(self.container_request(Method::HEAD)).await?;
        if response.is_not_found() {
            return Ok(false);
        }
        if !response.is_success() {
            return Err(BlobError::from_response(&response, &self.container));
        }
        Ok(true)
    }
}
