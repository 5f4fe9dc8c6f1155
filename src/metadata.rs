//! Typed records for listings, blob properties and user metadata.
//!
//! User metadata travels as `x-ms-meta-{key}` headers.  Keys are
//! case-insensitive and are always stored lower-cased.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::errors::{BlobError, Result};

/// Header-name prefix carrying user metadata.
pub const META_HEADER_PREFIX: &str = "x-ms-meta-";

/// Content type assumed when the service reports none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// User-defined metadata: lower-cased key to value.
pub type Metadata = BTreeMap<String, String>;

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobEntry {
    /// Blob name inside the container.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, if reported.
    pub last_modified: Option<DateTime<Utc>>,
    /// Content type (empty when the service reported none).
    pub content_type: String,
    /// Entity tag, if reported.
    pub etag: Option<String>,
}

/// Properties returned by a HEAD probe on a single blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobProperties {
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub metadata: Metadata,
}

/// Collect `x-ms-meta-*` headers into a metadata map.
pub fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            // HeaderName is always lower-case.
            let key = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            if key.is_empty() {
                return None;
            }
            let value = value.to_str().ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Render a metadata map as `x-ms-meta-*` headers, validating each entry.
///
/// Keys must be valid C# identifiers, as the service requires: an ASCII
/// letter or `_` followed by letters, digits or `_`.  Values must be
/// visible ASCII or spaces so they survive as header values.
pub fn metadata_to_headers(metadata: &Metadata) -> Result<Vec<(String, String)>> {
    metadata
        .iter()
        .map(|(key, value)| {
            let key_ok = is_identifier(key);
            let value_ok = value.bytes().all(|b| b == b' ' || b.is_ascii_graphic());
            if !key_ok || !value_ok {
                return Err(BlobError::InvalidMetadata { key: key.clone() });
            }
            Ok((
                format!("{META_HEADER_PREFIX}{}", key.to_ascii_lowercase()),
                value.clone(),
            ))
        })
        .collect()
}

fn is_identifier(key: &str) -> bool {
    let mut bytes = key.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_alphabetic() || first == b'_' => {
            bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }
        _ => false,
    }
}

/// Build [`BlobProperties`] from HEAD/GET response headers.
pub fn properties_from_headers(headers: &HeaderMap) -> BlobProperties {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    BlobProperties {
        size: header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        content_type: header("content-type").map(str::to_string),
        last_modified: header("last-modified").and_then(parse_http_date),
        etag: header("etag").map(str::to_string),
        metadata: metadata_from_headers(headers),
    }
}

/// Parse an RFC 1123 date as used by `Last-Modified`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value).ok().map(DateTime::<Utc>::from)
}
