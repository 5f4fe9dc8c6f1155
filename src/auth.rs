//! Azure Shared Key request signing.
//!
//! Every outgoing request is authorized with
//! `Authorization: SharedKey {account}:{signature}` where the signature is
//! the base64 HMAC-SHA256 of the string-to-sign, keyed with the decoded
//! account key.
//!
//! The string-to-sign format:
//! ```text
//! VERB\n
//! Content-Encoding\n
//! Content-Language\n
//! Content-Length\n
//! Content-MD5\n
//! Content-Type\n
//! Date\n
//! If-Modified-Since\n
//! If-Match\n
//! If-None-Match\n
//! If-Unmodified-Since\n
//! Range\n
//! CanonicalizedHeaders\n
//! CanonicalizedResource
//! ```
//!
//! Content-Length is left empty when the body is empty; the service
//! rejects a literal `0` on zero-byte requests.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::SystemTime;
use subtle::ConstantTimeEq;

use crate::config::Credentials;
use crate::errors::{BlobError, Result};
use crate::transport::backend::BlobRequest;

type HmacSha256 = Hmac<Sha256>;

/// Service REST API version sent on every request.
pub const SERVICE_VERSION: &str = "2021-08-06";

/// Prefix of the service's custom headers.
pub const SERVICE_HEADER_PREFIX: &str = "x-ms-";

/// Standard headers that follow the verb in the string-to-sign, in order.
const STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Signs requests with a storage account's shared key.
#[derive(Clone)]
pub struct SharedKeySigner {
    account: String,
    key: Vec<u8>,
    /// Path segment of the endpoint (e.g. `devstoreaccount1` for Azurite),
    /// prepended to every resource in the canonicalized resource.
    resource_root: String,
}

impl std::fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeySigner")
            .field("account", &self.account)
            .field("resource_root", &self.resource_root)
            .finish_non_exhaustive()
    }
}

impl SharedKeySigner {
    /// Build a signer from an account name and a base64 account key.
    pub fn new(account: &str, account_key: &str) -> Result<Self> {
        if account.is_empty() {
            return Err(BlobError::Authentication {
                message: "account name is empty".to_string(),
            });
        }
        let key = BASE64_STANDARD
            .decode(account_key.trim())
            .map_err(|e| BlobError::Authentication {
                message: format!("account key is not valid base64: {e}"),
            })?;
        if key.is_empty() {
            return Err(BlobError::Authentication {
                message: "account key is empty".to_string(),
            });
        }
        Ok(Self {
            account: account.to_string(),
            key,
            resource_root: String::new(),
        })
    }

    /// Build a signer for resolved credentials, honouring path-style
    /// endpoints such as `http://127.0.0.1:10000/devstoreaccount1`.
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        Ok(Self::new(&credentials.account_name, &credentials.account_key)?
            .with_resource_root(&credentials.endpoint_path()))
    }

    /// Set the endpoint path prefix used in the canonicalized resource.
    pub fn with_resource_root(mut self, root: &str) -> Self {
        self.resource_root = root.trim_matches('/').to_string();
        self
    }

    /// The account this signer authenticates as.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Build the exact string the signature is computed over.
    pub fn string_to_sign(&self, request: &BlobRequest) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(STANDARD_HEADERS.len() + 3);
        fields.push(request.method.as_str().to_string());

        for name in STANDARD_HEADERS {
            let value = if name == "content-length" {
                content_length_field(request)
            } else {
                request.header_value(name).unwrap_or_default().to_string()
            };
            fields.push(value);
        }

        let headers = canonicalized_headers(&request.headers);
        if !headers.is_empty() {
            fields.push(headers);
        }

        let resource_path = if self.resource_root.is_empty() {
            request.resource.clone()
        } else {
            format!("{}/{}", self.resource_root, request.resource)
        };
        fields.push(canonicalized_resource(
            &self.account,
            &resource_path,
            &request.query,
        ));

        fields.join("\n")
    }

    /// Compute the base64 signature for `request`.
    pub fn sign(&self, request: &BlobRequest) -> Result<String> {
        let string_to_sign = self.string_to_sign(request);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| BlobError::Authentication {
                message: format!("HMAC key error: {e}"),
            })?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Compute the full `Authorization` header value for `request`.
    pub fn authorization(&self, request: &BlobRequest) -> Result<String> {
        Ok(format!("SharedKey {}:{}", self.account, self.sign(request)?))
    }

    /// Attach the `Authorization` header to `request`.
    pub fn authorize(&self, request: &mut BlobRequest) -> Result<()> {
        let value = self.authorization(request)?;
        request.set_header("Authorization", value);
        Ok(())
    }

    /// Check a received request's `Authorization` header against this key.
    pub fn verify(&self, request: &BlobRequest) -> bool {
        let Some(header) = request.header_value("authorization") else {
            return false;
        };
        let Some(credential) = header.strip_prefix("SharedKey ") else {
            return false;
        };
        let Some((account, provided)) = credential.split_once(':') else {
            return false;
        };
        if account != self.account {
            return false;
        }

        // Strip the header before recomputing; it is not part of the
        // canonicalized headers but keeps the comparison self-contained.
        let mut unsigned = request.clone();
        unsigned
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case("authorization"));

        match self.sign(&unsigned) {
            Ok(expected) => expected.as_bytes().ct_eq(provided.as_bytes()).into(),
            Err(_) => false,
        }
    }
}

/// Content-Length as it appears in the string-to-sign.
fn content_length_field(request: &BlobRequest) -> String {
    if request.body.is_empty() {
        String::new()
    } else {
        request.body.len().to_string()
    }
}

/// Canonicalize `x-ms-*` headers: lower-cased names, trimmed values,
/// sorted by name, one `name:value` per line.
pub fn canonicalized_headers(headers: &[(String, String)]) -> String {
    let mut ms_headers: Vec<(String, &str)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .filter(|(k, _)| k.starts_with(SERVICE_HEADER_PREFIX))
        .collect();
    ms_headers.sort_by(|a, b| a.0.cmp(&b.0));

    ms_headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Canonicalize the resource: `/{account}/{resource_path}` followed by
/// one `\n{key}:{value}` line per query parameter, sorted by key.
/// Repeated keys have their values sorted and comma-joined.
pub fn canonicalized_resource(
    account: &str,
    resource_path: &str,
    query: &[(String, String)],
) -> String {
    let mut canonicalized = format!("/{account}/{resource_path}");

    let mut params: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (k, v) in query {
        params.entry(k.to_ascii_lowercase()).or_default().push(v);
    }
    for (k, mut values) in params {
        values.sort_unstable();
        canonicalized.push_str(&format!("\n{}:{}", k, values.join(",")));
    }

    canonicalized
}

/// Current UTC time in RFC 1123 format, as used by `x-ms-date`.
pub fn rfc1123_date() -> String {
    httpdate::fmt_http_date(SystemTime::now())
}
