//! Blob-storage error types.
//!
//! Every failure surfaced by [`crate::filesystem::FileSystem`] is a
//! [`BlobError`].  Each variant maps to a stable string code so callers
//! can branch on the kind of failure without matching on messages.

use http::StatusCode;
use thiserror::Error;

use crate::transport::backend::{BlobResponse, TransportError};
use crate::xml::parse_service_error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BlobError>;

/// Failure kinds of the blob file-system client.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Credentials are malformed or the service rejected the signature.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// The connection descriptor could not be parsed.
    #[error("invalid connection string: {message}")]
    InvalidConnectionString { message: String },

    /// A content read targeted a blob that does not exist.
    #[error("blob not found: {path}")]
    BlobNotFound { path: String },

    /// The bound container does not exist.
    #[error("container not found: {container}")]
    ContainerNotFound { container: String },

    /// The requested historical version does not exist.
    #[error("version {version_id} not found for blob: {path}")]
    VersionNotFound { path: String, version_id: String },

    /// The live version can only be removed through the primary delete.
    #[error("the current version of {path} cannot be deleted as a version")]
    CannotDeleteCurrentVersion { path: String },

    /// The input handed to a streaming write could not be read.
    #[error("invalid stream: {message}")]
    InvalidStream { message: String },

    /// The path addresses the reserved version namespace.
    #[error("path is inside the reserved version namespace: {path}")]
    ReservedPath { path: String },

    /// The path is not a valid blob name.
    #[error("invalid blob path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A version identifier is neither `current` nor a Unix timestamp.
    #[error("invalid version id: {version_id}")]
    InvalidVersionId { version_id: String },

    /// A metadata key or value cannot be carried as a header.
    #[error("invalid metadata entry: {key}")]
    InvalidMetadata { key: String },

    /// The service returned a body this client could not interpret.
    #[error("malformed service response: {message}")]
    MalformedResponse { message: String },

    /// The request never produced a response (connect failure, timeout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service answered with an unexpected status.
    #[error("service error {status} ({code}): {message}")]
    Service {
        status: StatusCode,
        code: String,
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BlobError {
    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            BlobError::Authentication { .. } => "AuthenticationFailed",
            BlobError::InvalidConnectionString { .. } => "InvalidConnectionString",
            BlobError::BlobNotFound { .. } => "BlobNotFound",
            BlobError::ContainerNotFound { .. } => "ContainerNotFound",
            BlobError::VersionNotFound { .. } => "VersionNotFound",
            BlobError::CannotDeleteCurrentVersion { .. } => "CannotDeleteCurrentVersion",
            BlobError::InvalidStream { .. } => "InvalidStream",
            BlobError::ReservedPath { .. } => "ReservedPath",
            BlobError::InvalidPath { .. } => "InvalidPath",
            BlobError::InvalidVersionId { .. } => "InvalidVersionId",
            BlobError::InvalidMetadata { .. } => "InvalidMetadata",
            BlobError::MalformedResponse { .. } => "MalformedResponse",
            BlobError::Transport(_) => "TransportError",
            BlobError::Service { .. } => "ServiceError",
            BlobError::Internal(_) => "InternalError",
        }
    }

    /// True for the not-found family (blob, container, version).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BlobError::BlobNotFound { .. }
                | BlobError::ContainerNotFound { .. }
                | BlobError::VersionNotFound { .. }
        )
    }

    /// Translate an unsuccessful service response into an error.
    ///
    /// The error code is taken from the `x-ms-error-code` header when
    /// present (HEAD responses carry no body), otherwise from the XML
    /// `<Error>` document.  Blob-level 404s are handled by callers, who
    /// know which path was addressed.
    pub fn from_response(response: &BlobResponse, container: &str) -> Self {
        let body = String::from_utf8_lossy(&response.body);
        let parsed = parse_service_error(&body);
        let code = response
            .header("x-ms-error-code")
            .map(str::to_string)
            .or_else(|| parsed.as_ref().map(|(code, _)| code.clone()))
            .unwrap_or_default();
        let message = parsed
            .map(|(_, message)| message)
            .unwrap_or_else(|| response.status.to_string());

        if code == "ContainerNotFound" {
            return BlobError::ContainerNotFound {
                container: container.to_string(),
            };
        }

        if response.status == StatusCode::FORBIDDEN {
            return BlobError::Authentication {
                message: format!("{code}: {message}"),
            };
        }

        BlobError::Service {
            status: response.status,
            code,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue};

    fn response(status: StatusCode, code_header: Option<&str>, body: &str) -> BlobResponse {
        let mut headers = HeaderMap::new();
        if let Some(code) = code_header {
            headers.insert("x-ms-error-code", HeaderValue::from_str(code).unwrap());
        }
        BlobResponse {
            status,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_container_not_found_from_header() {
        let resp = response(StatusCode::NOT_FOUND, Some("ContainerNotFound"), "");
        let err = BlobError::from_response(&resp, "docs");
        assert!(matches!(err, BlobError::ContainerNotFound { ref container } if container == "docs"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_forbidden_maps_to_authentication() {
        let body = "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>AuthenticationFailed</Code><Message>Signature mismatch</Message></Error>";
        let resp = response(StatusCode::FORBIDDEN, None, body);
        let err = BlobError::from_response(&resp, "docs");
        assert_eq!(err.code(), "AuthenticationFailed");
        assert!(err.to_string().contains("Signature mismatch"));
    }

    #[test]
    fn test_other_status_is_service_error() {
        let body = "<Error><Code>ServerBusy</Code><Message>try later</Message></Error>";
        let resp = response(StatusCode::SERVICE_UNAVAILABLE, None, body);
        match BlobError::from_response(&resp, "docs") {
            BlobError::Service {
                status,
                code,
                message,
            } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(code, "ServerBusy");
                assert_eq!(message, "try later");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_version_not_found_message() {
        let err = BlobError::VersionNotFound {
            path: "a.txt".to_string(),
            version_id: "1700000000".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "version 1700000000 not found for blob: a.txt"
        );
        assert_eq!(err.code(), "VersionNotFound");
    }
}
