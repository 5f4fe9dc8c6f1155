//! Blob paths and the two-tier object namespace.
//!
//! Callers address objects with a validated [`BlobPath`].  Internally every
//! blob name is produced from an [`ObjectKey`], which is either the primary
//! object or one of its shadow versions:
//!
//! ```text
//! Primary:  {path}
//! Version:  .versions/{path}/{unix_timestamp}
//! ```
//!
//! The `.versions/` prefix is reserved.  [`BlobPath::parse`] rejects it,
//! so shadow objects can only ever be reached through the version API.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::{BlobError, Result};

/// Reserved prefix of the version namespace.
pub const VERSIONS_PREFIX: &str = ".versions/";

/// Maximum blob name length accepted by the service.
const MAX_BLOB_NAME_LEN: usize = 1024;

/// True if `name` lies inside the reserved version namespace.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(VERSIONS_PREFIX) || name == VERSIONS_PREFIX.trim_end_matches('/')
}

/// A validated, caller-addressable blob path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobPath(String);

impl BlobPath {
    /// Validate `path` as a primary blob path.
    pub fn parse(path: impl AsRef<str>) -> Result<Self> {
        let path = path.as_ref();
        let invalid = |reason: &str| BlobError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path.is_empty() {
            return Err(invalid("path is empty"));
        }
        if path.starts_with('/') {
            return Err(invalid("path must not start with '/'"));
        }
        if path.len() > MAX_BLOB_NAME_LEN {
            return Err(invalid("path exceeds 1024 bytes"));
        }
        if path.chars().any(char::is_control) {
            return Err(invalid("path contains control characters"));
        }
        if path.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(invalid("path contains a '.' or '..' segment"));
        }
        if is_reserved(path) {
            return Err(BlobError::ReservedPath {
                path: path.to_string(),
            });
        }

        Ok(Self(path.to_string()))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlobPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for BlobPath {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for BlobPath {
    type Error = BlobError;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Identifier of one revision of a blob.
///
/// `Timestamp` is declared first so that the derived ordering places
/// `Current` after every historical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VersionId {
    /// A historical revision, named by the Unix second it was minted.
    Timestamp(u64),
    /// The live object at the primary path.
    Current,
}

impl VersionId {
    /// Literal token naming the live object.
    pub const CURRENT: &'static str = "current";

    /// True for [`VersionId::Current`].
    pub fn is_current(&self) -> bool {
        matches!(self, VersionId::Current)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionId::Current => f.write_str(Self::CURRENT),
            VersionId::Timestamp(ts) => write!(f, "{ts}"),
        }
    }
}

impl FromStr for VersionId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        if s == Self::CURRENT {
            return Ok(VersionId::Current);
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(ts) = s.parse::<u64>() {
                return Ok(VersionId::Timestamp(ts));
            }
        }
        Err(BlobError::InvalidVersionId {
            version_id: s.to_string(),
        })
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A concrete object in one of the two namespace tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKey<'a> {
    /// The live object at a primary path.
    Primary(&'a BlobPath),
    /// A shadow copy of `path` minted at the given Unix second.
    Version(&'a BlobPath, u64),
}

impl ObjectKey<'_> {
    /// The blob name inside the container.
    pub fn blob_name(&self) -> String {
        match self {
            ObjectKey::Primary(path) => path.as_str().to_string(),
            ObjectKey::Version(path, ts) => format!("{}{ts}", version_prefix(path)),
        }
    }
}

/// Listing prefix holding every shadow copy of `path`.
pub fn version_prefix(path: &BlobPath) -> String {
    format!("{VERSIONS_PREFIX}{path}/")
}

/// Extract the timestamp from a shadow blob name belonging to `path`.
///
/// Only names of the exact form `.versions/{path}/{digits}` match; shadow
/// copies of nested paths (`.versions/{path}/child/{digits}`) do not.
pub fn parse_version_name(path: &BlobPath, name: &str) -> Option<u64> {
    let rest = name.strip_prefix(&version_prefix(path))?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> BlobPath {
        BlobPath::parse(s).unwrap()
    }

    #[test]
    fn test_valid_paths() {
        for p in ["a.txt", "dir/sub/file.bin", "with space.txt", ".hidden", ".versionsx/a"] {
            assert_eq!(path(p).as_str(), p);
        }
    }

    #[test]
    fn test_reserved_prefix_is_rejected() {
        for p in [".versions/a.txt/1700000000", ".versions", ".versions/"] {
            let err = BlobPath::parse(p).unwrap_err();
            assert!(matches!(err, BlobError::ReservedPath { .. }), "{p}");
        }
    }

    #[test]
    fn test_invalid_paths() {
        for p in [
            "",
            "/leading",
            "bad\nname",
            "x/../.versions/doc.txt/1700000000",
            "..",
            "./a.txt",
            "a/./b",
            "a/..",
        ] {
            let err = BlobPath::parse(p).unwrap_err();
            assert!(matches!(err, BlobError::InvalidPath { .. }), "{p:?}");
        }
        let long = "a".repeat(1025);
        assert!(BlobPath::parse(&long).is_err());

        // Dots inside a segment are ordinary characters.
        assert!(BlobPath::parse("a/..b/c.").is_ok());
        assert!(BlobPath::parse(".hidden").is_ok());
    }

    #[test]
    fn test_object_key_blob_names() {
        let p = path("docs/report.txt");
        assert_eq!(ObjectKey::Primary(&p).blob_name(), "docs/report.txt");
        assert_eq!(
            ObjectKey::Version(&p, 1732709123).blob_name(),
            ".versions/docs/report.txt/1732709123"
        );
    }

    #[test]
    fn test_parse_version_name() {
        let p = path("a.txt");
        assert_eq!(parse_version_name(&p, ".versions/a.txt/1732709123"), Some(1732709123));
        assert_eq!(parse_version_name(&p, ".versions/a.txt/"), None);
        assert_eq!(parse_version_name(&p, ".versions/a.txt/12ab"), None);
        assert_eq!(parse_version_name(&p, ".versions/a.txt/child/17"), None);
        assert_eq!(parse_version_name(&p, ".versions/a.txtx/17"), None);
        assert_eq!(parse_version_name(&p, "a.txt"), None);
    }

    #[test]
    fn test_version_id_parse_and_display() {
        assert_eq!("current".parse::<VersionId>().unwrap(), VersionId::Current);
        assert_eq!(
            "1700000000".parse::<VersionId>().unwrap(),
            VersionId::Timestamp(1700000000)
        );
        assert_eq!(VersionId::Timestamp(42).to_string(), "42");
        assert_eq!(VersionId::Current.to_string(), "current");
        for bad in ["", "-1", "1.5", "Current", "latest"] {
            assert!(bad.parse::<VersionId>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_current_orders_after_every_timestamp() {
        assert!(VersionId::Current > VersionId::Timestamp(u64::MAX));
        assert!(VersionId::Timestamp(2) > VersionId::Timestamp(1));
    }

    #[test]
    fn test_version_id_serializes_as_string() {
        assert_eq!(serde_json::to_string(&VersionId::Current).unwrap(), "\"current\"");
        assert_eq!(serde_json::to_string(&VersionId::Timestamp(7)).unwrap(), "\"7\"");
    }
}
