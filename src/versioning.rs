//! Client-side version history.
//!
//! Before every overwrite the live object is copied to a shadow object
//! under the reserved namespace:
//!
//! ```text
//! {path}                          live ("current") version
//! .versions/{path}/{unix_ts}      historical versions
//! ```
//!
//! Shadow copies are best-effort: if the copy fails the write still goes
//! ahead, the failure is logged and counted.  Restoring a version is a
//! copy-forward: the old content is written back as a new live version,
//! which shadows whatever was current before the restore.
//!
//! Concurrent writers are not coordinated.  Two racing writes to the same
//! path may each shadow an intermediate state.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{BlobError, Result};
use crate::filesystem::FileSystem;
use crate::metadata::DEFAULT_CONTENT_TYPE;
use crate::metrics;
use crate::path::{parse_version_name, version_prefix, BlobPath, ObjectKey, VersionId};

/// One entry of a blob's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub version_id: VersionId,
    pub is_current: bool,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub content_type: String,
}

/// Order records newest first: `current` leads, then historical
/// versions by descending timestamp.
pub fn sort_versions(records: &mut [VersionRecord]) {
    records.sort_by(|a, b| b.version_id.cmp(&a.version_id));
}

impl FileSystem {
    /// Version history of `path`, newest first.
    ///
    /// Includes a synthesized `current` record when the live object
    /// exists.  Empty when the path has never been written.
    pub async fn list_versions(&self, path: &BlobPath) -> Result<Vec<VersionRecord>> {
        let mut records: Vec<VersionRecord> = self
            .list_objects(&version_prefix(path))
            .await?
            .into_iter()
            .filter_map(|entry| {
                let ts = parse_version_name(path, &entry.name)?;
                Some(VersionRecord {
                    version_id: VersionId::Timestamp(ts),
                    is_current: false,
                    last_modified: entry
                        .last_modified
                        .or_else(|| DateTime::from_timestamp(ts as i64, 0))
                        .unwrap_or_else(Utc::now),
                    size: entry.size,
                    content_type: entry.content_type,
                })
            })
            .collect();

        if let Some(props) = self.head_object(ObjectKey::Primary(path)).await? {
            records.push(VersionRecord {
                version_id: VersionId::Current,
                is_current: true,
                last_modified: props.last_modified.unwrap_or_else(Utc::now),
                size: props.size,
                content_type: props
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            });
        }

        sort_versions(&mut records);
        Ok(records)
    }

    /// Content of one version of `path`.
    pub async fn get_version(&self, path: &BlobPath, version_id: VersionId) -> Result<Bytes> {
        Ok(self.fetch_version(path, version_id).await?.0)
    }

    /// Delete one historical version.  The live object can only be
    /// removed with [`FileSystem::delete`].
    pub async fn delete_version(&self, path: &BlobPath, version_id: VersionId) -> Result<()> {
        let VersionId::Timestamp(ts) = version_id else {
            return Err(BlobError::CannotDeleteCurrentVersion {
                path: path.to_string(),
            });
        };

        if !self.delete_object(ObjectKey::Version(path, ts)).await? {
            return Err(BlobError::VersionNotFound {
                path: path.to_string(),
                version_id: version_id.to_string(),
            });
        }
        info!("Deleted version {} of {}", version_id, path);
        Ok(())
    }

    /// Make `version_id` the live content of `path` again.
    ///
    /// The content is written forward as a new live version, so the
    /// pre-restore content gains its own history entry.
    pub async fn restore_version(&self, path: &BlobPath, version_id: VersionId) -> Result<()> {
        let (content, content_type) = self.fetch_version(path, version_id).await?;
        self.write_with_content_type(path, content, &content_type)
            .await?;
        info!("Restored version {} of {}", version_id, path);
        Ok(())
    }

    /// Alias of [`FileSystem::restore_version`].
    pub async fn promote_version(&self, path: &BlobPath, version_id: VersionId) -> Result<()> {
        self.restore_version(path, version_id).await
    }

    /// Delete every historical version of `path`, returning how many were
    /// removed.  The live object is left alone.
    pub async fn purge_versions(&self, path: &BlobPath) -> Result<usize> {
        let versions: Vec<u64> = self
            .list_objects(&version_prefix(path))
            .await?
            .iter()
            .filter_map(|entry| parse_version_name(path, &entry.name))
            .collect();

        let mut removed = 0;
        for ts in versions {
            if self.delete_object(ObjectKey::Version(path, ts)).await? {
                removed += 1;
            }
        }
        info!("Purged {} versions of {}", removed, path);
        Ok(removed)
    }

    async fn fetch_version(&self, path: &BlobPath, version_id: VersionId) -> Result<(Bytes, String)> {
        let key = match version_id {
            VersionId::Current => ObjectKey::Primary(path),
            VersionId::Timestamp(ts) => ObjectKey::Version(path, ts),
        };

        match self.get_object(key).await? {
            Some((content, props)) => Ok((
                content,
                props
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            )),
            None if version_id.is_current() => Err(BlobError::BlobNotFound {
                path: path.to_string(),
            }),
            None => Err(BlobError::VersionNotFound {
                path: path.to_string(),
                version_id: version_id.to_string(),
            }),
        }
    }

    /// Shadow the live object at `path` before it is overwritten.
    ///
    /// Never fails: any error is logged and counted and the caller's
    /// write proceeds.
    pub(crate) async fn preserve_current(&self, path: &BlobPath) {
        match self.head_object(ObjectKey::Primary(path)).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                warn!("Existence probe for {} failed, writing without a version: {}", path, e);
                return;
            }
        }

        let result = match self.next_version_id(path).await {
            Ok(ts) => self
                .copy_object(ObjectKey::Primary(path), ObjectKey::Version(path, ts))
                .await
                .map(|()| ts),
            Err(e) => Err(e),
        };

        match result {
            Ok(ts) => {
                metrics::record_version_copy(true);
                debug!("Shadowed {} as version {}", path, ts);
            }
            Err(e) => {
                metrics::record_version_copy(false);
                warn!("Failed to create version of {} before overwrite: {}", path, e);
            }
        }
    }

    /// Mint a version id for `path`: the current Unix second, or one past
    /// the newest existing version when that is not already in the past.
    async fn next_version_id(&self, path: &BlobPath) -> Result<u64> {
        let now = Utc::now().timestamp().max(0) as u64;
        let newest = self
            .list_objects(&version_prefix(path))
            .await?
            .iter()
            .filter_map(|entry| parse_version_name(path, &entry.name))
            .max();
        Ok(match newest {
            Some(n) if n >= now => n + 1,
            _ => now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version_id: VersionId) -> VersionRecord {
        VersionRecord {
            version_id,
            is_current: version_id.is_current(),
            last_modified: Utc::now(),
            size: 0,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    #[test]
    fn test_sort_puts_current_first_then_descending() {
        let mut records = vec![
            record(VersionId::Timestamp(100)),
            record(VersionId::Timestamp(300)),
            record(VersionId::Current),
            record(VersionId::Timestamp(200)),
        ];
        sort_versions(&mut records);
        let ids: Vec<String> = records.iter().map(|r| r.version_id.to_string()).collect();
        assert_eq!(ids, vec!["current", "300", "200", "100"]);
    }

    #[test]
    fn test_record_serializes_version_id_as_string() {
        let json = serde_json::to_value(record(VersionId::Timestamp(1_700_000_000))).unwrap();
        assert_eq!(json["version_id"], "1700000000");
        assert_eq!(json["is_current"], false);

        let json = serde_json::to_value(record(VersionId::Current)).unwrap();
        assert_eq!(json["version_id"], "current");
    }
}
