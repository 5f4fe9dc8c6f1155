//! blobfs library: file-system style access to Azure Blob Storage.
//!
//! This crate provides a [`FileSystem`] bound to one blob container, with
//! Shared Key request signing, typed listings and metadata, and a
//! client-side version history kept in a reserved `.versions/` namespace
//! of the same container.

pub mod auth;
pub mod config;
pub mod errors;
pub mod filesystem;
pub mod metadata;
pub mod metrics;
pub mod path;
pub mod transport;
pub mod versioning;
pub mod xml;

pub use errors::{BlobError, Result};
pub use filesystem::FileSystem;
pub use path::{BlobPath, VersionId};
pub use versioning::VersionRecord;
