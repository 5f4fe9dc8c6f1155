//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use blobfs::auth::SharedKeySigner;
use blobfs::config::Credentials;
use blobfs::transport::memory::MemoryTransport;
use blobfs::{BlobPath, FileSystem};

pub const CONTAINER: &str = "documents";

/// A file system over an emulator that verifies every request's
/// signature, with the container already created.
pub async fn setup() -> (FileSystem, Arc<MemoryTransport>) {
    setup_with(|t| t).await
}

/// Like [`setup`] but lets the caller tweak the emulator first.
pub async fn setup_with(
    configure: impl FnOnce(MemoryTransport) -> MemoryTransport,
) -> (FileSystem, Arc<MemoryTransport>) {
    let credentials = Credentials::development_storage();
    let signer = SharedKeySigner::from_credentials(&credentials).unwrap();
    let transport = Arc::new(configure(
        MemoryTransport::new(&credentials.blob_endpoint).with_signer(signer),
    ));
    let fs = FileSystem::new(credentials, CONTAINER, transport.clone()).unwrap();
    assert!(fs.create_container().await.unwrap());
    (fs, transport)
}

pub fn path(s: &str) -> BlobPath {
    BlobPath::parse(s).unwrap()
}
