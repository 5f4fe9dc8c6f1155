//! Blob transports.
//!
//! The [`backend::BlobTransport`] trait abstracts over how a signed
//! request reaches the service.  [`azure::AzureTransport`] talks to Azure
//! Blob Storage (or Azurite) over HTTPS; [`memory::MemoryTransport`]
//! emulates the same REST surface in process.

pub mod azure;
pub mod backend;
pub mod memory;
