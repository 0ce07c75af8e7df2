//! Object storage.
//!
//! Everything the pipeline persists outside the ledger goes through the
//! [`ObjectStore`] trait: the triggering upload is downloaded through it,
//! page artifacts are uploaded through it, and the downstream stages read and
//! write their markdown through it.
//!
//! Two implementations ship with the crate:
//!
//! * [`GcsObjectStore`] — Cloud Storage JSON API over `reqwest`.
//! * [`LocalObjectStore`] — a directory per bucket on the local file system,
//!   used by the CLI's local mode and by the integration tests.

pub mod gcs;
pub mod local;

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;

use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;

/// Write precondition for [`ObjectStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precondition {
    /// Overwrite whatever is there.
    #[default]
    None,
    /// Only create the object if nothing exists under the key yet.
    /// A violation is reported as [`StorageError::PreconditionFailed`].
    DoesNotExist,
}

/// Minimal object-store surface used by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `bucket/key` into the local file `dest`. Returns bytes written.
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Write `data` to `bucket/key` and finalise the object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<(), StorageError>;

    /// Read a whole object into memory.
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// `true` if an object exists under `bucket/key`.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Keys in `bucket` starting with `prefix`, sorted lexically.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// MIME type inferred from the key's extension.
pub(crate) fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "md" => "text/markdown; charset=utf-8",
        Some(ext) if ext == "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("d/00001.pdf"), "application/pdf");
        assert_eq!(content_type_for("d/master.MD"), "text/markdown; charset=utf-8");
        assert_eq!(content_type_for("d/blob"), "application/octet-stream");
    }
}
