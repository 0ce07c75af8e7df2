//! Idempotent artifact writer shared by every single-artifact stage.
//!
//! A stage may be replayed by the orchestrator after it already wrote its
//! output. [`write_if_absent`] makes that replay harmless: the write carries a
//! "create only if absent" precondition, and finding the object already there
//! counts as success. The stored bytes are never touched a second time.

use crate::error::StorageError;
use crate::storage::{ObjectStore, Precondition};
use tracing::{debug, info};

/// What [`write_if_absent`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The object did not exist and now holds `content`.
    Created,
    /// An object was already stored under the name; it was left untouched.
    AlreadyExists,
}

/// Write `content` to `bucket/name` unless an object already exists there.
///
/// Any failure other than the precondition check is returned as-is.
pub async fn write_if_absent(
    store: &dyn ObjectStore,
    bucket: &str,
    name: &str,
    content: impl Into<Vec<u8>>,
) -> Result<WriteOutcome, StorageError> {
    let content = content.into();
    let len = content.len();
    match store
        .put(bucket, name, content, Precondition::DoesNotExist)
        .await
    {
        Ok(()) => {
            debug!(bucket, object = name, bytes = len, "Artifact written");
            Ok(WriteOutcome::Created)
        }
        Err(e) if e.is_precondition_failed() => {
            info!(
                bucket,
                object = name,
                "Artifact already exists, skipping write"
            );
            Ok(WriteOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}
