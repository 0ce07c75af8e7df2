//! Document ledger: one record per ingested file.
//!
//! The ledger is deliberately non-transactional. `find_by_hash` followed by
//! `create` are two independent calls, so two near-simultaneous ingestions of
//! identical bytes can both miss each other and each create a record. That
//! duplication is accepted rather than prevented with a lock or a uniqueness
//! constraint.
//!
//! Updates are last-write-wins field assignments. Only the controller
//! processing a document writes to its record.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreLedger;
pub use memory::MemoryLedger;

use crate::error::LedgerError;
use crate::models::{DocumentRecord, FieldUpdate, NewDocument};
use async_trait::async_trait;

#[async_trait]
pub trait DocumentLedger: Send + Sync {
    /// Insert a new record and return its database-assigned id.
    async fn create(&self, doc: &NewDocument) -> Result<String, LedgerError>;

    /// At most one record whose `fileHash` equals `file_hash`.
    async fn find_by_hash(&self, file_hash: &str) -> Result<Option<DocumentRecord>, LedgerError>;

    /// Apply `updates` to the record `id`. Fails with
    /// [`LedgerError::NotFound`] if the record does not exist.
    async fn update(&self, id: &str, updates: &[FieldUpdate]) -> Result<(), LedgerError>;

    /// Fetch one record by id.
    async fn get(&self, id: &str) -> Result<DocumentRecord, LedgerError>;
}
