//! In-process ledger, optionally persisted as a JSON snapshot.
//!
//! Without a snapshot path this is a plain map, which is what the tests use.
//! With one, every mutation rewrites the snapshot (write to a temp file, then
//! rename), so the CLI's local mode keeps deduplicating across runs.

use super::DocumentLedger;
use crate::error::LedgerError;
use crate::models::{DocumentRecord, FieldUpdate, NewDocument};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<BTreeMap<String, DocumentRecord>>,
    snapshot: Option<PathBuf>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists and keep it updated on every write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => decode_snapshot(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Ledger snapshot {} holds {} records", path.display(), records.len());
        Ok(Self {
            records: Mutex::new(records),
            snapshot: Some(path),
        })
    }

    /// Every record, ordered by id.
    pub async fn records(&self) -> Vec<DocumentRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    async fn persist(&self, records: &BTreeMap<String, DocumentRecord>) -> Result<(), LedgerError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        write_snapshot(path, records).await
    }
}

fn decode_snapshot(bytes: &[u8]) -> Result<BTreeMap<String, DocumentRecord>, LedgerError> {
    let mut records: BTreeMap<String, DocumentRecord> =
        serde_json::from_slice(bytes).map_err(|e| LedgerError::Decode(e.to_string()))?;
    // `id` is not a stored field; restore it from the map key.
    for (id, record) in records.iter_mut() {
        record.id = id.clone();
    }
    Ok(records)
}

async fn write_snapshot(
    path: &Path,
    records: &BTreeMap<String, DocumentRecord>,
) -> Result<(), LedgerError> {
    let json =
        serde_json::to_vec_pretty(records).map_err(|e| LedgerError::Decode(e.to_string()))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl DocumentLedger for MemoryLedger {
    async fn create(&self, doc: &NewDocument) -> Result<String, LedgerError> {
        let id = Uuid::new_v4().simple().to_string();
        let mut records = self.records.lock().await;
        records.insert(id.clone(), DocumentRecord::from_new(&id, doc));
        self.persist(&records).await?;
        Ok(id)
    }

    async fn find_by_hash(&self, file_hash: &str) -> Result<Option<DocumentRecord>, LedgerError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.file_hash == file_hash)
            .min_by_key(|r| r.created_at)
            .cloned())
    }

    async fn update(&self, id: &str, updates: &[FieldUpdate]) -> Result<(), LedgerError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        for update in updates {
            if let FieldUpdate::Status(next) = update {
                if record.status.is_terminal() {
                    warn!(
                        document_id = id,
                        "Status update on terminal record: {} → {}", record.status, next
                    );
                } else if *next != record.status && !record.status.can_transition_to(*next) {
                    warn!(
                        document_id = id,
                        "Status moving backwards: {} → {}", record.status, next
                    );
                }
            }
        }
        record.apply(updates);
        self.persist(&records).await
    }

    async fn get(&self, id: &str) -> Result<DocumentRecord, LedgerError> {
        self.records
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }
}
