//! Data model shared by the ingestion stage and the downstream stages.
//!
//! Field names follow the wire/ledger representation (camelCase) so records
//! and payloads serialise exactly as the workflow and the document database
//! expect them. Optional fields are omitted entirely when unset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Ledger record ────────────────────────────────────────────────────────

/// Lifecycle status of one ingestion job.
///
/// The ingestion stage writes `Validating`, `Splitting` and `Failed`. The
/// remaining states belong to the downstream stages and only appear here so
/// that [`DocumentStatus::can_transition_to`] covers the whole lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Validating,
    Splitting,
    SplittingComplete,
    Translating,
    Aggregating,
    Cleaning,
    Sectioning,
    Complete,
    Failed,
}

impl DocumentStatus {
    /// Wire name, e.g. `"SPLITTING_COMPLETE"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Validating => "VALIDATING",
            DocumentStatus::Splitting => "SPLITTING",
            DocumentStatus::SplittingComplete => "SPLITTING_COMPLETE",
            DocumentStatus::Translating => "TRANSLATING",
            DocumentStatus::Aggregating => "AGGREGATING",
            DocumentStatus::Cleaning => "CLEANING",
            DocumentStatus::Sectioning => "SECTIONING",
            DocumentStatus::Complete => "COMPLETE",
            DocumentStatus::Failed => "FAILED",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DocumentStatus::Validating => 0,
            DocumentStatus::Splitting => 1,
            DocumentStatus::SplittingComplete => 2,
            DocumentStatus::Translating => 3,
            DocumentStatus::Aggregating => 4,
            DocumentStatus::Cleaning => 5,
            DocumentStatus::Sectioning => 6,
            DocumentStatus::Complete => 7,
            DocumentStatus::Failed => u8::MAX,
        }
    }

    /// `true` for states no stage moves out of.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Complete | DocumentStatus::Failed)
    }

    /// Status only moves forward, except into `Failed`, which is terminal.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        if *self == DocumentStatus::Failed {
            return false;
        }
        if next == DocumentStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields written when an ingestion job is first recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub file_hash: String,
    pub original_filename: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl NewDocument {
    /// A fresh record in `VALIDATING`, stamped now.
    pub fn validating(file_hash: impl Into<String>, original_filename: impl Into<String>) -> Self {
        Self {
            file_hash: file_hash.into(),
            original_filename: original_filename.into(),
            status: DocumentStatus::Validating,
            created_at: Utc::now(),
        }
    }
}

/// One ledger record as stored in the document database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    /// Database-assigned identifier. Not part of the stored fields.
    #[serde(skip)]
    pub id: String,
    pub file_hash: String,
    pub original_filename: String,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn from_new(id: impl Into<String>, doc: &NewDocument) -> Self {
        Self {
            id: id.into(),
            file_hash: doc.file_hash.clone(),
            original_filename: doc.original_filename.clone(),
            status: doc.status,
            page_count: None,
            error_details: None,
            workflow_execution_id: None,
            created_at: doc.created_at,
        }
    }

    /// Apply field updates in order (last write wins).
    pub fn apply(&mut self, updates: &[FieldUpdate]) {
        for update in updates {
            match update {
                FieldUpdate::Status(s) => self.status = *s,
                FieldUpdate::PageCount(n) => self.page_count = Some(*n),
                FieldUpdate::ErrorDetails(e) => self.error_details = Some(e.clone()),
                FieldUpdate::WorkflowExecutionId(id) => {
                    self.workflow_execution_id = Some(id.clone())
                }
            }
        }
    }
}

/// A single `field → value` assignment for [`crate::ledger::DocumentLedger::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Status(DocumentStatus),
    PageCount(u32),
    ErrorDetails(String),
    WorkflowExecutionId(String),
}

impl FieldUpdate {
    /// Ledger field path this update writes.
    pub fn field(&self) -> &'static str {
        match self {
            FieldUpdate::Status(_) => "status",
            FieldUpdate::PageCount(_) => "pageCount",
            FieldUpdate::ErrorDetails(_) => "errorDetails",
            FieldUpdate::WorkflowExecutionId(_) => "workflowExecutionId",
        }
    }
}

// ── Trigger and handoff ──────────────────────────────────────────────────

/// Object-finalised event that starts an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub bucket: String,
    pub name: String,
}

/// Argument passed to the next workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPayload {
    pub document_id: String,
    pub page_count: u32,
}

/// Remote key of page `page_number` (1-based): `{documentId}/{page:05}.pdf`.
pub fn page_object_key(document_id: &str, page_number: u32) -> String {
    format!("{document_id}/{page_number:05}.pdf")
}

/// `gs://{bucket}/{key}`.
pub fn gs_uri(bucket: &str, key: &str) -> String {
    format!("gs://{bucket}/{key}")
}

/// Split `gs://bucket/key` into `(bucket, key)`.
pub fn parse_gs_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("gs://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

// ── Downstream stage payloads ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTranslatorRequest {
    pub document_id: String,
    pub page_number: u32,
    pub gcs_uri: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTranslatorResponse {
    pub status: String,
    pub output_gcs_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownAggregatorRequest {
    pub document_id: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownAggregatorResponse {
    pub status: String,
    pub master_gcs_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownCleanerRequest {
    pub document_id: String,
    pub master_gcs_uri: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownCleanerResponse {
    pub status: String,
    pub cleaned_gcs_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSplitterRequest {
    pub document_id: String,
    pub cleaned_gcs_uri: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSplitterResponse {
    pub status: String,
    pub section_count: usize,
}
