//! Error types for the docflow library.
//!
//! The ingestion stage distinguishes failures by *where* they happen, because
//! that decides what bookkeeping follows:
//!
//! * [`IngestError`] — **Fatal** for one ingestion run. Returned from
//!   [`crate::ingest::Ingestor::process`]. Its `Display` text is exactly what
//!   gets persisted as `errorDetails` when the ledger record is marked
//!   `FAILED`, so every variant names the step that failed.
//!
//! * [`StorageError`], [`LedgerError`], [`HandoffError`] — failures of one
//!   call to an external collaborator. The controller wraps them into an
//!   [`IngestError`] variant that carries the step context.
//!
//! * [`UploadError`] — the aggregate result of the bounded upload engine:
//!   either one page exhausted its retries or the run was cancelled.
//!
//! * [`StageError`] — failures of the downstream single-artifact stages
//!   (translate, aggregate, clean, sections).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by one ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Before a ledger record exists ─────────────────────────────────────
    /// The working directory could not be created.
    #[error("failed to create working directory: {0}")]
    WorkDir(#[source] std::io::Error),

    /// The triggering object could not be streamed to local disk.
    #[error("failed to download gs://{bucket}/{object}: {source}")]
    Download {
        bucket: String,
        object: String,
        #[source]
        source: StorageError,
    },

    /// The downloaded file could not be fingerprinted.
    #[error("failed to calculate file hash: {0}")]
    Hash(#[source] std::io::Error),

    /// The dedup query against the ledger failed.
    #[error("failed to query for duplicates: {0}")]
    DuplicateQuery(#[source] LedgerError),

    /// The initial ledger record could not be created.
    #[error("failed to create master document: {0}")]
    CreateRecord(#[source] LedgerError),

    // ── After a ledger record exists (recorded as FAILED) ────────────────
    /// The source PDF could not be repaired/validated or rewritten.
    #[error("failed to validate/optimize PDF: {0}")]
    Normalize(#[source] PdfError),

    /// The normalised PDF's page count could not be determined.
    #[error("failed to get page count: {0}")]
    PageCount(#[source] PdfError),

    /// The normalised PDF could not be split into single pages.
    #[error("failed to split PDF: {0}")]
    Split(#[source] PdfError),

    /// The record could not be moved to `SPLITTING`.
    #[error("failed to update status to SPLITTING: {0}")]
    MarkSplitting(#[source] LedgerError),

    /// At least one page failed to upload.
    #[error("one or more pages failed to upload: {0}")]
    Upload(#[source] UploadError),

    /// The workflow payload could not be serialised.
    #[error("failed to marshal workflow payload: {0}")]
    Payload(#[source] serde_json::Error),

    /// The next stage could not be started.
    #[error("failed to trigger workflow execution: {0}")]
    Handoff(#[source] HandoffError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation or environment loading failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// PDF normalisation / pagination failures.
#[derive(Debug, Error)]
pub enum PdfError {
    /// Could not bind to a pdfium library.
    #[error(
        "failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    Binding(String),

    /// pdfium could not open the file even in its tolerant loading mode.
    #[error("PDF '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// The document opened but contains no pages.
    #[error("document has no pages")]
    Empty,

    /// pdfium failed while copying or writing a page.
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },

    /// Writing a normalised or split file failed.
    #[error("failed to write '{path}': {detail}")]
    Write { path: PathBuf, detail: String },

    /// The blocking pdfium task panicked or was cancelled.
    #[error("pdfium task failed: {0}")]
    Task(String),
}

/// Failures of a single object-storage call.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A "create if absent" write found an existing object.
    #[error("object gs://{bucket}/{key} already exists")]
    PreconditionFailed { bucket: String, key: String },

    /// The object does not exist.
    #[error("object gs://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    /// The service answered with an unexpected HTTP status.
    #[error("storage request for gs://{bucket}/{key} failed with HTTP {status}: {body}")]
    Status {
        bucket: String,
        key: String,
        status: u16,
        body: String,
    },

    /// Transport failure talking to the storage service.
    #[error("storage transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file-system failure (reading a page file, writing a download).
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bearer token could not be obtained.
    #[error("storage authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// One attempt exceeded its deadline.
    #[error("storage call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response body could not be decoded.
    #[error("invalid storage response: {0}")]
    Decode(String),

    /// The key escapes the bucket or is empty.
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
}

impl StorageError {
    /// `true` for the "object already exists" precondition failure.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StorageError::PreconditionFailed { .. })
    }
}

/// Failures of a single document-ledger call.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("ledger request failed with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("ledger transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ledger authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid ledger response: {0}")]
    Decode(String),

    #[error("ledger snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures starting the downstream workflow.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("workflow executions API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("workflow transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("workflow authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid workflow response: {0}")]
    Decode(String),
}

/// Failures obtaining an access token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("metadata server returned HTTP {0}")]
    Status(u16),

    #[error("metadata server unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

/// Aggregate failure of the bounded upload engine.
///
/// Only the first failure is kept; failures of sibling pages that happen
/// afterwards are logged and dropped.
#[derive(Debug, Error)]
pub enum UploadError {
    /// A page failed on every attempt. `source` is the last attempt's error.
    #[error("upload for {key} failed after {attempts} attempts: {source}")]
    Exhausted {
        key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// The run was cancelled before this page finished.
    #[error("upload for {key} cancelled")]
    Cancelled { key: String },
}

impl UploadError {
    /// Remote key of the page this error belongs to.
    pub fn key(&self) -> &str {
        match self {
            UploadError::Exhausted { key, .. } | UploadError::Cancelled { key } => key,
        }
    }
}

/// Failures of a downstream single-artifact stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to render page {page}: {source}")]
    Render {
        page: u32,
        #[source]
        source: PdfError,
    },

    #[error("model call failed after {retries} retries: {detail}")]
    Model { retries: u32, detail: String },

    /// The model answered but the answer is unusable.
    #[error("{0}")]
    InvalidResponse(String),

    #[error("no markdown files found for document ID {0}")]
    NothingToAggregate(String),

    #[error("invalid GCS URI '{0}'")]
    InvalidUri(String),

    #[error("local I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StageError {
    pub(crate) fn storage(context: impl Into<String>, source: StorageError) -> Self {
        StageError::Storage {
            context: context.into(),
            source,
        }
    }
}
