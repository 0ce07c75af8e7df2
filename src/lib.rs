//! # docflow
//!
//! Content-addressed PDF ingestion for a page-level document-processing
//! pipeline.
//!
//! A new object in the ingestion bucket starts one run of the
//! [`Ingestor`]. The run fingerprints the file, skips content it has seen
//! before, records the document in the ledger, repairs and paginates the
//! PDF, uploads one artifact per page and hands the document to the
//! downstream workflow.
//!
//! ## Pipeline Overview
//!
//! ```text
//! object finalized
//!  │
//!  ├─ 1. Download  stream the object into a private temp dir
//!  ├─ 2. Hash      SHA-256 fingerprint → dedup lookup in the ledger
//!  ├─ 3. Record    ledger record in VALIDATING
//!  ├─ 4. Paginate  repair, count and split via pdfium (spawn_blocking)
//!  ├─ 5. Upload    {documentId}/{page:05}.pdf, 10 in flight, 4 attempts each
//!  └─ 6. Handoff   start the workflow with {documentId, pageCount}
//! ```
//!
//! The downstream single-artifact stages (page translation, aggregation,
//! cleanup, section splitting) live in [`stages`]. They share
//! [`artifact::write_if_absent`], so replaying a step never rewrites stored
//! output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docflow::handoff::WorkflowsClient;
//! use docflow::ledger::FirestoreLedger;
//! use docflow::pipeline::paginate::PdfiumPaginator;
//! use docflow::storage::GcsObjectStore;
//! use docflow::{IngestConfig, Ingestor, StorageEvent, TokenSource};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::from_env()?;
//!     let http = reqwest::Client::new();
//!     let tokens = Arc::new(TokenSource::from_env(http.clone()));
//!
//!     let ingestor = Ingestor::new(
//!         Arc::new(GcsObjectStore::new(http.clone(), tokens.clone())),
//!         Arc::new(FirestoreLedger::new(
//!             http.clone(),
//!             tokens.clone(),
//!             &config.project_id,
//!             &config.collection,
//!         )),
//!         Arc::new(PdfiumPaginator::new(config.pdfium_lib_path.clone())),
//!         Arc::new(WorkflowsClient::new(http, tokens, config.workflow_parent())),
//!         config,
//!     );
//!
//!     let event = StorageEvent {
//!         bucket: "incoming".into(),
//!         name: "report.pdf".into(),
//!     };
//!     let outcome = ingestor.process(&event, &CancellationToken::new()).await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docflow` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod auth;
pub mod config;
pub mod error;
pub mod handoff;
pub mod hash;
pub mod ingest;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stages;
pub mod storage;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{write_if_absent, WriteOutcome};
pub use auth::TokenSource;
pub use config::{IngestConfig, IngestConfigBuilder, StageConfig, UploadPolicy};
pub use error::{
    HandoffError, IngestError, LedgerError, PdfError, StageError, StorageError, UploadError,
};
pub use handoff::{ExecutionRef, WorkflowLauncher};
pub use hash::{fingerprint_file, fingerprint_reader};
pub use ingest::{IngestOutcome, Ingestor};
pub use ledger::DocumentLedger;
pub use models::{DocumentRecord, DocumentStatus, FieldUpdate, NewDocument, StorageEvent};
pub use progress::{NoopProgress, UploadProgress, UploadProgressCallback};
pub use storage::{ObjectStore, Precondition};
