//! Ingestion controller: the state machine that turns one uploaded object
//! into a ledger record, a set of page artifacts and a workflow execution.
//!
//! ```text
//! START ─ download ─ hash ─┬─ DUPLICATE (clean exit)
//!                          └─ NEW ─ record (VALIDATING)
//!                                    ├─ normalize ─ page count ─ split
//!                                    ├─ record (SPLITTING, pageCount)
//!                                    ├─ upload pages
//!                                    └─ hand off ─ HANDED_OFF
//!
//! any failure after the record exists ──► record (FAILED, errorDetails)
//! ```
//!
//! Failures before the record exists (download, hash, dedup query, record
//! creation) are returned without bookkeeping. Every later failure first
//! marks the record `FAILED` with the error text, best-effort, then returns
//! the original error.
//!
//! All collaborators are built by the caller and passed in. The working
//! directory is a [`tempfile::TempDir`] owned by the run, so it is removed
//! on every exit path.

use crate::config::IngestConfig;
use crate::error::{IngestError, PdfError};
use crate::handoff::{encode_payload, ExecutionRef, WorkflowLauncher};
use crate::hash::fingerprint_file;
use crate::ledger::DocumentLedger;
use crate::models::{
    page_object_key, DocumentStatus, FieldUpdate, NewDocument, StorageEvent, WorkflowPayload,
};
use crate::pipeline::paginate::PdfPaginator;
use crate::progress::{NoopProgress, UploadProgress};
use crate::storage::ObjectStore;
use crate::upload::{upload_all, UploadJob};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The content was ingested before; nothing was done.
    Duplicate { existing_id: String },
    /// Pages are uploaded and the downstream workflow was started.
    HandedOff {
        document_id: String,
        page_count: u32,
        execution: ExecutionRef,
    },
}

/// Drives one ingestion run per [`StorageEvent`].
pub struct Ingestor {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn DocumentLedger>,
    paginator: Arc<dyn PdfPaginator>,
    launcher: Arc<dyn WorkflowLauncher>,
    config: IngestConfig,
    progress: UploadProgress,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn DocumentLedger>,
        paginator: Arc<dyn PdfPaginator>,
        launcher: Arc<dyn WorkflowLauncher>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            paginator,
            launcher,
            config,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Report upload progress to `progress`.
    pub fn with_progress(mut self, progress: UploadProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run the whole ingestion for `event`.
    ///
    /// `cancel` stops the page upload early; the record is then marked
    /// `FAILED` like any other upload failure.
    pub async fn process(
        &self,
        event: &StorageEvent,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, IngestError> {
        let span = info_span!(
            "ingest",
            bucket = %event.bucket,
            object = %event.name,
            file_hash = field::Empty,
            document_id = field::Empty,
        );
        self.run(event, cancel).instrument(span).await
    }

    async fn run(
        &self,
        event: &StorageEvent,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, IngestError> {
        info!("Processing new file");

        let workdir = tempfile::Builder::new()
            .prefix("docflow-ingest-")
            .tempdir()
            .map_err(IngestError::WorkDir)?;
        let source = workdir.path().join("source.pdf");

        let bytes = self
            .store
            .download_to(&event.bucket, &event.name, &source)
            .await
            .map_err(|source| IngestError::Download {
                bucket: event.bucket.clone(),
                object: event.name.clone(),
                source,
            })?;
        debug!(bytes, "Downloaded source object");

        let file_hash = fingerprint_file(&source).await.map_err(IngestError::Hash)?;
        Span::current().record("file_hash", file_hash.as_str());

        if let Some(existing) = self
            .ledger
            .find_by_hash(&file_hash)
            .await
            .map_err(IngestError::DuplicateQuery)?
        {
            info!(existing_id = %existing.id, "Duplicate file detected, skipping");
            return Ok(IngestOutcome::Duplicate {
                existing_id: existing.id,
            });
        }

        let document_id = self
            .ledger
            .create(&NewDocument::validating(&file_hash, &event.name))
            .await
            .map_err(IngestError::CreateRecord)?;
        Span::current().record("document_id", document_id.as_str());
        info!("Created ledger record with status {}", DocumentStatus::Validating);

        match self
            .split_and_hand_off(&document_id, workdir.path(), &source, cancel)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_failed(&document_id, &e).await;
                Err(e)
            }
        }
    }

    /// Everything after the record exists. Any error returned here ends up
    /// in the record's `errorDetails`.
    async fn split_and_hand_off(
        &self,
        document_id: &str,
        workdir: &Path,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, IngestError> {
        // ── Normalize and paginate ───────────────────────────────────────
        let normalized = workdir.join("normalized.pdf");
        self.paginator
            .normalize(source, &normalized)
            .await
            .map_err(IngestError::Normalize)?;

        let page_count = self
            .paginator
            .page_count(&normalized)
            .await
            .map_err(IngestError::PageCount)?;
        if page_count == 0 {
            return Err(IngestError::PageCount(PdfError::Empty));
        }
        info!(page_count, "PDF normalized");

        let pages_dir = workdir.join("pages");
        tokio::fs::create_dir_all(&pages_dir)
            .await
            .map_err(|e| {
                IngestError::Split(PdfError::Write {
                    path: pages_dir.clone(),
                    detail: e.to_string(),
                })
            })?;
        let files = self
            .paginator
            .split(&normalized, &pages_dir)
            .await
            .map_err(IngestError::Split)?;
        if files.len() != page_count as usize {
            return Err(IngestError::Split(PdfError::Page {
                page: files.len() + 1,
                detail: format!(
                    "split produced {} files for {} pages",
                    files.len(),
                    page_count
                ),
            }));
        }

        // ── Record progress ──────────────────────────────────────────────
        self.ledger
            .update(
                document_id,
                &[
                    FieldUpdate::Status(DocumentStatus::Splitting),
                    FieldUpdate::PageCount(page_count),
                ],
            )
            .await
            .map_err(IngestError::MarkSplitting)?;
        info!(page_count, "Status updated to {}", DocumentStatus::Splitting);

        // ── Upload pages ─────────────────────────────────────────────────
        let jobs: Vec<UploadJob> = files
            .into_iter()
            .zip(1u32..)
            .map(|(local_path, page)| UploadJob {
                page,
                local_path,
                key: page_object_key(document_id, page),
            })
            .collect();
        upload_all(
            self.store.as_ref(),
            &self.config.split_pages_bucket,
            jobs,
            &self.config.upload,
            cancel,
            self.progress.as_ref(),
        )
        .await
        .map_err(IngestError::Upload)?;

        // ── Hand off ─────────────────────────────────────────────────────
        let argument = encode_payload(&WorkflowPayload {
            document_id: document_id.to_string(),
            page_count,
        })
        .map_err(IngestError::Payload)?;
        let execution = self
            .launcher
            .launch(&argument)
            .await
            .map_err(IngestError::Handoff)?;
        info!(execution = %execution.name, "Triggered workflow execution");

        if let Err(e) = self
            .ledger
            .update(
                document_id,
                &[FieldUpdate::WorkflowExecutionId(execution.id().to_string())],
            )
            .await
        {
            warn!(error = %e, "Could not record workflow execution id");
        }

        Ok(IngestOutcome::HandedOff {
            document_id: document_id.to_string(),
            page_count,
            execution,
        })
    }

    async fn mark_failed(&self, document_id: &str, cause: &IngestError) {
        let details = cause.to_string();
        error!(error = %details, "Ingestion failed");
        if let Err(e) = self
            .ledger
            .update(
                document_id,
                &[
                    FieldUpdate::Status(DocumentStatus::Failed),
                    FieldUpdate::ErrorDetails(details),
                ],
            )
            .await
        {
            error!(error = %e, "CRITICAL: failed to mark document as FAILED");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HandoffError, PdfError};
    use crate::handoff::LoggingLauncher;
    use crate::ledger::MemoryLedger;
    use crate::storage::LocalObjectStore;
    use async_trait::async_trait;
    use std::path::PathBuf;

    /// Paginator that copies the source through and writes `pages` stub files.
    struct StubPaginator {
        pages: u32,
    }

    #[async_trait]
    impl PdfPaginator for StubPaginator {
        async fn normalize(&self, source: &Path, dest: &Path) -> Result<(), PdfError> {
            tokio::fs::copy(source, dest)
                .await
                .map(|_| ())
                .map_err(|e| PdfError::Write {
                    path: dest.to_path_buf(),
                    detail: e.to_string(),
                })
        }

        async fn page_count(&self, _: &Path) -> Result<u32, PdfError> {
            Ok(self.pages)
        }

        async fn split(&self, _: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PdfError> {
            let mut files = Vec::new();
            for page in 1..=self.pages {
                let path = out_dir.join(format!("p{page}.pdf"));
                tokio::fs::write(&path, format!("page {page}")).await.unwrap();
                files.push(path);
            }
            Ok(files)
        }
    }

    struct FailingLauncher;

    #[async_trait]
    impl WorkflowLauncher for FailingLauncher {
        async fn launch(&self, _: &str) -> Result<ExecutionRef, HandoffError> {
            Err(HandoffError::Status {
                status: 403,
                body: "permission denied".into(),
            })
        }
    }

    fn setup(
        pages: u32,
        launcher: Arc<dyn WorkflowLauncher>,
    ) -> (tempfile::TempDir, Arc<MemoryLedger>, Ingestor) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads").join("a.pdf"), b"%PDF-1.7 stub").unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let config = IngestConfig::builder()
            .project_id("p")
            .split_pages_bucket("pages")
            .build()
            .unwrap();
        let ingestor = Ingestor::new(
            Arc::new(store),
            ledger.clone(),
            Arc::new(StubPaginator { pages }),
            launcher,
            config,
        );
        (dir, ledger, ingestor)
    }

    fn event() -> StorageEvent {
        StorageEvent {
            bucket: "uploads".into(),
            name: "a.pdf".into(),
        }
    }

    #[tokio::test]
    async fn zero_pages_marks_record_failed() {
        let (_dir, ledger, ingestor) = setup(0, Arc::new(LoggingLauncher));
        let err = ingestor
            .process(&event(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::PageCount(PdfError::Empty)));

        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DocumentStatus::Failed);
        assert_eq!(
            records[0].error_details.as_deref(),
            Some("failed to get page count: document has no pages")
        );
    }

    #[tokio::test]
    async fn handoff_failure_marks_record_failed() {
        let (dir, ledger, ingestor) = setup(2, Arc::new(FailingLauncher));
        let err = ingestor
            .process(&event(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Handoff(_)));

        let rec = &ledger.records().await[0];
        assert_eq!(rec.status, DocumentStatus::Failed);
        assert_eq!(rec.page_count, Some(2));
        assert!(rec
            .error_details
            .as_deref()
            .unwrap()
            .starts_with("failed to trigger workflow execution"));
        // Pages stay in place; there is no rollback.
        assert!(dir.path().join("pages").join(&rec.id).join("00002.pdf").exists());
    }

    #[tokio::test]
    async fn missing_object_creates_no_record() {
        let (_dir, ledger, ingestor) = setup(1, Arc::new(LoggingLauncher));
        let missing = StorageEvent {
            bucket: "uploads".into(),
            name: "nope.pdf".into(),
        };
        let err = ingestor
            .process(&missing, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Download { .. }));
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn execution_id_is_recorded() {
        let (_dir, ledger, ingestor) = setup(1, Arc::new(LoggingLauncher));
        let outcome = ingestor
            .process(&event(), &CancellationToken::new())
            .await
            .unwrap();
        let (document_id, execution) = match outcome {
            IngestOutcome::HandedOff {
                document_id,
                execution,
                ..
            } => (document_id, execution),
            other => panic!("expected handoff, got {other:?}"),
        };
        let rec = ledger.get(&document_id).await.unwrap();
        assert_eq!(rec.status, DocumentStatus::Splitting);
        assert_eq!(rec.workflow_execution_id.as_deref(), Some(execution.id()));
    }
}
