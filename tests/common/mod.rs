//! Shared fixtures for the integration tests.
//!
//! Everything runs against a temp directory: a [`LocalObjectStore`] wrapped
//! by [`InstrumentedStore`] for fault injection and concurrency tracking,
//! a [`MemoryLedger`] behind a [`FlakyLedger`], a [`FakePaginator`] that
//! understands a tiny fake PDF format, and a [`RecordingLauncher`].

#![allow(dead_code)]

use async_trait::async_trait;
use docflow::error::{HandoffError, LedgerError, PdfError, StorageError};
use docflow::handoff::{ExecutionRef, WorkflowLauncher};
use docflow::ledger::{DocumentLedger, MemoryLedger};
use docflow::models::{DocumentRecord, FieldUpdate, NewDocument};
use docflow::pipeline::paginate::PdfPaginator;
use docflow::storage::{LocalObjectStore, ObjectStore, Precondition};
use docflow::{IngestConfig, Ingestor, StorageEvent, UploadPolicy};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const UPLOAD_BUCKET: &str = "incoming";
pub const PAGES_BUCKET: &str = "split-pages";

// ── Fake PDFs ────────────────────────────────────────────────────────────

/// A "PDF" the [`FakePaginator`] accepts: a header plus one line per page.
pub fn fake_pdf(pages: u32) -> Vec<u8> {
    let mut out = format!("%PDF-fake pages={pages}\n");
    for page in 1..=pages {
        out.push_str(&format!("page {page} body\n"));
    }
    out.into_bytes()
}

fn parse_fake_pdf(path: &Path) -> Result<Vec<String>, PdfError> {
    let text = std::fs::read_to_string(path).map_err(|e| PdfError::Corrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default();
    let declared: usize = header
        .strip_prefix("%PDF-fake pages=")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| PdfError::Corrupt {
            path: path.to_path_buf(),
            detail: "missing %PDF header".into(),
        })?;
    let pages: Vec<String> = lines.map(str::to_string).collect();
    if pages.len() != declared {
        return Err(PdfError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("declared {declared} pages, found {}", pages.len()),
        });
    }
    Ok(pages)
}

/// Paginator over [`fake_pdf`] files. Remembers the working directory of
/// every run and can be told to fail `split`.
#[derive(Debug, Default)]
pub struct FakePaginator {
    workdirs: Mutex<Vec<PathBuf>>,
    fail_split: AtomicBool,
}

impl FakePaginator {
    pub fn fail_split(&self) {
        self.fail_split.store(true, Ordering::SeqCst);
    }

    /// Directory holding `source.pdf` for each run, in call order.
    pub fn workdirs(&self) -> Vec<PathBuf> {
        self.workdirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl PdfPaginator for FakePaginator {
    async fn normalize(&self, source: &Path, dest: &Path) -> Result<(), PdfError> {
        if let Some(dir) = source.parent() {
            self.workdirs.lock().unwrap().push(dir.to_path_buf());
        }
        parse_fake_pdf(source)?;
        std::fs::copy(source, dest).map_err(|e| PdfError::Write {
            path: dest.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(())
    }

    async fn page_count(&self, path: &Path) -> Result<u32, PdfError> {
        Ok(parse_fake_pdf(path)?.len() as u32)
    }

    async fn split(&self, path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PdfError> {
        if self.fail_split.load(Ordering::SeqCst) {
            return Err(PdfError::Write {
                path: out_dir.to_path_buf(),
                detail: "disk full".into(),
            });
        }
        let pages = parse_fake_pdf(path)?;
        let mut files = Vec::with_capacity(pages.len());
        for (i, body) in pages.iter().enumerate() {
            let dest = out_dir.join(format!("page_{:05}.pdf", i + 1));
            std::fs::write(&dest, format!("%PDF-fake pages=1\n{body}\n")).map_err(|e| {
                PdfError::Write {
                    path: dest.clone(),
                    detail: e.to_string(),
                }
            })?;
            files.push(dest);
        }
        Ok(files)
    }
}

// ── Object store wrapper ─────────────────────────────────────────────────

/// [`LocalObjectStore`] with scripted `put` failures, an artificial delay
/// and a high-water mark of concurrent `put` calls.
pub struct InstrumentedStore {
    inner: LocalObjectStore,
    failures: Mutex<HashMap<String, u32>>,
    put_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    puts: Mutex<Vec<String>>,
}

impl InstrumentedStore {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalObjectStore::new(root),
            failures: Mutex::new(HashMap::new()),
            put_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            puts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = delay;
        self
    }

    /// Fail the next `times` puts of any key ending in `suffix` with
    /// HTTP 503. Document ids are random, so tests match on the page part.
    pub fn fail_matching(&self, suffix: &str, times: u32) {
        self.failures.lock().unwrap().insert(suffix.to_string(), times);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every key passed to `put`, including failed attempts.
    pub fn put_attempts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn attempts_matching(&self, suffix: &str) -> usize {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.ends_with(suffix))
            .count()
    }

    pub fn local(&self) -> &LocalObjectStore {
        &self.inner
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for InstrumentedStore {
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        self.inner.download_to(bucket, key, dest).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<(), StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.puts.lock().unwrap().push(key.to_string());

        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures
                .iter_mut()
                .find(|(suffix, left)| key.ends_with(suffix.as_str()) && **left > 0)
            {
                Some((_, left)) => {
                    *left -= 1;
                    true
                }
                None => false,
            }
        };
        if fail {
            return Err(StorageError::Status {
                bucket: bucket.to_string(),
                key: key.to_string(),
                status: 503,
                body: "injected failure".into(),
            });
        }
        self.inner.put(bucket, key, data, precondition).await
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.read(bucket, key).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(bucket, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }
}

// ── Ledger wrapper ───────────────────────────────────────────────────────

fn injected(op: &str) -> LedgerError {
    LedgerError::Status {
        status: 500,
        body: format!("injected {op} failure"),
    }
}

/// [`MemoryLedger`] with switchable failures and a log of `update` calls.
#[derive(Debug)]
pub struct FlakyLedger {
    inner: Arc<MemoryLedger>,
    fail_find: AtomicBool,
    fail_create: AtomicBool,
    fail_update: AtomicBool,
    updates: Mutex<Vec<Vec<FieldUpdate>>>,
}

impl FlakyLedger {
    pub fn new(inner: Arc<MemoryLedger>) -> Self {
        Self {
            inner,
            fail_find: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_find(&self) {
        self.fail_find.store(true, Ordering::SeqCst);
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_update(&self) {
        self.fail_update.store(true, Ordering::SeqCst);
    }

    /// Every `update` call, including failed ones.
    pub fn updates(&self) -> Vec<Vec<FieldUpdate>> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentLedger for FlakyLedger {
    async fn create(&self, doc: &NewDocument) -> Result<String, LedgerError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(injected("create"));
        }
        self.inner.create(doc).await
    }

    async fn find_by_hash(&self, file_hash: &str) -> Result<Option<DocumentRecord>, LedgerError> {
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(injected("query"));
        }
        self.inner.find_by_hash(file_hash).await
    }

    async fn update(&self, id: &str, updates: &[FieldUpdate]) -> Result<(), LedgerError> {
        self.updates.lock().unwrap().push(updates.to_vec());
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(injected("update"));
        }
        self.inner.update(id, updates).await
    }

    async fn get(&self, id: &str) -> Result<DocumentRecord, LedgerError> {
        self.inner.get(id).await
    }
}

// ── Workflow launcher ────────────────────────────────────────────────────

/// Launcher that records every argument and returns sequential executions.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    arguments: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn arguments(&self) -> Vec<String> {
        self.arguments.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowLauncher for RecordingLauncher {
    async fn launch(&self, argument: &str) -> Result<ExecutionRef, HandoffError> {
        let mut args = self.arguments.lock().unwrap();
        args.push(argument.to_string());
        Ok(ExecutionRef {
            name: format!("projects/p/locations/l/workflows/w/executions/exec-{}", args.len()),
        })
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

/// Upload policy with the production shape but millisecond waits.
pub fn fast_policy() -> UploadPolicy {
    UploadPolicy {
        concurrency: 10,
        attempt_timeout: Duration::from_secs(5),
        max_attempts: 4,
        initial_backoff: Duration::from_millis(5),
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<InstrumentedStore>,
    pub ledger: Arc<MemoryLedger>,
    pub flaky: Arc<FlakyLedger>,
    pub paginator: Arc<FakePaginator>,
    pub launcher: Arc<RecordingLauncher>,
    pub ingestor: Ingestor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|store| store, fast_policy())
    }

    pub fn with(
        configure: impl FnOnce(InstrumentedStore) -> InstrumentedStore,
        policy: UploadPolicy,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(configure(InstrumentedStore::new(dir.path())));
        let ledger = Arc::new(MemoryLedger::new());
        let flaky = Arc::new(FlakyLedger::new(ledger.clone()));
        let paginator = Arc::new(FakePaginator::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let config = IngestConfig::builder()
            .project_id("test-project")
            .split_pages_bucket(PAGES_BUCKET)
            .upload_policy(policy)
            .build()
            .unwrap();
        let ingestor = Ingestor::new(
            store.clone(),
            flaky.clone(),
            paginator.clone(),
            launcher.clone(),
            config,
        );
        Self {
            dir,
            store,
            ledger,
            flaky,
            paginator,
            launcher,
            ingestor,
        }
    }

    /// Place `bytes` in the upload bucket and return the matching event.
    pub fn upload(&self, name: &str, bytes: &[u8]) -> StorageEvent {
        let path = self.dir.path().join(UPLOAD_BUCKET).join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
        StorageEvent {
            bucket: UPLOAD_BUCKET.into(),
            name: name.into(),
        }
    }

    pub fn page_exists(&self, document_id: &str, page: u32) -> bool {
        self.dir
            .path()
            .join(PAGES_BUCKET)
            .join(docflow::models::page_object_key(document_id, page))
            .exists()
    }

    pub async fn page_keys(&self) -> Vec<String> {
        self.store.list(PAGES_BUCKET, "").await.unwrap_or_default()
    }
}
