//! Bounded upload engine for page artifacts.
//!
//! ## Scheduling
//!
//! Jobs are fed through `stream::iter(..).buffer_unordered(concurrency)`, so
//! at most `concurrency` uploads are in flight and whichever slot frees up
//! first claims the next page. Pages finish in any order.
//!
//! ## Retry and cancellation
//!
//! Each page gets `max_attempts` tries. Every attempt reads the local page
//! file, writes it with a per-attempt deadline and finalises the object; a
//! failure anywhere in that sequence counts as a failed attempt. After a
//! failed attempt the page waits `initial_backoff * 2^(attempt-1)`
//! (1 s → 2 s → 4 s → 8 s by default).
//!
//! The engine runs under a child of the caller's [`CancellationToken`]. The
//! first page to exhaust its attempts cancels it. A cancelled token
//! interrupts every backoff wait at once and stops pages that have not
//! started yet, while attempts already in flight are allowed to finish.
//! The engine only returns after every launched page has settled.

use crate::config::UploadPolicy;
use crate::error::{StorageError, UploadError};
use crate::progress::UploadProgressCallback;
use crate::storage::{ObjectStore, Precondition};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One page to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    /// 1-based page number, used for logging and progress events.
    pub page: u32,
    /// Single-page PDF on local disk.
    pub local_path: PathBuf,
    /// Destination key inside the target bucket.
    pub key: String,
}

/// Upload every job to `bucket`, honouring `policy`.
///
/// Returns `Ok(())` only if every page was stored. Otherwise returns the
/// first failure: a page that exhausted its attempts wins over pages that
/// were merely cancelled because of it. Pages that did upload are left in
/// place.
pub async fn upload_all(
    store: &dyn ObjectStore,
    bucket: &str,
    jobs: Vec<UploadJob>,
    policy: &UploadPolicy,
    cancel: &CancellationToken,
    progress: &dyn UploadProgressCallback,
) -> Result<(), UploadError> {
    let total = jobs.len();
    let run = cancel.child_token();
    progress.on_upload_start(total);
    info!(
        pages = total,
        concurrency = policy.concurrency,
        "Starting concurrent upload of pages"
    );

    let mut results = stream::iter(jobs.into_iter().map(|job| {
        let run = run.clone();
        async move {
            let result = upload_one(store, bucket, &job, policy, &run, progress, total).await;
            if result.is_err() {
                run.cancel();
            }
            result
        }
    }))
    .buffer_unordered(policy.concurrency.max(1));

    let mut uploaded = 0usize;
    let mut first: Option<UploadError> = None;
    while let Some(result) = results.next().await {
        match result {
            Ok(()) => uploaded += 1,
            Err(e) => match first {
                None => first = Some(e),
                Some(UploadError::Cancelled { .. }) if matches!(e, UploadError::Exhausted { .. }) => {
                    first = Some(e)
                }
                Some(_) => debug!(error = %e, "Dropping sibling upload error"),
            },
        }
    }

    progress.on_upload_complete(total, uploaded);
    match first {
        None => {
            info!(pages = total, "All pages uploaded successfully");
            Ok(())
        }
        Some(e) => {
            error!(uploaded, pages = total, error = %e, "Page upload failed");
            Err(e)
        }
    }
}

async fn upload_one(
    store: &dyn ObjectStore,
    bucket: &str,
    job: &UploadJob,
    policy: &UploadPolicy,
    cancel: &CancellationToken,
    progress: &dyn UploadProgressCallback,
    total: usize,
) -> Result<(), UploadError> {
    let cancelled = || UploadError::Cancelled {
        key: job.key.clone(),
    };
    let max_attempts = policy.max_attempts.max(1);

    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            debug!(object = %job.key, "Upload cancelled before attempt {}", attempt);
            progress.on_page_failed(job.page, "cancelled");
            return Err(cancelled());
        }

        let err = match attempt_once(store, bucket, job, policy.attempt_timeout).await {
            Ok(()) => {
                debug!(object = %job.key, attempt, "Page uploaded");
                progress.on_page_uploaded(job.page, total);
                return Ok(());
            }
            Err(e) => e,
        };

        let backoff = policy.backoff_after(attempt);
        warn!(
            object = %job.key,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Upload attempt failed"
        );
        progress.on_retry(job.page, attempt, backoff.as_millis() as u64, &err.to_string());

        let interrupted = tokio::select! {
            _ = tokio::time::sleep(backoff) => false,
            _ = cancel.cancelled() => true,
        };

        // The last attempt's error outranks a cancellation during the
        // trailing backoff.
        if attempt >= max_attempts {
            error!(object = %job.key, error = %err, "Upload failed after all retries");
            progress.on_page_failed(job.page, &err.to_string());
            return Err(UploadError::Exhausted {
                key: job.key.clone(),
                attempts: attempt,
                source: err,
            });
        }
        if interrupted {
            warn!(object = %job.key, "Cancelled during backoff, aborting retries");
            progress.on_page_failed(job.page, "cancelled");
            return Err(cancelled());
        }
    }
}

/// Read the page file and write it as a new object, bounded by `timeout`.
async fn attempt_once(
    store: &dyn ObjectStore,
    bucket: &str,
    job: &UploadJob,
    timeout: Duration,
) -> Result<(), StorageError> {
    let work = async {
        let data = tokio::fs::read(&job.local_path)
            .await
            .map_err(|e| StorageError::Io {
                path: job.local_path.clone(),
                source: e,
            })?;
        store.put(bucket, &job.key, data, Precondition::None).await
    };
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Store whose `put` fails a fixed number of times per key.
    #[derive(Default)]
    struct ScriptedStore {
        failures: Mutex<HashMap<String, u32>>,
        stored: Mutex<HashMap<String, Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl ScriptedStore {
        fn failing(key: &str, times: u32) -> Self {
            let store = Self::default();
            store.failures.lock().unwrap().insert(key.to_string(), times);
            store
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn download_to(&self, bucket: &str, key: &str, _: &Path) -> Result<u64, StorageError> {
            Err(StorageError::NotFound {
                bucket: bucket.into(),
                key: key.into(),
            })
        }

        async fn put(
            &self,
            bucket: &str,
            key: &str,
            data: Vec<u8>,
            _: Precondition,
        ) -> Result<(), StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(key) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(StorageError::Status {
                            bucket: bucket.into(),
                            key: key.into(),
                            status: 503,
                            body: "backend unavailable".into(),
                        });
                    }
                }
            }
            self.stored.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }

        async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
            self.stored
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound {
                    bucket: bucket.into(),
                    key: key.into(),
                })
        }

        async fn exists(&self, _: &str, key: &str) -> Result<bool, StorageError> {
            Ok(self.stored.lock().unwrap().contains_key(key))
        }

        async fn list(&self, _: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
            let mut keys: Vec<String> = self
                .stored
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        }
    }

    fn jobs(dir: &Path, n: u32) -> Vec<UploadJob> {
        (1..=n)
            .map(|page| {
                let local_path = dir.join(format!("page_{page}.pdf"));
                std::fs::write(&local_path, format!("%PDF page {page}")).unwrap();
                UploadJob {
                    page,
                    local_path,
                    key: crate::models::page_object_key("doc", page),
                }
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_then_success_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptedStore::failing("doc/00001.pdf", 3);
        let policy = UploadPolicy::default();

        let result = upload_all(
            &store,
            "pages",
            jobs(dir.path(), 1),
            &policy,
            &CancellationToken::new(),
            &NoopProgress,
        )
        .await;

        assert!(result.is_ok(), "got: {result:?}");
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
        assert!(store.exists("pages", "doc/00001.pdf").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn four_failures_wrap_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptedStore::failing("doc/00001.pdf", 4);

        let err = upload_all(
            &store,
            "pages",
            jobs(dir.path(), 1),
            &UploadPolicy::default(),
            &CancellationToken::new(),
            &NoopProgress,
        )
        .await
        .unwrap_err();

        match err {
            UploadError::Exhausted {
                key,
                attempts,
                source,
            } => {
                assert_eq!(key, "doc/00001.pdf");
                assert_eq!(attempts, 4);
                assert!(matches!(source, StorageError::Status { status: 503, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptedStore::failing("doc/00001.pdf", u32::MAX);
        let policy = UploadPolicy::default();
        let cancel = CancellationToken::new();

        let start = tokio::time::Instant::now();
        let upload = upload_all(
            &store,
            "pages",
            jobs(dir.path(), 1),
            &policy,
            &cancel,
            &NoopProgress,
        );
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(upload, canceller);

        assert!(matches!(result, Err(UploadError::Cancelled { .. })));
        // Well inside the first 1 s backoff.
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_after_final_attempt_keeps_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptedStore::failing("doc/00001.pdf", u32::MAX);
        let policy = UploadPolicy {
            max_attempts: 1,
            ..UploadPolicy::default()
        };
        let cancel = CancellationToken::new();

        let start = tokio::time::Instant::now();
        let upload = upload_all(
            &store,
            "pages",
            jobs(dir.path(), 1),
            &policy,
            &cancel,
            &NoopProgress,
        );
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(upload, canceller);

        match result {
            Err(UploadError::Exhausted {
                attempts, source, ..
            }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(source, StorageError::Status { status: 503, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_page_is_reported_over_cancelled_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptedStore::failing("doc/00002.pdf", u32::MAX);
        store
            .failures
            .lock()
            .unwrap()
            .insert("doc/00003.pdf".into(), u32::MAX);
        let policy = UploadPolicy {
            max_attempts: 2,
            ..UploadPolicy::default()
        };

        let err = upload_all(
            &store,
            "pages",
            jobs(dir.path(), 3),
            &policy,
            &CancellationToken::new(),
            &NoopProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::Exhausted { .. }), "got: {err:?}");
        assert!(store.exists("pages", "doc/00001.pdf").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_local_file_is_retried_then_fails() {
        let store = ScriptedStore::default();
        let job = UploadJob {
            page: 1,
            local_path: PathBuf::from("/nonexistent/page_1.pdf"),
            key: "doc/00001.pdf".into(),
        };
        let err = upload_all(
            &store,
            "pages",
            vec![job],
            &UploadPolicy::default(),
            &CancellationToken::new(),
            &NoopProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Exhausted {
                source: StorageError::Io { .. },
                ..
            }
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_job_list_succeeds() {
        let store = ScriptedStore::default();
        upload_all(
            &store,
            "pages",
            Vec::new(),
            &UploadPolicy::default(),
            &CancellationToken::new(),
            &NoopProgress,
        )
        .await
        .unwrap();
    }
}
