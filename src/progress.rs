//! Progress-callback trait for page upload events.
//!
//! Hand an [`UploadProgress`] to [`crate::ingest::Ingestor::with_progress`]
//! (or directly to [`crate::upload::upload_all`]) to observe the bounded
//! upload engine while it runs. The CLI uses it to drive a progress bar.
//!
//! # Example
//!
//! ```rust
//! use docflow::UploadProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl UploadProgressCallback for Counter {
//!     fn on_page_uploaded(&self, page: u32, total: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {page} stored ({done}/{total})");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the upload engine as pages move through it.
///
/// Up to `concurrency` pages are in flight at once, so methods may be called
/// concurrently from different tasks. All methods default to no-ops.
pub trait UploadProgressCallback: Send + Sync {
    /// Called once before the first page is launched.
    fn on_upload_start(&self, total: usize) {
        let _ = total;
    }

    /// A page's upload was finalised.
    fn on_page_uploaded(&self, page: u32, total: usize) {
        let _ = (page, total);
    }

    /// An attempt failed and the page will be retried after `backoff_ms`.
    ///
    /// # Arguments
    /// * `page`       — 1-indexed page number
    /// * `attempt`    — the attempt that just failed (1-based)
    /// * `backoff_ms` — wait before the next attempt
    /// * `error`      — human-readable error description
    fn on_retry(&self, page: u32, attempt: u32, backoff_ms: u64, error: &str) {
        let _ = (page, attempt, backoff_ms, error);
    }

    /// A page gave up, either after its last attempt or on cancellation.
    fn on_page_failed(&self, page: u32, error: &str) {
        let _ = (page, error);
    }

    /// Called once after every launched page has finished.
    fn on_upload_complete(&self, total: usize, uploaded: usize) {
        let _ = (total, uploaded);
    }
}

/// Callback that ignores every event. Used when none is configured.
pub struct NoopProgress;

impl UploadProgressCallback for NoopProgress {}

/// Shared handle to a progress callback.
pub type UploadProgress = Arc<dyn UploadProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tally {
        uploaded: AtomicUsize,
        retries: AtomicUsize,
        failed: AtomicUsize,
    }

    impl UploadProgressCallback for Tally {
        fn on_page_uploaded(&self, _page: u32, _total: usize) {
            self.uploaded.fetch_add(1, Ordering::SeqCst);
        }

        fn on_retry(&self, _page: u32, _attempt: u32, _backoff_ms: u64, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_failed(&self, _page: u32, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_accepts_every_event() {
        let cb: UploadProgress = Arc::new(NoopProgress);
        cb.on_upload_start(3);
        cb.on_retry(1, 1, 1000, "timeout");
        cb.on_page_uploaded(1, 3);
        cb.on_page_failed(2, "boom");
        cb.on_upload_complete(3, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let tally = Tally::default();
        tally.on_page_uploaded(1, 2);
        tally.on_retry(2, 1, 1000, "503");
        tally.on_retry(2, 2, 2000, "503");
        tally.on_page_failed(2, "exhausted");
        tally.on_upload_complete(2, 1);

        assert_eq!(tally.uploaded.load(Ordering::SeqCst), 1);
        assert_eq!(tally.retries.load(Ordering::SeqCst), 2);
        assert_eq!(tally.failed.load(Ordering::SeqCst), 1);
    }
}
