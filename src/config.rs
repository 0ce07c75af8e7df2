//! Configuration for the ingestion stage and the downstream stages.
//!
//! [`IngestConfig`] carries every knob the ingestion controller needs: where
//! page artifacts go, which ledger collection to use, which workflow to start,
//! and the upload engine's [`UploadPolicy`]. Build it with
//! [`IngestConfig::builder()`] or load it from the deployment environment with
//! [`IngestConfig::from_env()`].
//!
//! [`StageConfig`] is the equivalent for the translate / aggregate / clean /
//! sections stages.

use crate::error::{IngestError, StageError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Read an environment variable, falling back to `fallback` when unset.
pub fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_required(key: &str) -> Result<String, String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("{key} environment variable must be set")),
    }
}

// ── Upload policy ────────────────────────────────────────────────────────

/// Concurrency, timeout and retry settings for the bounded upload engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Maximum number of page uploads in flight at once. Default: 10.
    pub concurrency: usize,

    /// Deadline for a single upload attempt. Default: 50 s.
    pub attempt_timeout: Duration,

    /// Total attempts per page, including the first. Default: 4.
    pub max_attempts: u32,

    /// Wait before the first retry; doubles after each failed attempt.
    /// Default: 1 s, giving 1 s → 2 s → 4 s → 8 s.
    pub initial_backoff: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            concurrency: 10,
            attempt_timeout: Duration::from_secs(50),
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl UploadPolicy {
    /// Backoff to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }
}

// ── Ingestion config ─────────────────────────────────────────────────────

/// Configuration for the ingestion controller.
///
/// # Example
/// ```rust
/// use docflow::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .project_id("acme-docs")
///     .split_pages_bucket("acme-split-pages")
///     .concurrency(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.collection, "documents");
/// ```
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Cloud project hosting the ledger and the workflow.
    pub project_id: String,

    /// Bucket receiving `{documentId}/{page:05}.pdf` artifacts.
    pub split_pages_bucket: String,

    /// Ledger collection holding one record per ingested document.
    /// Default: `documents`.
    pub collection: String,

    /// Region of the downstream workflow. Default: `us-central1`.
    pub workflow_location: String,

    /// Identifier of the downstream workflow.
    /// Default: `document-processing-orchestrator`.
    pub workflow_id: String,

    /// Explicit path to libpdfium. When `None`, the system library is used.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Upload engine settings.
    pub upload: UploadPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            split_pages_bucket: String::new(),
            collection: "documents".to_string(),
            workflow_location: "us-central1".to_string(),
            workflow_id: "document-processing-orchestrator".to_string(),
            pdfium_lib_path: None,
            upload: UploadPolicy::default(),
        }
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load from `PROJECT_ID`, `SPLIT_PAGES_BUCKET`, `FIRESTORE_COLLECTION`,
    /// `WORKFLOW_LOCATION`, `WORKFLOW_ID` and `PDFIUM_LIB_PATH`.
    pub fn from_env() -> Result<Self, IngestError> {
        let mut builder = Self::builder()
            .project_id(env_required("PROJECT_ID").map_err(IngestError::InvalidConfig)?)
            .split_pages_bucket(
                env_required("SPLIT_PAGES_BUCKET").map_err(IngestError::InvalidConfig)?,
            )
            .collection(env_or("FIRESTORE_COLLECTION", "documents"))
            .workflow_location(env_or("WORKFLOW_LOCATION", "us-central1"))
            .workflow_id(env_or("WORKFLOW_ID", "document-processing-orchestrator"));
        if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
            builder = builder.pdfium_lib_path(path);
        }
        builder.build()
    }

    /// Fully-qualified workflow name used by the executions API.
    pub fn workflow_parent(&self) -> String {
        format!(
            "projects/{}/locations/{}/workflows/{}",
            self.project_id, self.workflow_location, self.workflow_id
        )
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = id.into();
        self
    }

    pub fn split_pages_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.split_pages_bucket = bucket.into();
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    pub fn workflow_location(mut self, location: impl Into<String>) -> Self {
        self.config.workflow_location = location.into();
        self
    }

    pub fn workflow_id(mut self, id: impl Into<String>) -> Self {
        self.config.workflow_id = id.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.upload.concurrency = n.max(1);
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.upload.attempt_timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.upload.max_attempts = n.max(1);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.upload.initial_backoff = backoff;
        self
    }

    pub fn upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.config.upload = policy;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.split_pages_bucket.is_empty() {
            return Err(IngestError::InvalidConfig(
                "split pages bucket must be set".into(),
            ));
        }
        if c.collection.is_empty() {
            return Err(IngestError::InvalidConfig(
                "ledger collection must not be empty".into(),
            ));
        }
        if c.upload.concurrency == 0 || c.upload.max_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "upload concurrency and attempts must be ≥ 1".into(),
            ));
        }
        if c.upload.attempt_timeout.is_zero() {
            return Err(IngestError::InvalidConfig(
                "upload attempt timeout must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Stage config ─────────────────────────────────────────────────────────

/// Configuration shared by the downstream single-artifact stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    /// Destination of per-page markdown (`{documentId}/{page}.md`).
    pub translated_bucket: String,
    /// Destination of `{documentId}/master.md` after aggregation.
    pub aggregated_bucket: String,
    /// Destination of the cleaned `{documentId}/master.md`.
    pub cleaned_bucket: String,
    /// Destination of `{documentId}/{section}.md` files.
    pub sections_bucket: String,

    /// LLM provider name (e.g. "openai", "gemini"). Auto-detected when `None`.
    pub provider_name: Option<String>,
    /// Model identifier. Provider default when `None`.
    pub model: Option<String>,

    /// Sampling temperature. Default: 0.1. The section splitter always uses 0.
    pub temperature: f32,
    /// Output-token cap per model call. Default: 16384.
    pub max_tokens: usize,
    /// Retries after the first failed model call. Default: 3.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Longest rendered edge in pixels for page translation. Default: 2000.
    pub max_rendered_pixels: u32,
    /// Explicit path to libpdfium.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            translated_bucket: String::new(),
            aggregated_bucket: String::new(),
            cleaned_bucket: String::new(),
            sections_bucket: String::new(),
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 16384,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_rendered_pixels: 2000,
            pdfium_lib_path: None,
        }
    }
}

impl StageConfig {
    /// Load bucket names and model settings from the environment.
    ///
    /// Buckets a given stage does not use may be left unset; each stage
    /// checks its own buckets via [`StageConfig::require`].
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let mut config = Self {
            translated_bucket: env_or("TRANSLATED_MARKDOWN_BUCKET", ""),
            aggregated_bucket: env_or("AGGREGATED_MARKDOWN_BUCKET", ""),
            cleaned_bucket: env_or("CLEANED_MARKDOWN_BUCKET", ""),
            sections_bucket: env_or("FINAL_SECTIONS_BUCKET", ""),
            provider_name: non_empty("DOCFLOW_LLM_PROVIDER"),
            model: non_empty("DOCFLOW_MODEL"),
            pdfium_lib_path: non_empty("PDFIUM_LIB_PATH").map(PathBuf::from),
            ..Self::default()
        };
        if let Some(t) = non_empty("DOCFLOW_TEMPERATURE").and_then(|v| v.parse().ok()) {
            config.temperature = f32::clamp(t, 0.0, 2.0);
        }
        if let Some(n) = non_empty("DOCFLOW_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            config.max_tokens = n;
        }
        config
    }

    /// Fail with a config error when `bucket` is empty.
    pub fn require<'a>(&self, name: &str, bucket: &'a str) -> Result<&'a str, StageError> {
        if bucket.is_empty() {
            Err(StageError::InvalidConfig(format!("{name} must be set")))
        } else {
            Ok(bucket)
        }
    }
}
