//! CLI binary for docflow.
//!
//! A thin shim over the library crate: it builds the clients once, injects
//! them into the ingestion controller or a stage, and prints the result.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docflow::handoff::{LoggingLauncher, WorkflowLauncher, WorkflowsClient};
use docflow::ledger::{DocumentLedger, FirestoreLedger, MemoryLedger};
use docflow::models::{
    MarkdownAggregatorRequest, MarkdownCleanerRequest, PageTranslatorRequest,
    SectionSplitterRequest,
};
use docflow::pipeline::llm::{Generator, LlmGenerator};
use docflow::pipeline::paginate::PdfiumPaginator;
use docflow::stages::{MarkdownAggregator, MarkdownCleaner, PageTranslator, SectionSplitter};
use docflow::storage::{GcsObjectStore, LocalObjectStore, ObjectStore};
use docflow::{
    fingerprint_file, IngestConfig, IngestOutcome, Ingestor, StageConfig, StorageEvent,
    TokenSource, UploadProgress, UploadProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Upload progress bar ──────────────────────────────────────────────────

/// Progress bar over the page upload. Pages finish out of order, so the
/// bar only counts; retries and failures are printed above it.
struct CliUploadProgress {
    bar: ProgressBar,
    retries: AtomicUsize,
}

impl CliUploadProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Uploading");
        Arc::new(Self {
            bar,
            retries: AtomicUsize::new(0),
        })
    }
}

impl UploadProgressCallback for CliUploadProgress {
    fn on_upload_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_page_uploaded(&self, _page: u32, _total: usize) {
        self.bar.inc(1);
    }

    fn on_retry(&self, page: u32, attempt: u32, backoff_ms: u64, error: &str) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        self.bar.println(format!(
            "  {} page {:>4}  attempt {} failed, retrying in {}  {}",
            red("↻"),
            page,
            attempt,
            dim(&format!("{:.1}s", backoff_ms as f64 / 1000.0)),
            dim(error),
        ));
    }

    fn on_page_failed(&self, page: u32, error: &str) {
        self.bar
            .println(format!("  {} page {:>4}  {}", red("✗"), page, red(error)));
    }

    fn on_upload_complete(&self, total: usize, uploaded: usize) {
        self.bar.finish_and_clear();
        let retries = self.retries.load(Ordering::Relaxed);
        if uploaded == total {
            eprintln!(
                "{} {} pages uploaded  {}",
                green("✔"),
                bold(&uploaded.to_string()),
                dim(&format!("({retries} retries)"))
            );
        } else {
            eprintln!(
                "{} {}/{} pages uploaded",
                red("✘"),
                bold(&uploaded.to_string()),
                total
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest an object from Cloud Storage (credentials from the metadata server)
  docflow ingest --bucket incoming --object report.pdf

  # Ingest against a local directory: {root}/{bucket}/{key}
  docflow ingest --local-root ./data --bucket incoming --object report.pdf

  # Run one downstream stage with a JSON request
  docflow stage aggregate '{"documentId":"abc","executionId":"e1"}'

  # Print the dedup fingerprint of a file
  docflow hash report.pdf

ENVIRONMENT VARIABLES:
  PROJECT_ID                   Cloud project (ingest, GCP mode)
  SPLIT_PAGES_BUCKET           Destination of page artifacts
  FIRESTORE_COLLECTION         Ledger collection (default: documents)
  WORKFLOW_LOCATION            Workflow region (default: us-central1)
  WORKFLOW_ID                  Workflow name (default: document-processing-orchestrator)
  GOOGLE_OAUTH_ACCESS_TOKEN    Static bearer token instead of the metadata server
  PDFIUM_LIB_PATH              Path to libpdfium
  TRANSLATED_MARKDOWN_BUCKET   Translate output / aggregate input
  AGGREGATED_MARKDOWN_BUCKET   Aggregate output
  CLEANED_MARKDOWN_BUCKET      Clean output
  FINAL_SECTIONS_BUCKET        Sections output
  DOCFLOW_LLM_PROVIDER         LLM provider (openai, anthropic, gemini, ollama)
  DOCFLOW_MODEL                LLM model ID
"#;

/// Content-addressed PDF ingestion and downstream document stages.
#[derive(Parser, Debug)]
#[command(
    name = "docflow",
    version,
    about = "Ingest, paginate and hand off PDF documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCFLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCFLOW_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "DOCFLOW_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one ingestion for a finalized object.
    Ingest(IngestArgs),
    /// Run one downstream stage with a JSON request.
    Stage(StageArgs),
    /// Print the SHA-256 fingerprint of a local file.
    Hash {
        /// File to fingerprint.
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct Backend {
    /// Use a directory-backed store, a snapshot ledger and a log-only
    /// workflow launcher instead of the cloud services.
    #[arg(long, env = "DOCFLOW_LOCAL_ROOT")]
    local_root: Option<PathBuf>,

    /// Static OAuth2 bearer token.
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Bucket holding the uploaded object.
    #[arg(long)]
    bucket: String,

    /// Name of the uploaded object.
    #[arg(long)]
    object: String,

    #[command(flatten)]
    backend: Backend,

    #[arg(long, env = "PROJECT_ID", default_value = "")]
    project_id: String,

    #[arg(long, env = "SPLIT_PAGES_BUCKET")]
    pages_bucket: String,

    #[arg(long, env = "FIRESTORE_COLLECTION", default_value = "documents")]
    collection: String,

    #[arg(long, env = "WORKFLOW_LOCATION", default_value = "us-central1")]
    workflow_location: String,

    #[arg(long, env = "WORKFLOW_ID", default_value = "document-processing-orchestrator")]
    workflow_id: String,

    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Maximum concurrent page uploads.
    #[arg(short, long, env = "DOCFLOW_UPLOAD_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StageKind {
    Translate,
    Aggregate,
    Clean,
    Sections,
}

#[derive(Args, Debug)]
struct StageArgs {
    /// Stage to run.
    #[arg(value_enum)]
    stage: StageKind,

    /// Request JSON, or `-` to read it from stdin.
    request: String,

    #[command(flatten)]
    backend: Backend,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Hash { ref file } => {
            let hash = fingerprint_file(file)
                .await
                .with_context(|| format!("Failed to hash {}", file.display()))?;
            println!("{hash}");
        }
        Command::Ingest(ref args) => run_ingest(args, show_progress, cli.quiet).await?,
        Command::Stage(ref args) => run_stage(args).await?,
    }
    Ok(())
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")
}

fn token_source(backend: &Backend, http: &reqwest::Client) -> Arc<TokenSource> {
    Arc::new(match backend.access_token {
        Some(ref token) if !token.is_empty() => TokenSource::fixed(token.clone()),
        _ => TokenSource::metadata_server(http.clone()),
    })
}

fn object_store(backend: &Backend) -> Result<Arc<dyn ObjectStore>> {
    Ok(match backend.local_root {
        Some(ref root) => Arc::new(LocalObjectStore::new(root)),
        None => {
            let http = http_client()?;
            let tokens = token_source(backend, &http);
            Arc::new(GcsObjectStore::new(http, tokens))
        }
    })
}

// ── ingest ───────────────────────────────────────────────────────────────

/// Cloud clients for one ingestion, sharing an HTTP client and token cache.
struct GcpServices {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn DocumentLedger>,
    launcher: Arc<dyn WorkflowLauncher>,
}

fn gcp_services(
    http: reqwest::Client,
    tokens: Arc<TokenSource>,
    config: &IngestConfig,
) -> GcpServices {
    GcpServices {
        store: Arc::new(GcsObjectStore::new(http.clone(), tokens.clone())),
        ledger: Arc::new(FirestoreLedger::new(
            http.clone(),
            tokens.clone(),
            &config.project_id,
            &config.collection,
        )),
        launcher: Arc::new(WorkflowsClient::new(http, tokens, config.workflow_parent())),
    }
}

async fn run_ingest(args: &IngestArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let mut builder = IngestConfig::builder()
        .project_id(&args.project_id)
        .split_pages_bucket(&args.pages_bucket)
        .collection(&args.collection)
        .workflow_location(&args.workflow_location)
        .workflow_id(&args.workflow_id)
        .concurrency(args.concurrency);
    if let Some(ref path) = args.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    let config = builder.build().context("Invalid configuration")?;

    let store: Arc<dyn ObjectStore>;
    let ledger: Arc<dyn DocumentLedger>;
    let launcher: Arc<dyn WorkflowLauncher>;
    match args.backend.local_root {
        Some(ref root) => {
            let snapshot = root.join(".docflow").join("ledger.json");
            store = Arc::new(LocalObjectStore::new(root));
            ledger = Arc::new(
                MemoryLedger::open(&snapshot)
                    .await
                    .with_context(|| format!("Failed to open ledger {}", snapshot.display()))?,
            );
            launcher = Arc::new(LoggingLauncher);
        }
        None => {
            if config.project_id.is_empty() {
                bail!("PROJECT_ID (or --project-id) is required without --local-root");
            }
            let http = http_client()?;
            let tokens = token_source(&args.backend, &http);
            let services = gcp_services(http, tokens, &config);
            store = services.store;
            ledger = services.ledger;
            launcher = services.launcher;
        }
    }
    let paginator = Arc::new(PdfiumPaginator::new(config.pdfium_lib_path.clone()));

    let mut ingestor = Ingestor::new(store, ledger, paginator, launcher, config);
    if show_progress {
        let progress: UploadProgress = CliUploadProgress::new();
        ingestor = ingestor.with_progress(progress);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling uploads");
            on_signal.cancel();
        }
    });

    let event = StorageEvent {
        bucket: args.bucket.clone(),
        name: args.object.clone(),
    };
    let outcome = ingestor
        .process(&event, &cancel)
        .await
        .with_context(|| format!("Ingestion of gs://{}/{} failed", event.bucket, event.name))?;

    match outcome {
        IngestOutcome::Duplicate { existing_id } => {
            if !quiet {
                eprintln!("{} duplicate of {}", dim("="), bold(&existing_id));
            }
            println!("{existing_id}");
        }
        IngestOutcome::HandedOff {
            document_id,
            page_count,
            execution,
        } => {
            if !quiet {
                eprintln!(
                    "{} {}  {} pages  →  {}",
                    green("✔"),
                    bold(&document_id),
                    page_count,
                    dim(&execution.name)
                );
            }
            println!("{document_id}");
        }
    }
    Ok(())
}

// ── stage ────────────────────────────────────────────────────────────────

fn read_request<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let text = if raw == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        raw.to_string()
    };
    serde_json::from_str(&text).context("Failed to parse request JSON")
}

fn print_response<T: Serialize>(response: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(response).context("Failed to serialise response")?
    );
    Ok(())
}

fn generator(config: &StageConfig) -> Result<Arc<dyn Generator>> {
    let generator =
        LlmGenerator::from_config(config).context("Failed to set up the LLM provider")?;
    Ok(Arc::new(generator))
}

async fn run_stage(args: &StageArgs) -> Result<()> {
    let config = StageConfig::from_env();
    let store = object_store(&args.backend)?;

    match args.stage {
        StageKind::Translate => {
            let request: PageTranslatorRequest = read_request(&args.request)?;
            let stage = PageTranslator::new(store, generator(&config)?, config);
            print_response(&stage.translate(&request).await.context("Translation failed")?)
        }
        StageKind::Aggregate => {
            let request: MarkdownAggregatorRequest = read_request(&args.request)?;
            let stage = MarkdownAggregator::new(store, config);
            print_response(&stage.aggregate(&request).await.context("Aggregation failed")?)
        }
        StageKind::Clean => {
            let request: MarkdownCleanerRequest = read_request(&args.request)?;
            let stage = MarkdownCleaner::new(store, generator(&config)?, config);
            print_response(&stage.clean(&request).await.context("Cleanup failed")?)
        }
        StageKind::Sections => {
            let request: SectionSplitterRequest = read_request(&args.request)?;
            let stage = SectionSplitter::new(store, generator(&config)?, config);
            print_response(&stage.split(&request).await.context("Section split failed")?)
        }
    }
}
