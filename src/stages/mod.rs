//! Downstream single-artifact stages.
//!
//! Each stage turns one request payload into one response payload and
//! writes its output through [`crate::artifact::write_if_absent`], so a
//! replayed step never overwrites what an earlier run stored.
//!
//! | Stage                 | Reads                        | Writes (bucket)                          |
//! |-----------------------|------------------------------|------------------------------------------|
//! | [`PageTranslator`]    | one page PDF                 | `{doc}/{page}.md` (translated)           |
//! | [`MarkdownAggregator`]| every `{doc}/*.md`           | `{doc}/master.md` (aggregated)           |
//! | [`MarkdownCleaner`]   | aggregated master            | `{doc}/master.md` (cleaned)              |
//! | [`SectionSplitter`]   | cleaned master               | `{doc}/{section}.md` (final sections)    |

pub mod aggregate;
pub mod clean;
pub mod sections;
pub mod translate;

pub use aggregate::MarkdownAggregator;
pub use clean::MarkdownCleaner;
pub use sections::SectionSplitter;
pub use translate::PageTranslator;

use crate::error::StageError;
use crate::models::parse_gs_uri;
use crate::storage::ObjectStore;

/// Response status of a stage that produced its artifact.
pub const STATUS_SUCCESS: &str = "success";

/// Response status of a stage that found its artifact already present.
pub const STATUS_SKIPPED: &str = "success_skipped";

/// Object name of the assembled document inside a document's prefix.
pub const MASTER_FILE: &str = "master.md";

/// Read the markdown object behind a `gs://` URI.
pub(crate) async fn read_markdown(store: &dyn ObjectStore, uri: &str) -> Result<String, StageError> {
    let (bucket, key) = parse_gs_uri(uri).ok_or_else(|| StageError::InvalidUri(uri.to_string()))?;
    let bytes = store
        .read(bucket, key)
        .await
        .map_err(|e| StageError::storage(format!("failed to read {uri}"), e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
