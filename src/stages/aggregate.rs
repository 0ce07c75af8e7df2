//! Aggregation: concatenate every translated page into one master file.
//!
//! Pages are ordered by the number in their file name, so `10.md` follows
//! `9.md`. Any non-numeric names sort after the pages, lexically.

use super::{MASTER_FILE, STATUS_SUCCESS};
use crate::artifact::write_if_absent;
use crate::config::StageConfig;
use crate::error::StageError;
use crate::models::{gs_uri, MarkdownAggregatorRequest, MarkdownAggregatorResponse};
use crate::storage::ObjectStore;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Appended after every page.
pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";

pub struct MarkdownAggregator {
    store: Arc<dyn ObjectStore>,
    config: StageConfig,
}

fn page_number(key: &str) -> Option<u64> {
    key.rsplit('/')
        .next()?
        .strip_suffix(".md")?
        .parse()
        .ok()
}

fn page_order(a: &String, b: &String) -> Ordering {
    match (page_number(a), page_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Direct `.md` children of `{document_id}/`, in page order.
pub fn page_keys(document_id: &str, mut keys: Vec<String>) -> Vec<String> {
    let prefix = format!("{document_id}/");
    keys.retain(|k| {
        k.strip_prefix(&prefix)
            .is_some_and(|rest| !rest.contains('/') && rest.ends_with(".md"))
    });
    keys.sort_by(page_order);
    keys
}

impl MarkdownAggregator {
    pub fn new(store: Arc<dyn ObjectStore>, config: StageConfig) -> Self {
        Self { store, config }
    }

    pub async fn aggregate(
        &self,
        request: &MarkdownAggregatorRequest,
    ) -> Result<MarkdownAggregatorResponse, StageError> {
        let source = self
            .config
            .require("TRANSLATED_MARKDOWN_BUCKET", &self.config.translated_bucket)?;
        let dest = self
            .config
            .require("AGGREGATED_MARKDOWN_BUCKET", &self.config.aggregated_bucket)?;
        let doc = &request.document_id;

        let listed = self
            .store
            .list(source, &format!("{doc}/"))
            .await
            .map_err(|e| StageError::storage("failed to list translated pages", e))?;
        let keys = page_keys(doc, listed);
        if keys.is_empty() {
            return Err(StageError::NothingToAggregate(doc.clone()));
        }
        info!(document_id = %doc, pages = keys.len(), "Aggregating translated pages");

        let mut master = String::new();
        for key in &keys {
            let bytes = self
                .store
                .read(source, key)
                .await
                .map_err(|e| StageError::storage(format!("failed to read {key}"), e))?;
            debug!(object = %key, bytes = bytes.len(), "Appending page");
            master.push_str(&String::from_utf8_lossy(&bytes));
            master.push_str(PAGE_SEPARATOR);
        }

        let key = format!("{doc}/{MASTER_FILE}");
        write_if_absent(self.store.as_ref(), dest, &key, master)
            .await
            .map_err(|e| StageError::storage("failed to save master markdown", e))?;

        Ok(MarkdownAggregatorResponse {
            status: STATUS_SUCCESS.to_string(),
            master_gcs_uri: gs_uri(dest, &key),
        })
    }
}
