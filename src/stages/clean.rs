//! Cleanup: one model pass over the aggregated master.

use super::{read_markdown, MASTER_FILE, STATUS_SUCCESS};
use crate::artifact::write_if_absent;
use crate::config::StageConfig;
use crate::error::StageError;
use crate::models::{gs_uri, MarkdownCleanerRequest, MarkdownCleanerResponse};
use crate::pipeline::llm::{GenerationRequest, Generator};
use crate::pipeline::postprocess::{refusal_phrase, tidy_markdown};
use crate::prompts::{cleaner_user_prompt, CLEANER_SYSTEM_PROMPT};
use crate::storage::ObjectStore;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MarkdownCleaner {
    store: Arc<dyn ObjectStore>,
    generator: Arc<dyn Generator>,
    config: StageConfig,
}

impl MarkdownCleaner {
    pub fn new(store: Arc<dyn ObjectStore>, generator: Arc<dyn Generator>, config: StageConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    pub async fn clean(
        &self,
        request: &MarkdownCleanerRequest,
    ) -> Result<MarkdownCleanerResponse, StageError> {
        let dest = self
            .config
            .require("CLEANED_MARKDOWN_BUCKET", &self.config.cleaned_bucket)?;
        let doc = &request.document_id;

        let master = read_markdown(self.store.as_ref(), &request.master_gcs_uri).await?;
        info!(document_id = %doc, bytes = master.len(), "Cleaning master markdown");

        let raw = self
            .generator
            .generate(&GenerationRequest::new(
                CLEANER_SYSTEM_PROMPT,
                cleaner_user_prompt(&master),
            ))
            .await?;
        if let Some(phrase) = refusal_phrase(&raw) {
            warn!(document_id = %doc, phrase, "Model refused to clean document");
            return Err(StageError::InvalidResponse(
                "model response indicates refusal to clean document".into(),
            ));
        }

        let cleaned = tidy_markdown(&raw);
        if cleaned.is_empty() {
            warn!(document_id = %doc, "Cleaned markdown is empty, saving anyway");
        }

        let key = format!("{doc}/{MASTER_FILE}");
        write_if_absent(self.store.as_ref(), dest, &key, cleaned)
            .await
            .map_err(|e| StageError::storage("failed to save cleaned markdown", e))?;

        Ok(MarkdownCleanerResponse {
            status: STATUS_SUCCESS.to_string(),
            cleaned_gcs_uri: gs_uri(dest, &key),
        })
    }
}
