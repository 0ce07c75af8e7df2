//! Section splitting: ask the model for `[{section, content}]` and store
//! each section as its own markdown file.

use super::{read_markdown, STATUS_SUCCESS};
use crate::artifact::write_if_absent;
use crate::config::StageConfig;
use crate::error::StageError;
use crate::models::{SectionSplitterRequest, SectionSplitterResponse};
use crate::pipeline::llm::{GenerationRequest, Generator};
use crate::pipeline::postprocess::{sanitize_section_name, strip_fences};
use crate::prompts::{sections_user_prompt, SECTIONS_SYSTEM_PROMPT};
use crate::storage::ObjectStore;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One element of the model's answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Section {
    pub section: String,
    pub content: String,
}

/// Parse the model's answer, tolerating an outer ```` ```json ```` fence.
pub fn parse_sections(raw: &str) -> Result<Vec<Section>, StageError> {
    let body = strip_fences(raw);
    if body.is_empty() {
        return Err(StageError::InvalidResponse(
            "model returned an empty response".into(),
        ));
    }
    serde_json::from_str(&body)
        .map_err(|e| StageError::InvalidResponse(format!("failed to parse sections JSON: {e}")))
}

/// Object name stem of section `index` (0-based).
pub fn section_file_stem(title: &str, index: usize) -> String {
    let name = sanitize_section_name(title);
    if name.is_empty() {
        format!("untitled_section_{}", index + 1)
    } else {
        name
    }
}

pub struct SectionSplitter {
    store: Arc<dyn ObjectStore>,
    generator: Arc<dyn Generator>,
    config: StageConfig,
}

impl SectionSplitter {
    pub fn new(store: Arc<dyn ObjectStore>, generator: Arc<dyn Generator>, config: StageConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    pub async fn split(
        &self,
        request: &SectionSplitterRequest,
    ) -> Result<SectionSplitterResponse, StageError> {
        let dest = self
            .config
            .require("FINAL_SECTIONS_BUCKET", &self.config.sections_bucket)?;
        let doc = &request.document_id;

        let cleaned = read_markdown(self.store.as_ref(), &request.cleaned_gcs_uri).await?;
        let raw = self
            .generator
            .generate(
                &GenerationRequest::new(SECTIONS_SYSTEM_PROMPT, sections_user_prompt(&cleaned))
                    .with_temperature(0.0),
            )
            .await?;
        let sections = parse_sections(&raw)?;
        if sections.is_empty() {
            warn!(document_id = %doc, "Model found no sections");
        }

        let mut saved = 0usize;
        for (index, section) in sections.iter().enumerate() {
            let key = format!("{doc}/{}.md", section_file_stem(&section.section, index));
            match write_if_absent(self.store.as_ref(), dest, &key, section.content.as_str()).await {
                Ok(outcome) => {
                    debug!(object = %key, ?outcome, "Section stored");
                    saved += 1;
                }
                Err(e) => warn!(object = %key, error = %e, "Failed to save section, skipping"),
            }
        }
        info!(document_id = %doc, saved, total = sections.len(), "Sections written");

        Ok(SectionSplitterResponse {
            status: STATUS_SUCCESS.to_string(),
            section_count: saved,
        })
    }
}
