//! Page translation: one single-page PDF in, one markdown file out.

use super::{STATUS_SKIPPED, STATUS_SUCCESS};
use crate::artifact::write_if_absent;
use crate::config::StageConfig;
use crate::error::{PdfError, StageError};
use crate::models::{gs_uri, parse_gs_uri, PageTranslatorRequest, PageTranslatorResponse};
use crate::pipeline::encode::encode_page;
use crate::pipeline::llm::{GenerationRequest, Generator};
use crate::pipeline::postprocess::tidy_markdown;
use crate::pipeline::render::render_first_page;
use crate::prompts::{TRANSLATOR_SYSTEM_PROMPT, TRANSLATOR_USER_PROMPT};
use crate::storage::ObjectStore;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// Key of the translated markdown for one page: `{documentId}/{page}.md`.
pub fn translated_key(document_id: &str, page_number: u32) -> String {
    format!("{document_id}/{page_number}.md")
}

pub struct PageTranslator {
    store: Arc<dyn ObjectStore>,
    generator: Arc<dyn Generator>,
    config: StageConfig,
}

impl PageTranslator {
    pub fn new(store: Arc<dyn ObjectStore>, generator: Arc<dyn Generator>, config: StageConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    pub async fn translate(
        &self,
        request: &PageTranslatorRequest,
    ) -> Result<PageTranslatorResponse, StageError> {
        let span = info_span!(
            "translate",
            document_id = %request.document_id,
            page = request.page_number,
            execution_id = %request.execution_id,
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: &PageTranslatorRequest) -> Result<PageTranslatorResponse, StageError> {
        let bucket = self
            .config
            .require("TRANSLATED_MARKDOWN_BUCKET", &self.config.translated_bucket)?;
        let key = translated_key(&request.document_id, request.page_number);
        let output_gcs_uri = gs_uri(bucket, &key);

        let exists = self
            .store
            .exists(bucket, &key)
            .await
            .map_err(|e| StageError::storage("failed to check for existing output", e))?;
        if exists {
            info!(object = %key, "Output already exists, skipping translation");
            return Ok(PageTranslatorResponse {
                status: STATUS_SKIPPED.to_string(),
                output_gcs_uri,
            });
        }

        let (src_bucket, src_key) = parse_gs_uri(&request.gcs_uri)
            .ok_or_else(|| StageError::InvalidUri(request.gcs_uri.clone()))?;
        let workdir = tempfile::Builder::new()
            .prefix("docflow-page-")
            .tempdir()?;
        let local = workdir.path().join("page.pdf");
        self.store
            .download_to(src_bucket, src_key, &local)
            .await
            .map_err(|e| StageError::storage(format!("failed to download {}", request.gcs_uri), e))?;

        let page = request.page_number;
        let image = render_first_page(
            &local,
            self.config.max_rendered_pixels,
            self.config.pdfium_lib_path.clone(),
        )
        .await
        .map_err(|source| StageError::Render { page, source })?;
        let attachment = encode_page(&image).map_err(|e| StageError::Render {
            page,
            source: PdfError::Page {
                page: page as usize,
                detail: format!("image encoding failed: {e}"),
            },
        })?;

        let raw = self
            .generator
            .generate(
                &GenerationRequest::new(TRANSLATOR_SYSTEM_PROMPT, TRANSLATOR_USER_PROMPT)
                    .with_image(attachment),
            )
            .await?;
        let markdown = tidy_markdown(&raw);
        if markdown.is_empty() {
            return Err(StageError::InvalidResponse(
                "extracted markdown content is empty".into(),
            ));
        }

        write_if_absent(self.store.as_ref(), bucket, &key, markdown)
            .await
            .map_err(|e| StageError::storage("failed to save markdown", e))?;
        info!(output = %output_gcs_uri, "Page translated");

        Ok(PageTranslatorResponse {
            status: STATUS_SUCCESS.to_string(),
            output_gcs_uri,
        })
    }
}
