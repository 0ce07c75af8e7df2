//! Page rasterisation for the translate stage.
//!
//! Translation works on single-page PDFs produced by ingestion, so only the
//! first page of the file is rendered. The longest edge is capped at
//! `max_pixels` regardless of physical page size, which keeps memory bounded
//! for oversized pages (an A0 poster would otherwise produce a
//! 12,000 × 17,000 px bitmap).

use super::bind_pdfium;
use crate::error::PdfError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rasterise the first page of `pdf_path`.
pub async fn render_first_page(
    pdf_path: &Path,
    max_pixels: u32,
    lib_path: Option<PathBuf>,
) -> Result<DynamicImage, PdfError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || render_blocking(&path, max_pixels, lib_path.as_deref()))
        .await
        .map_err(|e| PdfError::Task(format!("render task panicked: {}", e)))?
}

fn render_blocking(
    pdf_path: &Path,
    max_pixels: u32,
    lib_path: Option<&Path>,
) -> Result<DynamicImage, PdfError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfError::Corrupt {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    if pages.len() == 0 {
        return Err(PdfError::Empty);
    }
    let page = pages.get(0).map_err(|e| PdfError::Page {
        page: 1,
        detail: format!("{:?}", e),
    })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| PdfError::Page {
            page: 1,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered {} → {}x{} px",
        pdf_path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}
