//! PDF and model plumbing shared by the ingestion and downstream stages.
//!
//! ## Data Flow
//!
//! ```text
//! ingestion:   source.pdf ──▶ paginate ──▶ page_00001.pdf … page_NNNNN.pdf
//! translation: page.pdf ──▶ render ──▶ encode ──▶ llm ──▶ postprocess
//!                           (pdfium)   (base64)   (VLM)   (cleanup)
//! ```
//!
//! 1. [`paginate`] — repair/normalise a PDF, count its pages and split it into
//!    single-page files
//! 2. [`render`] — rasterise a page; runs in `spawn_blocking` because pdfium
//!    is not async-safe
//! 3. [`encode`] — PNG-encode and base64-wrap the image for the model request
//! 4. [`llm`] — the [`llm::Generator`] seam and its retrying provider-backed
//!    implementation
//! 5. [`postprocess`] — deterministic cleanup of model output

pub mod encode;
pub mod llm;
pub mod paginate;
pub mod postprocess;
pub mod render;

use crate::error::PdfError;
use pdfium_render::prelude::*;
use std::path::Path;

/// Bind pdfium from `lib_path` (a library file or the directory holding it),
/// or from the system library search path when `None`.
///
/// Must be called from a blocking context.
pub(crate) fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, PdfError> {
    let bindings = match lib_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PdfError::Binding(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}
