//! PDF normalisation and pagination.
//!
//! [`PdfPaginator`] is the seam the ingestion controller talks to. Keeping
//! the three steps separate lets the controller attach the right failure
//! context to each one ("failed to validate/optimize PDF", "failed to get
//! page count", "failed to split PDF").
//!
//! [`PdfiumPaginator`] is the production implementation. pdfium repairs
//! common damage (broken xref tables, bad offsets, missing trailers) while
//! loading, so "normalise" is a tolerant load followed by a clean re-save.
//! Every pdfium call runs inside `spawn_blocking`.

use super::bind_pdfium;
use crate::error::PdfError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Repairs, counts and splits PDFs on local disk.
#[async_trait]
pub trait PdfPaginator: Send + Sync {
    /// Load `source` tolerantly and write a repaired copy to `dest`.
    async fn normalize(&self, source: &Path, dest: &Path) -> Result<(), PdfError>;

    /// Number of pages in `path`.
    async fn page_count(&self, path: &Path) -> Result<u32, PdfError>;

    /// Write one single-page PDF per page of `path` into `out_dir`.
    /// Element `i` of the result holds page `i + 1`.
    async fn split(&self, path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PdfError>;
}

/// Local file name of split page `page` (1-based).
pub fn split_file_name(page: u32) -> String {
    format!("page_{page:05}.pdf")
}

/// pdfium-backed paginator.
#[derive(Debug, Clone, Default)]
pub struct PdfiumPaginator {
    lib_path: Option<PathBuf>,
}

impl PdfiumPaginator {
    /// Use the system pdfium, or the library at `lib_path` when given.
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, PdfError>
    where
        T: Send + 'static,
        F: FnOnce(Option<&Path>) -> Result<T, PdfError> + Send + 'static,
    {
        let lib = self.lib_path.clone();
        tokio::task::spawn_blocking(move || f(lib.as_deref()))
            .await
            .map_err(|e| PdfError::Task(e.to_string()))?
    }
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, PdfError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| PdfError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

fn normalize_blocking(lib: Option<&Path>, source: &Path, dest: &Path) -> Result<(), PdfError> {
    let pdfium = bind_pdfium(lib)?;
    let document = open(&pdfium, source)?;
    document
        .save_to_file(dest)
        .map_err(|e| PdfError::Write {
            path: dest.to_path_buf(),
            detail: format!("{:?}", e),
        })?;
    debug!("Normalised {} → {}", source.display(), dest.display());
    Ok(())
}

fn page_count_blocking(lib: Option<&Path>, path: &Path) -> Result<u32, PdfError> {
    let pdfium = bind_pdfium(lib)?;
    let document = open(&pdfium, path)?;
    Ok(document.pages().len() as u32)
}

fn split_blocking(lib: Option<&Path>, path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PdfError> {
    let pdfium = bind_pdfium(lib)?;
    let source = open(&pdfium, path)?;
    let count = source.pages().len();
    let mut files = Vec::with_capacity(count as usize);

    for index in 0..count {
        let page = index as usize + 1;
        let page_err = |e: PdfiumError| PdfError::Page {
            page,
            detail: format!("{:?}", e),
        };

        let mut single = pdfium.create_new_pdf().map_err(page_err)?;
        single
            .pages_mut()
            .copy_page_from_document(&source, index, 0)
            .map_err(page_err)?;

        let dest = out_dir.join(split_file_name(page as u32));
        single.save_to_file(&dest).map_err(|e| PdfError::Write {
            path: dest.clone(),
            detail: format!("{:?}", e),
        })?;
        files.push(dest);
    }

    info!("Split {} into {} single-page files", path.display(), files.len());
    Ok(files)
}

#[async_trait]
impl PdfPaginator for PdfiumPaginator {
    async fn normalize(&self, source: &Path, dest: &Path) -> Result<(), PdfError> {
        let (source, dest) = (source.to_path_buf(), dest.to_path_buf());
        self.blocking(move |lib| normalize_blocking(lib, &source, &dest))
            .await
    }

    async fn page_count(&self, path: &Path) -> Result<u32, PdfError> {
        let path = path.to_path_buf();
        self.blocking(move |lib| page_count_blocking(lib, &path)).await
    }

    async fn split(&self, path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PdfError> {
        let (path, out_dir) = (path.to_path_buf(), out_dir.to_path_buf());
        self.blocking(move |lib| split_blocking(lib, &path, &out_dir))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_names_sort_in_page_order() {
        assert_eq!(split_file_name(1), "page_00001.pdf");
        assert!(split_file_name(2) < split_file_name(10));
    }

    #[tokio::test]
    async fn missing_library_is_a_binding_error() {
        let paginator = PdfiumPaginator::new(Some(PathBuf::from(
            "/nonexistent/docflow/libpdfium.so",
        )));
        let err = paginator
            .page_count(Path::new("/nonexistent/source.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, PdfError::Binding(_)), "got: {err}");
    }
}
