use lopdf::Document;

use examprep_core::{BackendError, PdfBackend};

/// Pure-Rust text extraction on `lopdf`.
///
/// Less accurate than MuPDF on complex layouts but parses some files MuPDF
/// rejects, so it serves as the fallback backend. It cannot render pages.
#[derive(Debug, Default)]
pub struct LopdfBackend;

impl LopdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PdfBackend for LopdfBackend {
    fn name(&self) -> &str {
        "lopdf"
    }

    fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, BackendError> {
        let document = Document::load_mem(bytes).map_err(|e| BackendError::OpenError(e.to_string()))?;
        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(BackendError::NoPages);
        }

        pages
            .keys()
            .map(|&number| {
                document
                    .extract_text(&[number])
                    .map_err(|e| BackendError::ExtractionError(format!("page {number}: {e}")))
            })
            .collect()
    }
}
