use std::sync::Arc;
use std::time::Duration;

use examprep_core::{Config, TextExtractor};

pub mod lopdf_backend;
pub mod tesseract;

pub use lopdf_backend::LopdfBackend;
pub use tesseract::TesseractOcr;

/// The extractor used by the front ends.
///
/// With the `pdf` feature, MuPDF reads the text layer and renders pages for
/// OCR, and lopdf is the fallback. Without it, lopdf is the only backend
/// and OCR of PDF pages is unavailable (standalone images still work).
pub fn default_extractor(config: &Config) -> TextExtractor {
    let ocr = TesseractOcr::new()
        .with_command(&config.tesseract_command)
        .with_language(&config.ocr_language)
        .with_timeout(Duration::from_secs(config.ocr_timeout_secs));
    tracing::debug!(
        command = %config.tesseract_command,
        language = %config.ocr_language,
        dpi = config.ocr_dpi,
        workers = config.ocr_workers,
        "OCR engine configured"
    );

    build(config)
        .with_ocr(Arc::new(ocr))
        .with_ocr_dpi(config.ocr_dpi)
        .with_ocr_workers(config.ocr_workers)
}

#[cfg(feature = "pdf")]
fn build(_config: &Config) -> TextExtractor {
    TextExtractor::new(Arc::new(examprep_pdf_mupdf::MupdfBackend::new()))
        .with_fallback(Arc::new(LopdfBackend::new()))
}

#[cfg(not(feature = "pdf"))]
fn build(_config: &Config) -> TextExtractor {
    tracing::debug!("built without MuPDF; using lopdf only");
    TextExtractor::new(Arc::new(LopdfBackend::new()))
}
