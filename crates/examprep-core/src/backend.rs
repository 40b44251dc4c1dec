use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("document has no pages")]
    NoPages,
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("failed to render page {page}: {message}")]
    RenderError { page: usize, message: String },
    #[error("{0} cannot render pages")]
    RenderUnsupported(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Whether the error means the bytes are not a readable PDF at all,
    /// as opposed to a readable PDF the backend failed to process.
    pub fn is_invalid_document(&self) -> bool {
        matches!(self, BackendError::OpenError(_) | BackendError::NoPages)
    }
}

/// Trait for PDF text extraction backends.
///
/// Implementors work on in-memory bytes; validation (size ceiling, header
/// sniffing), fallback between backends and OCR live in
/// [`TextExtractor`](crate::extract::TextExtractor).
pub trait PdfBackend: Send + Sync {
    /// Short name used in logs and in [`ExtractedDocument`](crate::ExtractedDocument).
    fn name(&self) -> &str;

    /// Text layer of every page, in page order. A document with zero pages
    /// must be reported as [`BackendError::NoPages`].
    fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, BackendError>;

    /// Render every page to a PNG image at the given resolution.
    fn render_pages(&self, _bytes: &[u8], _dpi: u32) -> Result<Vec<Vec<u8>>, BackendError> {
        Err(BackendError::RenderUnsupported(self.name().to_string()))
    }
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("failed to start OCR engine: {0}")]
    Spawn(String),
    #[error("OCR engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("OCR timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("OCR worker failed: {0}")]
    Worker(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An optical character recognition engine.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize the text in one encoded image (PNG or JPEG).
    fn recognize<'a>(
        &'a self,
        image: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<String, OcrError>> + Send + 'a>>;
}
