//! PDF text extraction with a fallback backend and optional OCR.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::backend::{BackendError, OcrEngine, OcrError, PdfBackend};
use crate::cache::{Fingerprint, OcrCache};
use crate::upload::{validate_image_upload, validate_pdf_upload};

pub const DEFAULT_OCR_DPI: u32 = 200;
pub const DEFAULT_OCR_WORKERS: usize = 4;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(
        "file is {} MB, larger than the {} MB limit",
        megabytes(.size),
        megabytes(.limit)
    )]
    Oversize { size: usize, limit: usize },
    #[error("not a valid PDF: {0}")]
    InvalidPdf(String),
    #[error("no text could be extracted from the document (scanned pages need OCR)")]
    EmptyText,
    #[error("only PNG and JPEG images are supported")]
    UnsupportedImage,
    #[error("OCR was requested but no OCR engine is configured")]
    OcrUnavailable,
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("cannot read file: {0}")]
    Read(#[from] std::io::Error),
}

fn megabytes(bytes: &usize) -> String {
    let mb = *bytes as f64 / (1024.0 * 1024.0);
    if mb.fract() == 0.0 {
        format!("{mb:.0}")
    } else {
        format!("{mb:.1}")
    }
}

impl ExtractError {
    fn from_backend(err: BackendError) -> Self {
        if err.is_invalid_document() {
            ExtractError::InvalidPdf(err.to_string())
        } else {
            ExtractError::Backend(err)
        }
    }
}

/// Text pulled out of one uploaded PDF.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Page texts concatenated in order, followed by OCR output when requested.
    pub text: String,
    pub page_count: usize,
    pub fingerprint: Fingerprint,
    /// Name of the [`PdfBackend`] whose text layer was used.
    pub backend: String,
    pub ocr_applied: bool,
}

/// Turns uploaded PDF bytes into a single string.
///
/// The primary backend is tried first; if it fails and a fallback is
/// configured, the fallback gets a chance. OCR renders every page through
/// the backend that produced the text layer and runs one task per page.
pub struct TextExtractor {
    primary: Arc<dyn PdfBackend>,
    fallback: Option<Arc<dyn PdfBackend>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    ocr_dpi: u32,
    ocr_workers: usize,
}

impl TextExtractor {
    pub fn new(primary: Arc<dyn PdfBackend>) -> Self {
        Self {
            primary,
            fallback: None,
            ocr: None,
            ocr_dpi: DEFAULT_OCR_DPI,
            ocr_workers: DEFAULT_OCR_WORKERS,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn PdfBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn with_ocr_dpi(mut self, dpi: u32) -> Self {
        self.ocr_dpi = dpi.max(1);
        self
    }

    /// Maximum number of pages OCR'd at the same time.
    pub fn with_ocr_workers(mut self, workers: usize) -> Self {
        self.ocr_workers = workers.max(1);
        self
    }

    pub fn has_ocr(&self) -> bool {
        self.ocr.is_some()
    }

    /// Validate `bytes`, extract the text layer and, if `use_ocr`, append
    /// OCR output (memoized in `cache` by document fingerprint).
    pub async fn extract(
        &self,
        bytes: &[u8],
        use_ocr: bool,
        cache: &OcrCache,
    ) -> Result<ExtractedDocument, ExtractError> {
        validate_pdf_upload(bytes)?;
        if use_ocr && self.ocr.is_none() {
            return Err(ExtractError::OcrUnavailable);
        }

        let data: Arc<[u8]> = Arc::from(bytes);
        let (backend, pages) = self.read_text_layer(&data).await?;
        let mut text = pages.concat();
        tracing::debug!(
            backend = backend.name(),
            pages = pages.len(),
            chars = text.len(),
            "extracted text layer"
        );

        if use_ocr {
            let ocr_text = cache
                .get_or_try_insert_with(bytes, || self.ocr_pages(&backend, &data))
                .await?;
            if !ocr_text.trim().is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&ocr_text);
            }
        }

        if text.trim().is_empty() {
            return Err(ExtractError::EmptyText);
        }

        Ok(ExtractedDocument {
            text,
            page_count: pages.len(),
            fingerprint: Fingerprint::of(bytes),
            backend: backend.name().to_string(),
            ocr_applied: use_ocr,
        })
    }

    /// OCR a standalone PNG or JPEG image.
    pub async fn recognize_image(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let kind = validate_image_upload(bytes)?;
        let engine = self.ocr.as_ref().ok_or(ExtractError::OcrUnavailable)?;
        tracing::debug!(engine = engine.name(), ?kind, "recognizing standalone image");
        let text = engine.recognize(bytes).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractError::EmptyText);
        }
        Ok(text.to_string())
    }

    async fn read_text_layer(
        &self,
        data: &Arc<[u8]>,
    ) -> Result<(Arc<dyn PdfBackend>, Vec<String>), ExtractError> {
        let primary_err = match page_texts_blocking(Arc::clone(&self.primary), Arc::clone(data)).await {
            Ok(pages) => return Ok((Arc::clone(&self.primary), pages)),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(ExtractError::from_backend(primary_err));
        };

        tracing::warn!(
            primary = self.primary.name(),
            fallback = fallback.name(),
            error = %primary_err,
            "primary PDF backend failed, trying fallback"
        );
        match page_texts_blocking(Arc::clone(fallback), Arc::clone(data)).await {
            Ok(pages) => Ok((Arc::clone(fallback), pages)),
            Err(fallback_err) => {
                tracing::debug!(error = %fallback_err, "fallback PDF backend failed too");
                Err(ExtractError::from_backend(primary_err))
            }
        }
    }

    async fn ocr_pages(
        &self,
        backend: &Arc<dyn PdfBackend>,
        data: &Arc<[u8]>,
    ) -> Result<String, ExtractError> {
        let engine = self.ocr.clone().ok_or(ExtractError::OcrUnavailable)?;

        let renderer = Arc::clone(backend);
        let bytes = Arc::clone(data);
        let dpi = self.ocr_dpi;
        let images = tokio::task::spawn_blocking(move || renderer.render_pages(&bytes, dpi))
            .await
            .map_err(|e| OcrError::Worker(e.to_string()))?
            .map_err(ExtractError::from_backend)?;

        tracing::debug!(
            pages = images.len(),
            workers = self.ocr_workers,
            engine = engine.name(),
            "running OCR"
        );

        let permits = Arc::new(Semaphore::new(self.ocr_workers));
        let mut join_set = JoinSet::new();
        let page_count = images.len();

        for (index, image) in images.into_iter().enumerate() {
            let engine = Arc::clone(&engine);
            let permits = Arc::clone(&permits);
            join_set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| OcrError::Worker(e.to_string()))?;
                let text = engine.recognize(&image).await?;
                Ok::<_, OcrError>((index, text))
            });
        }

        let mut pages = vec![String::new(); page_count];
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined
                .map_err(|e| OcrError::Worker(e.to_string()))
                .and_then(|r| r);
            match outcome {
                Ok((index, text)) => pages[index] = text,
                Err(e) => {
                    // One failed page fails the whole batch.
                    join_set.abort_all();
                    return Err(ExtractError::Ocr(e));
                }
            }
        }

        Ok(pages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

async fn page_texts_blocking(
    backend: Arc<dyn PdfBackend>,
    data: Arc<[u8]>,
) -> Result<Vec<String>, BackendError> {
    tokio::task::spawn_blocking(move || backend.page_texts(&data))
        .await
        .map_err(|e| BackendError::ExtractionError(format!("extraction task failed: {e}")))?
}
