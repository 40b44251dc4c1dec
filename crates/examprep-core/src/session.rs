//! Per-user interaction state: the OCR cache, the request limiter and the
//! background warm-up task all live here instead of in process globals.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::OcrCache;
use crate::extract::{ExtractError, ExtractedDocument, TextExtractor};
use crate::llm::{GenerationError, TextGenerator};
use crate::prompt::{PromptBuilder, StudyTask};
use crate::rate_limit::SlidingWindowLimiter;
use crate::upload::Upload;

/// Marker prefixed to every message shown in place of a result.
pub const WARNING_MARKER: &str = "⚠️";

#[derive(Error, Debug)]
pub enum StudyError {
    #[error(
        "rate limit reached ({max_calls} requests per {}s), try again in {}s",
        .period.as_secs(),
        .retry_after.as_secs().max(1)
    )]
    RateLimited {
        max_calls: usize,
        period: Duration,
        retry_after: Duration,
    },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

/// Knobs that shape a session's requests.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_tokens: u32,
    pub mcq_count: usize,
    pub rate_limit_max_calls: usize,
    pub rate_limit_period: Duration,
    pub prompt: PromptBuilder,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            mcq_count: 5,
            rate_limit_max_calls: 5,
            rate_limit_period: Duration::from_secs(60),
            prompt: PromptBuilder::default(),
        }
    }
}

/// What the user sees for one action: a result or a warning in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Panel {
    Content { title: String, body: String },
    Warning(String),
}

impl Panel {
    pub fn warning(err: &dyn std::fmt::Display) -> Self {
        Panel::Warning(format!("{WARNING_MARKER} {err}"))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Panel::Warning(_))
    }

    pub fn body(&self) -> &str {
        match self {
            Panel::Content { body, .. } => body,
            Panel::Warning(message) => message,
        }
    }
}

struct WarmUp {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct StudySession {
    extractor: Arc<TextExtractor>,
    generator: Arc<dyn TextGenerator>,
    settings: SessionSettings,
    cache: OcrCache,
    limiter: Mutex<SlidingWindowLimiter>,
    warm_up: Mutex<Option<WarmUp>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StudySession {
    pub fn new(
        extractor: Arc<TextExtractor>,
        generator: Arc<dyn TextGenerator>,
        settings: SessionSettings,
    ) -> Self {
        let limiter =
            SlidingWindowLimiter::new(settings.rate_limit_max_calls, settings.rate_limit_period);
        Self {
            extractor,
            generator,
            settings,
            cache: OcrCache::new(),
            limiter: Mutex::new(limiter),
            warm_up: Mutex::new(None),
        }
    }

    pub fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn cache(&self) -> &OcrCache {
        &self.cache
    }

    /// Requests still available in the current window.
    pub fn remaining_requests(&self) -> usize {
        lock(&self.limiter).remaining()
    }

    // ── warm-up ──

    /// Spawn the generator's warm-up in the background. Any warm-up already
    /// running is cancelled first. Must be called inside a tokio runtime.
    pub fn start_warm_up(&self) {
        self.cancel_warm_up();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let generator = Arc::clone(&self.generator);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(backend = generator.name(), "warm-up cancelled");
                }
                result = generator.warm_up() => match result {
                    Ok(()) => tracing::debug!(
                        backend = generator.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "warm-up finished"
                    ),
                    Err(e) => tracing::warn!(backend = generator.name(), error = %e, "warm-up failed"),
                },
            }
        });

        *lock(&self.warm_up) = Some(WarmUp { cancel, handle });
    }

    /// Wait for a running warm-up to finish. Returns `false` if none was running.
    pub async fn finish_warm_up(&self) -> bool {
        let Some(warm_up) = lock(&self.warm_up).take() else {
            return false;
        };
        if let Err(e) = warm_up.handle.await {
            tracing::warn!(error = %e, "warm-up task did not complete");
        }
        true
    }

    /// Cancel a running warm-up without waiting for it.
    pub fn cancel_warm_up(&self) {
        if let Some(warm_up) = lock(&self.warm_up).take() {
            warm_up.cancel.cancel();
        }
    }

    pub fn is_warming_up(&self) -> bool {
        lock(&self.warm_up)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    // ── typed operations ──

    pub async fn load_document(
        &self,
        upload: &Upload,
        use_ocr: bool,
    ) -> Result<ExtractedDocument, ExtractError> {
        tracing::debug!(name = %upload.name, bytes = upload.len(), use_ocr, "loading document");
        self.extractor.extract(&upload.bytes, use_ocr, &self.cache).await
    }

    pub async fn recognize_image(&self, upload: &Upload) -> Result<String, ExtractError> {
        self.extractor.recognize_image(&upload.bytes).await
    }

    /// Check the limiter, then send exactly one generation request.
    pub async fn generate(
        &self,
        doc: &ExtractedDocument,
        task: StudyTask,
    ) -> Result<String, StudyError> {
        self.acquire()?;

        let prompt = self.settings.prompt.build(task, &doc.text);
        let started = Instant::now();
        let answer = self
            .generator
            .generate(&prompt, self.settings.max_tokens)
            .await?;
        tracing::info!(
            backend = self.generator.name(),
            task = task.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = answer.len(),
            "generation finished"
        );
        Ok(answer)
    }

    pub async fn notes(&self, doc: &ExtractedDocument) -> Result<String, StudyError> {
        self.generate(doc, StudyTask::Notes).await
    }

    pub async fn mcqs(&self, doc: &ExtractedDocument) -> Result<String, StudyError> {
        self.generate(
            doc,
            StudyTask::Mcqs {
                count: self.settings.mcq_count,
            },
        )
        .await
    }

    fn acquire(&self) -> Result<(), StudyError> {
        let mut limiter = lock(&self.limiter);
        let now = Instant::now();
        if limiter.allow_at(now) {
            return Ok(());
        }
        let retry_after = limiter.retry_after_at(now).unwrap_or(limiter.period());
        tracing::warn!(
            max_calls = limiter.max_calls(),
            retry_after_secs = retry_after.as_secs(),
            "request rejected by rate limiter"
        );
        Err(StudyError::RateLimited {
            max_calls: limiter.max_calls(),
            period: limiter.period(),
            retry_after,
        })
    }

    // ── display boundary ──

    pub async fn extract_panel(&self, upload: &Upload, use_ocr: bool) -> Panel {
        extraction_panel(&self.extractor, &self.cache, upload, use_ocr).await
    }

    pub async fn task_panel(&self, doc: &ExtractedDocument, task: StudyTask) -> Panel {
        match self.generate(doc, task).await {
            Ok(body) => Panel::Content {
                title: task.title().to_string(),
                body,
            },
            Err(e) => Panel::warning(&e),
        }
    }

    pub async fn notes_panel(&self, upload: &Upload, use_ocr: bool) -> Panel {
        self.load_then(upload, use_ocr, StudyTask::Notes).await
    }

    pub async fn mcqs_panel(&self, upload: &Upload, use_ocr: bool) -> Panel {
        let task = StudyTask::Mcqs {
            count: self.settings.mcq_count,
        };
        self.load_then(upload, use_ocr, task).await
    }

    pub async fn image_panel(&self, upload: &Upload) -> Panel {
        recognition_panel(&self.extractor, upload).await
    }

    async fn load_then(&self, upload: &Upload, use_ocr: bool, task: StudyTask) -> Panel {
        match self.load_document(upload, use_ocr).await {
            Ok(doc) => self.task_panel(&doc, task).await,
            Err(e) => Panel::warning(&e),
        }
    }
}

/// Extraction result as a panel. Needs no text generator, so front ends can
/// offer it before any backend is configured.
pub async fn extraction_panel(
    extractor: &TextExtractor,
    cache: &OcrCache,
    upload: &Upload,
    use_ocr: bool,
) -> Panel {
    match extractor.extract(&upload.bytes, use_ocr, cache).await {
        Ok(doc) => Panel::Content {
            title: "Extracted Text".to_string(),
            body: doc.text,
        },
        Err(e) => Panel::warning(&e),
    }
}

pub async fn recognition_panel(extractor: &TextExtractor, upload: &Upload) -> Panel {
    match extractor.recognize_image(&upload.bytes).await {
        Ok(body) => Panel::Content {
            title: "Recognized Text".to_string(),
            body,
        },
        Err(e) => Panel::warning(&e),
    }
}

impl Drop for StudySession {
    fn drop(&mut self) {
        self.cancel_warm_up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, PdfBackend};
    use crate::llm::GenerationFuture;
    use crate::llm::mock::MockGenerator;

    struct OnePage;

    impl PdfBackend for OnePage {
        fn name(&self) -> &str {
            "one-page"
        }

        fn page_texts(&self, _bytes: &[u8]) -> Result<Vec<String>, BackendError> {
            Ok(vec!["Mitochondria make ATP.".to_string()])
        }
    }

    fn session_with(generator: Arc<dyn TextGenerator>, settings: SessionSettings) -> StudySession {
        let extractor = Arc::new(TextExtractor::new(Arc::new(OnePage)));
        StudySession::new(extractor, generator, settings)
    }

    fn pdf() -> Upload {
        Upload::new("cells.pdf", b"%PDF-1.7\n...".to_vec())
    }

    #[tokio::test]
    async fn notes_sends_one_request_with_material() {
        let mock = Arc::new(MockGenerator::replying("## Cells"));
        let session = session_with(mock.clone(), SessionSettings::default());
        let doc = session.load_document(&pdf(), false).await.unwrap();

        assert_eq!(session.notes(&doc).await.unwrap(), "## Cells");
        assert_eq!(mock.calls(), 1);
        assert!(mock.prompts()[0].contains("Mitochondria make ATP."));
    }

    #[tokio::test]
    async fn mcqs_use_configured_count() {
        let mock = Arc::new(MockGenerator::replying("Q1"));
        let settings = SessionSettings {
            mcq_count: 8,
            ..SessionSettings::default()
        };
        let session = session_with(mock.clone(), settings);
        let doc = session.load_document(&pdf(), false).await.unwrap();
        session.mcqs(&doc).await.unwrap();
        assert!(mock.prompts()[0].contains("Create 8 multiple-choice questions"));
    }

    #[tokio::test]
    async fn rate_limited_request_never_reaches_backend() {
        let mock = Arc::new(MockGenerator::replying("ok"));
        let settings = SessionSettings {
            rate_limit_max_calls: 2,
            ..SessionSettings::default()
        };
        let session = session_with(mock.clone(), settings);
        let doc = session.load_document(&pdf(), false).await.unwrap();

        session.notes(&doc).await.unwrap();
        session.notes(&doc).await.unwrap();
        let err = session.notes(&doc).await.unwrap_err();
        assert!(matches!(err, StudyError::RateLimited { max_calls: 2, .. }));
        assert_eq!(mock.calls(), 2);
        assert_eq!(session.remaining_requests(), 0);
    }

    #[tokio::test]
    async fn failures_become_warning_panels() {
        let mock = Arc::new(MockGenerator::failing("upstream exploded"));
        let session = session_with(mock, SessionSettings::default());

        let panel = session.notes_panel(&pdf(), false).await;
        assert!(panel.is_warning());
        assert!(panel.body().starts_with(WARNING_MARKER));
        assert!(panel.body().contains("upstream exploded"));

        let panel = session
            .extract_panel(&Upload::new("notes.pdf", b"plain text".to_vec()), false)
            .await;
        assert!(panel.body().contains("not a valid PDF"));
    }

    #[tokio::test]
    async fn content_panels_carry_titles() {
        let session = session_with(
            Arc::new(MockGenerator::replying("A) B) C) D)")),
            SessionSettings::default(),
        );
        assert_eq!(
            session.mcqs_panel(&pdf(), false).await,
            Panel::Content {
                title: "Multiple-Choice Questions".into(),
                body: "A) B) C) D)".into(),
            }
        );
        assert_eq!(
            session.extract_panel(&pdf(), false).await,
            Panel::Content {
                title: "Extracted Text".into(),
                body: "Mitochondria make ATP.".into(),
            }
        );
    }

    #[tokio::test]
    async fn image_panel_without_ocr_warns() {
        let session = session_with(Arc::new(MockGenerator::replying("x")), SessionSettings::default());
        let png = Upload::new("scan.png", b"\x89PNG\r\n\x1a\nrest".to_vec());
        let panel = session.image_panel(&png).await;
        assert!(panel.is_warning());
    }

    // ── warm-up ──

    #[tokio::test]
    async fn warm_up_runs_and_joins() {
        let mock = Arc::new(MockGenerator::replying("x"));
        let session = session_with(mock.clone(), SessionSettings::default());
        session.start_warm_up();
        assert!(session.finish_warm_up().await);
        assert_eq!(mock.warm_ups(), 1);
        assert!(!session.finish_warm_up().await);
    }

    struct SlowWarmUp;

    impl TextGenerator for SlowWarmUp {
        fn name(&self) -> &str {
            "slow"
        }

        fn model(&self) -> &str {
            "slow"
        }

        fn generate<'a>(&'a self, _prompt: &'a str, _max_tokens: u32) -> GenerationFuture<'a, String> {
            Box::pin(async { Ok("answer".to_string()) })
        }

        fn warm_up(&self) -> GenerationFuture<'_, ()> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn warm_up_can_be_cancelled() {
        let session = session_with(Arc::new(SlowWarmUp), SessionSettings::default());
        session.start_warm_up();
        assert!(session.is_warming_up());
        session.cancel_warm_up();
        assert!(!session.is_warming_up());
        assert!(!session.finish_warm_up().await);
    }

    #[tokio::test]
    async fn restarting_warm_up_replaces_previous() {
        let session = session_with(Arc::new(SlowWarmUp), SessionSettings::default());
        session.start_warm_up();
        session.start_warm_up();
        session.cancel_warm_up();
        // Generation does not wait on warm-up.
        let doc = session.load_document(&pdf(), false).await.unwrap();
        assert_eq!(session.notes(&doc).await.unwrap(), "answer");
    }
}
