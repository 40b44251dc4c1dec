use std::time::Duration;

pub mod backend;
pub mod cache;
pub mod config_file;
pub mod extract;
pub mod llm;
pub mod prompt;
pub mod rate_limit;
pub mod session;
pub mod upload;
pub mod user_data;

// Re-export for convenience
pub use backend::{BackendError, OcrEngine, OcrError, PdfBackend};
pub use cache::{Fingerprint, OcrCache};
pub use config_file::ConfigError;
pub use extract::{ExtractError, ExtractedDocument, TextExtractor};
pub use llm::{BackendKind, GenerationError, TextGenerator, build_generator};
pub use prompt::{PromptBuilder, StudyTask};
pub use rate_limit::SlidingWindowLimiter;
pub use session::{Panel, SessionSettings, StudyError, StudySession};
pub use upload::{MAX_UPLOAD_BYTES, Upload};
pub use user_data::{HistoryEntry, UserDataError, UserDataStore};

/// Resolved configuration for one run of the study aid.
#[derive(Clone)]
pub struct Config {
    pub backend: BackendKind,
    /// Overrides the backend's default model when set.
    pub model: Option<String>,
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub hf_api_token: Option<String>,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub hosted_base_url: Option<String>,
    /// Runner invoked as `<local_command> run <model>` by the local backend.
    pub local_command: String,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    pub mcq_count: usize,
    pub rate_limit_max_calls: usize,
    pub rate_limit_period_secs: u64,
    pub ocr_dpi: u32,
    pub ocr_workers: usize,
    pub ocr_language: String,
    pub tesseract_command: String,
    pub ocr_timeout_secs: u64,
    pub chunk_chars: usize,
    pub max_chunks: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "***"))
            .field("hf_api_token", &self.hf_api_token.as_ref().map(|_| "***"))
            .field("openai_base_url", &self.openai_base_url)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("hosted_base_url", &self.hosted_base_url)
            .field("local_command", &self.local_command)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_tokens", &self.max_tokens)
            .field("mcq_count", &self.mcq_count)
            .field("rate_limit_max_calls", &self.rate_limit_max_calls)
            .field("rate_limit_period_secs", &self.rate_limit_period_secs)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("ocr_workers", &self.ocr_workers)
            .field("ocr_language", &self.ocr_language)
            .field("tesseract_command", &self.tesseract_command)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("chunk_chars", &self.chunk_chars)
            .field("max_chunks", &self.max_chunks)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model: None,
            openai_api_key: None,
            google_api_key: None,
            hf_api_token: None,
            openai_base_url: None,
            gemini_base_url: None,
            hosted_base_url: None,
            local_command: llm::local::DEFAULT_COMMAND.to_string(),
            request_timeout_secs: 60,
            max_tokens: 1000,
            mcq_count: 5,
            rate_limit_max_calls: 5,
            rate_limit_period_secs: 60,
            ocr_dpi: extract::DEFAULT_OCR_DPI,
            ocr_workers: extract::DEFAULT_OCR_WORKERS,
            ocr_language: "eng".to_string(),
            tesseract_command: "tesseract".to_string(),
            ocr_timeout_secs: 120,
            chunk_chars: prompt::DEFAULT_CHUNK_CHARS,
            max_chunks: prompt::DEFAULT_MAX_CHUNKS,
        }
    }
}

impl Config {
    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(self.rate_limit_period_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_tokens: self.max_tokens,
            mcq_count: self.mcq_count,
            rate_limit_max_calls: self.rate_limit_max_calls,
            rate_limit_period: self.rate_limit_period(),
            prompt: PromptBuilder::new(self.chunk_chars, self.max_chunks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_masks_keys() {
        let config = Config {
            openai_api_key: Some("sk-live-123".into()),
            hf_api_token: Some("hf_456".into()),
            ..Config::default()
        };
        let out = format!("{config:?}");
        assert!(!out.contains("sk-live-123"));
        assert!(!out.contains("hf_456"));
        assert!(out.contains("***"));
    }

    #[test]
    fn settings_follow_config() {
        let config = Config {
            mcq_count: 10,
            rate_limit_max_calls: 2,
            rate_limit_period_secs: 30,
            chunk_chars: 500,
            ..Config::default()
        };
        let settings = config.session_settings();
        assert_eq!(settings.mcq_count, 10);
        assert_eq!(settings.rate_limit_max_calls, 2);
        assert_eq!(settings.rate_limit_period, Duration::from_secs(30));
        assert_eq!(settings.prompt.chunk_chars, 500);
    }
}
