//! Text-generation backends: hosted LLM APIs and a local model subprocess.

pub mod gemini;
pub mod hosted;
pub mod local;
pub mod mock;
pub mod openai;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::Config;
use crate::config_file::ConfigError;

/// Longest slice of an error body kept in messages.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("{backend} returned HTTP {status}: {message}")]
    Http {
        backend: String,
        status: u16,
        message: String,
    },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response from {backend}: {message}")]
    InvalidResponse { backend: String, message: String },
    #[error("{0} returned an empty answer")]
    EmptyResponse(String),
    #[error("{backend} timed out after {}s", .timeout.as_secs())]
    Timeout { backend: String, timeout: Duration },
    #[error("local model failed: {0}")]
    Process(String),
}

pub type GenerationFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GenerationError>> + Send + 'a>>;

/// A provider that turns a text prompt into generated text.
pub trait TextGenerator: Send + Sync {
    /// Display name, e.g. "OpenAI".
    fn name(&self) -> &str;

    /// Model identifier sent to the provider.
    fn model(&self) -> &str;

    /// Send `prompt` with an output budget of `max_tokens` and return the answer.
    fn generate<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> GenerationFuture<'a, String>;

    /// Prepare the backend for a first request (load a model, open a
    /// connection). Backends without such a step do nothing.
    fn warm_up(&self) -> GenerationFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Which provider to build. Chosen once, when configuration is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    OpenAi,
    Gemini,
    Local,
    Hosted,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::Gemini => "gemini",
            BackendKind::Local => "local",
            BackendKind::Hosted => "hosted",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(BackendKind::OpenAi),
            "gemini" | "google" => Ok(BackendKind::Gemini),
            "local" | "ollama" => Ok(BackendKind::Local),
            "hosted" | "hf" | "huggingface" => Ok(BackendKind::Hosted),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Build the configured generator. Missing credentials are reported here,
/// before any document is processed.
pub fn build_generator(config: &Config) -> Result<Arc<dyn TextGenerator>, ConfigError> {
    let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
    let generator: Arc<dyn TextGenerator> = match config.backend {
        BackendKind::OpenAi => {
            let key = require_key(&config.openai_api_key, "OpenAI", "OPENAI_API_KEY")?;
            let mut backend = openai::OpenAi::new(http_client(timeout), key);
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(url) = &config.openai_base_url {
                backend = backend.with_base_url(url);
            }
            Arc::new(backend)
        }
        BackendKind::Gemini => {
            let key = require_key(&config.google_api_key, "Gemini", "GOOGLE_API_KEY")?;
            let mut backend = gemini::Gemini::new(http_client(timeout), key);
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(url) = &config.gemini_base_url {
                backend = backend.with_base_url(url);
            }
            Arc::new(backend)
        }
        BackendKind::Hosted => {
            let key = require_key(&config.hf_api_token, "Hosted inference", "HF_API_TOKEN")?;
            let mut backend = hosted::HostedInference::new(http_client(timeout), key);
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(url) = &config.hosted_base_url {
                backend = backend.with_base_url(url);
            }
            Arc::new(backend)
        }
        BackendKind::Local => {
            let mut backend =
                local::LocalModel::new(&config.local_command).with_timeout(timeout);
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            Arc::new(backend)
        }
    };

    tracing::info!(
        backend = generator.name(),
        model = generator.model(),
        "text generation backend selected"
    );
    Ok(generator)
}

fn require_key(
    key: &Option<String>,
    backend: &'static str,
    var: &'static str,
) -> Result<String, ConfigError> {
    match key.as_deref().map(str::trim) {
        Some(k) if !k.is_empty() => Ok(k.to_string()),
        _ => Err(ConfigError::MissingApiKey { backend, var }),
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Read a JSON body, turning non-2xx statuses into [`GenerationError::Http`].
pub(crate) async fn read_json(
    backend: &str,
    resp: reqwest::Response,
) -> Result<serde_json::Value, GenerationError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(GenerationError::Http {
            backend: backend.to_string(),
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    serde_json::from_str(&body).map_err(|e| GenerationError::InvalidResponse {
        backend: backend.to_string(),
        message: format!("body is not JSON: {e}"),
    })
}

/// Pull a readable message out of an error body.
///
/// Providers wrap errors as `{"error": {"message": ...}}` or
/// `{"error": "..."}`; anything else is returned truncated.
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value["error"]["message"].as_str() {
            return msg.to_string();
        }
        if let Some(msg) = value["error"].as_str() {
            return msg.to_string();
        }
    }
    truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS)
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Trim the answer and reject empty output.
pub(crate) fn non_empty(backend: &str, text: String) -> Result<String, GenerationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(GenerationError::EmptyResponse(backend.to_string()))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("OpenAI".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert_eq!(" gemini ".parse::<BackendKind>().unwrap(), BackendKind::Gemini);
        assert_eq!("ollama".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("hf".parse::<BackendKind>().unwrap(), BackendKind::Hosted);
        assert!(matches!(
            "claude".parse::<BackendKind>(),
            Err(ConfigError::UnknownBackend(name)) if name == "claude"
        ));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = Config {
            backend: BackendKind::OpenAi,
            openai_api_key: None,
            ..Config::default()
        };
        match build_generator(&config) {
            Err(ConfigError::MissingApiKey { var, .. }) => assert_eq!(var, "OPENAI_API_KEY"),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("expected MissingApiKey"),
        }
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let config = Config {
            backend: BackendKind::Gemini,
            google_api_key: Some("   ".into()),
            ..Config::default()
        };
        assert!(matches!(
            build_generator(&config),
            Err(ConfigError::MissingApiKey { backend: "Gemini", .. })
        ));
    }

    #[test]
    fn builds_selected_backend_with_model_override() {
        let config = Config {
            backend: BackendKind::Hosted,
            hf_api_token: Some("hf_abc".into()),
            model: Some("google/flan-t5-large".into()),
            ..Config::default()
        };
        let generator = build_generator(&config).unwrap();
        assert_eq!(generator.name(), "Hosted inference");
        assert_eq!(generator.model(), "google/flan-t5-large");
    }

    #[test]
    fn local_backend_needs_no_key() {
        let config = Config {
            backend: BackendKind::Local,
            ..Config::default()
        };
        let generator = build_generator(&config).unwrap();
        assert_eq!(generator.name(), "Local model");
    }

    #[test]
    fn error_message_reads_envelopes() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#),
            "Incorrect API key provided"
        );
        assert_eq!(
            error_message(r#"{"error":"Model is currently loading","estimated_time":20.0}"#),
            "Model is currently loading"
        );
        assert_eq!(error_message("  Bad Gateway  "), "Bad Gateway");
    }

    #[test]
    fn error_message_truncates_long_bodies() {
        let body = "x".repeat(MAX_ERROR_BODY_CHARS + 50);
        let msg = error_message(&body);
        assert_eq!(msg.chars().count(), MAX_ERROR_BODY_CHARS + 3);
        assert!(msg.ends_with("..."));
    }

    #[tokio::test]
    async fn read_json_maps_status_errors() {
        let http_resp = http::Response::builder()
            .status(401)
            .body(r#"{"error":{"message":"invalid key"}}"#)
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        match read_json("OpenAI", resp).await {
            Err(GenerationError::Http { status, message, .. }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid key");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_json_rejects_non_json() {
        let http_resp = http::Response::builder()
            .status(200)
            .body("<html>proxy page</html>")
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        assert!(matches!(
            read_json("Gemini", resp).await,
            Err(GenerationError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn non_empty_trims() {
        assert_eq!(non_empty("X", "  answer \n".into()).unwrap(), "answer");
        assert!(matches!(
            non_empty("X", " \n".into()),
            Err(GenerationError::EmptyResponse(_))
        ));
    }
}
