use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Config;
use crate::llm::BackendKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{backend} needs an API key; set {var} or add it to the config file")]
    MissingApiKey {
        backend: &'static str,
        var: &'static str,
    },
    #[error("unknown backend '{0}' (expected openai, gemini, local or hosted)")]
    UnknownBackend(String),
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api_keys: Option<ApiKeysConfig>,
    pub generation: Option<GenerationConfig>,
    pub limits: Option<LimitsConfig>,
    pub ocr: Option<OcrConfig>,
    pub prompt: Option<PromptConfig>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub hf_api_token: Option<String>,
}

impl std::fmt::Debug for ApiKeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeysConfig")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "***"))
            .field("hf_api_token", &self.hf_api_token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub backend: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub mcq_count: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub hosted_base_url: Option<String>,
    pub local_command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_calls: Option<usize>,
    pub period_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrConfig {
    pub dpi: Option<u32>,
    pub workers: Option<usize>,
    pub language: Option<String>,
    pub tesseract_command: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    pub chunk_chars: Option<usize>,
    pub max_chunks: Option<usize>,
}

/// Platform config directory path: `<config_dir>/examprep/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("examprep").join("config.toml"))
}

/// Load config by cascading CWD `.examprep.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".examprep.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (b, o) = (&base, &overlay);
    ConfigFile {
        api_keys: Some(ApiKeysConfig {
            openai_api_key: pick(&o.api_keys, &b.api_keys, |a| a.openai_api_key.clone()),
            google_api_key: pick(&o.api_keys, &b.api_keys, |a| a.google_api_key.clone()),
            hf_api_token: pick(&o.api_keys, &b.api_keys, |a| a.hf_api_token.clone()),
        }),
        generation: Some(GenerationConfig {
            backend: pick(&o.generation, &b.generation, |g| g.backend.clone()),
            model: pick(&o.generation, &b.generation, |g| g.model.clone()),
            max_tokens: pick(&o.generation, &b.generation, |g| g.max_tokens),
            mcq_count: pick(&o.generation, &b.generation, |g| g.mcq_count),
            request_timeout_secs: pick(&o.generation, &b.generation, |g| g.request_timeout_secs),
            openai_base_url: pick(&o.generation, &b.generation, |g| g.openai_base_url.clone()),
            gemini_base_url: pick(&o.generation, &b.generation, |g| g.gemini_base_url.clone()),
            hosted_base_url: pick(&o.generation, &b.generation, |g| g.hosted_base_url.clone()),
            local_command: pick(&o.generation, &b.generation, |g| g.local_command.clone()),
        }),
        limits: Some(LimitsConfig {
            max_calls: pick(&o.limits, &b.limits, |l| l.max_calls),
            period_secs: pick(&o.limits, &b.limits, |l| l.period_secs),
        }),
        ocr: Some(OcrConfig {
            dpi: pick(&o.ocr, &b.ocr, |c| c.dpi),
            workers: pick(&o.ocr, &b.ocr, |c| c.workers),
            language: pick(&o.ocr, &b.ocr, |c| c.language.clone()),
            tesseract_command: pick(&o.ocr, &b.ocr, |c| c.tesseract_command.clone()),
            timeout_secs: pick(&o.ocr, &b.ocr, |c| c.timeout_secs),
        }),
        prompt: Some(PromptConfig {
            chunk_chars: pick(&o.prompt, &b.prompt, |p| p.chunk_chars),
            max_chunks: pick(&o.prompt, &b.prompt, |p| p.max_chunks),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Build a [`Config`] from defaults, then the config file, then the
/// environment (looked up through `env`). Command-line overrides are
/// applied by the caller afterwards.
pub fn resolve(
    file: &ConfigFile,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    if let Some(keys) = &file.api_keys {
        config.openai_api_key = keys.openai_api_key.clone();
        config.google_api_key = keys.google_api_key.clone();
        config.hf_api_token = keys.hf_api_token.clone();
    }
    if let Some(g) = &file.generation {
        if let Some(backend) = &g.backend {
            config.backend = backend.parse()?;
        }
        config.model = g.model.clone();
        config.max_tokens = g.max_tokens.unwrap_or(config.max_tokens);
        config.mcq_count = g.mcq_count.unwrap_or(config.mcq_count);
        config.request_timeout_secs = g.request_timeout_secs.unwrap_or(config.request_timeout_secs);
        config.openai_base_url = g.openai_base_url.clone();
        config.gemini_base_url = g.gemini_base_url.clone();
        config.hosted_base_url = g.hosted_base_url.clone();
        if let Some(cmd) = &g.local_command {
            config.local_command = cmd.clone();
        }
    }
    if let Some(l) = &file.limits {
        config.rate_limit_max_calls = l.max_calls.unwrap_or(config.rate_limit_max_calls);
        config.rate_limit_period_secs = l.period_secs.unwrap_or(config.rate_limit_period_secs);
    }
    if let Some(o) = &file.ocr {
        config.ocr_dpi = o.dpi.unwrap_or(config.ocr_dpi);
        config.ocr_workers = o.workers.unwrap_or(config.ocr_workers);
        if let Some(lang) = &o.language {
            config.ocr_language = lang.clone();
        }
        if let Some(cmd) = &o.tesseract_command {
            config.tesseract_command = cmd.clone();
        }
        config.ocr_timeout_secs = o.timeout_secs.unwrap_or(config.ocr_timeout_secs);
    }
    if let Some(p) = &file.prompt {
        config.chunk_chars = p.chunk_chars.unwrap_or(config.chunk_chars);
        config.max_chunks = p.max_chunks.unwrap_or(config.max_chunks);
    }

    let non_blank = |var: &str| env(var).filter(|v| !v.trim().is_empty());
    if let Some(key) = non_blank("OPENAI_API_KEY") {
        config.openai_api_key = Some(key);
    }
    if let Some(key) = non_blank("GOOGLE_API_KEY").or_else(|| non_blank("GEMINI_API_KEY")) {
        config.google_api_key = Some(key);
    }
    if let Some(key) = non_blank("HF_API_TOKEN") {
        config.hf_api_token = Some(key);
    }
    if let Some(backend) = non_blank("AI_BACKEND") {
        config.backend = backend.parse::<BackendKind>()?;
    }
    if let Some(model) = non_blank("MODEL_NAME") {
        config.model = Some(model);
    }
    if let Some(count) = non_blank("MCQ_COUNT") {
        config.mcq_count = count
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "MCQ_COUNT".into(),
                value: count.clone(),
            })?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn partial_toml_parses() {
        let toml_str = "[generation]\nbackend = \"gemini\"\nmcq_count = 8\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        let generation = parsed.generation.unwrap();
        assert_eq!(generation.backend.as_deref(), Some("gemini"));
        assert_eq!(generation.mcq_count, Some(8));
        assert!(parsed.limits.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            limits: Some(LimitsConfig {
                max_calls: Some(5),
                period_secs: Some(60),
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            limits: Some(LimitsConfig {
                max_calls: Some(10),
                period_secs: None,
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay).limits.unwrap();
        assert_eq!(merged.max_calls, Some(10));
        assert_eq!(merged.period_secs, Some(60));
    }

    #[test]
    fn merge_base_preserved_when_overlay_absent() {
        let base = ConfigFile {
            ocr: Some(OcrConfig {
                language: Some("deu".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, ConfigFile::default());
        assert_eq!(merged.ocr.unwrap().language.as_deref(), Some("deu"));
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = resolve(&ConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.backend, BackendKind::OpenAi);
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.mcq_count, 5);
        assert_eq!(config.rate_limit_max_calls, 5);
        assert_eq!(config.rate_limit_period_secs, 60);
        assert_eq!(config.ocr_dpi, 200);
        assert_eq!(config.ocr_timeout_secs, 120);
    }

    #[test]
    fn ocr_timeout_from_file() {
        let file: ConfigFile = toml::from_str("[ocr]\ntimeout_secs = 30\n").unwrap();
        let config = resolve(&file, env_from(&[])).unwrap();
        assert_eq!(config.ocr_timeout_secs, 30);
    }

    #[test]
    fn env_overrides_file() {
        let file = ConfigFile {
            api_keys: Some(ApiKeysConfig {
                openai_api_key: Some("from-file".into()),
                ..Default::default()
            }),
            generation: Some(GenerationConfig {
                backend: Some("local".into()),
                mcq_count: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = resolve(
            &file,
            env_from(&[
                ("OPENAI_API_KEY", "from-env"),
                ("AI_BACKEND", "openai"),
                ("MCQ_COUNT", "9"),
            ]),
        )
        .unwrap();
        assert_eq!(config.openai_api_key.as_deref(), Some("from-env"));
        assert_eq!(config.backend, BackendKind::OpenAi);
        assert_eq!(config.mcq_count, 9);
    }

    #[test]
    fn gemini_key_alias_and_blank_env_ignored() {
        let config = resolve(
            &ConfigFile::default(),
            env_from(&[("GOOGLE_API_KEY", "  "), ("GEMINI_API_KEY", "g-key")]),
        )
        .unwrap();
        assert_eq!(config.google_api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(matches!(
            resolve(&ConfigFile::default(), env_from(&[("MCQ_COUNT", "many")])),
            Err(ConfigError::InvalidValue { key, .. }) if key == "MCQ_COUNT"
        ));
        assert!(matches!(
            resolve(&ConfigFile::default(), env_from(&[("AI_BACKEND", "claude")])),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn save_then_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ConfigFile {
            prompt: Some(PromptConfig {
                chunk_chars: Some(1500),
                max_chunks: None,
            }),
            ..Default::default()
        };
        save_to_path(&config, &path).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded.prompt.unwrap().chunk_chars, Some(1500));
    }

    #[test]
    fn unparsable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [not toml").unwrap();
        assert!(load_from_path(&path).is_none());
    }

    #[test]
    fn api_keys_are_masked_in_debug() {
        let keys = ApiKeysConfig {
            openai_api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let out = format!("{keys:?}");
        assert!(!out.contains("sk-secret"));
        assert!(out.contains("***"));
    }
}
