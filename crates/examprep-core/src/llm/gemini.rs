use serde_json::{Value, json};

use super::{GenerationError, GenerationFuture, TextGenerator, non_empty, read_json};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Google Gemini `generateContent`.
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Gemini {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

pub fn request_body(prompt: &str, max_tokens: u32) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": { "maxOutputTokens": max_tokens },
    })
}

/// Join the text parts of the first candidate.
pub fn parse_response(data: &Value) -> Result<String, GenerationError> {
    if let Some(reason) = data["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::InvalidResponse {
            backend: "Gemini".into(),
            message: format!("prompt blocked ({reason})"),
        });
    }

    let parts = data["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| GenerationError::InvalidResponse {
            backend: "Gemini".into(),
            message: "no candidates[0].content.parts".into(),
        })?;

    Ok(parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join(""))
}

impl TextGenerator for Gemini {
    fn name(&self) -> &str {
        "Gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> GenerationFuture<'a, String> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .json(&request_body(prompt, max_tokens))
                .send()
                .await?;
            let data = read_json(self.name(), resp).await?;
            non_empty(self.name(), parse_response(&data)?)
        })
    }
}
