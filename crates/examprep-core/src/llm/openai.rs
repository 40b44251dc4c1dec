use serde_json::{Value, json};

use super::{GenerationError, GenerationFuture, TextGenerator, non_empty, read_json};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat completions.
pub struct OpenAi {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAi {
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
        format!("{}/v1/chat/completions", self.base_url)
    }
}

pub fn request_body(model: &str, prompt: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "max_tokens": max_tokens,
    })
}

pub fn parse_response(data: &Value) -> Result<String, GenerationError> {
    data["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GenerationError::InvalidResponse {
            backend: "OpenAI".into(),
            message: "no choices[0].message.content".into(),
        })
}

impl TextGenerator for OpenAi {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> GenerationFuture<'a, String> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&request_body(&self.model, prompt, max_tokens))
                .send()
                .await?;
            let data = read_json(self.name(), resp).await?;
            non_empty(self.name(), parse_response(&data)?)
        })
    }
}
