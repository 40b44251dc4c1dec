use serde_json::{Value, json};

use super::{GenerationError, GenerationFuture, TextGenerator, non_empty, read_json};

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";

/// Hugging Face serverless inference (text-generation task).
pub struct HostedInference {
    client: reqwest::Client,
    api_token: String,
    model: String,
    base_url: String,
}

impl HostedInference {
    pub fn new(client: reqwest::Client, api_token: String) -> Self {
        Self {
            client,
            api_token,
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
        format!("{}/models/{}", self.base_url, self.model)
    }

    async fn post(&self, body: &Value) -> Result<Value, GenerationError> {
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;
        read_json(self.name(), resp).await
    }
}

pub fn request_body(prompt: &str, max_tokens: u32) -> Value {
    json!({
        "inputs": prompt,
        "parameters": { "max_new_tokens": max_tokens, "return_full_text": false },
        "options": { "wait_for_model": true },
    })
}

/// Accepts both `[{"generated_text": ...}]` and `{"generated_text": ...}`.
pub fn parse_response(data: &Value) -> Result<String, GenerationError> {
    if let Some(msg) = data["error"].as_str() {
        return Err(GenerationError::InvalidResponse {
            backend: "Hosted inference".into(),
            message: msg.to_string(),
        });
    }
    data[0]["generated_text"]
        .as_str()
        .or_else(|| data["generated_text"].as_str())
        .map(str::to_string)
        .ok_or_else(|| GenerationError::InvalidResponse {
            backend: "Hosted inference".into(),
            message: "no generated_text".into(),
        })
}

impl TextGenerator for HostedInference {
    fn name(&self) -> &str {
        "Hosted inference"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> GenerationFuture<'a, String> {
        Box::pin(async move {
            let data = self.post(&request_body(prompt, max_tokens)).await?;
            non_empty(self.name(), parse_response(&data)?)
        })
    }

    /// A one-token request makes the provider load the model.
    fn warm_up(&self) -> GenerationFuture<'_, ()> {
        Box::pin(async move {
            self.post(&request_body("ping", 1)).await?;
            Ok(())
        })
    }
}
