//! In-memory generator for tests and offline runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{GenerationError, GenerationFuture, TextGenerator};

/// Returns a fixed answer (or failure) and records every prompt it receives.
pub struct MockGenerator {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
    warm_ups: AtomicUsize,
}

impl MockGenerator {
    pub fn replying(answer: impl Into<String>) -> Self {
        Self {
            reply: Ok(answer.into()),
            prompts: Mutex::new(Vec::new()),
            warm_ups: AtomicUsize::new(0),
        }
    }

    /// Every call fails with an HTTP 500 carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            prompts: Mutex::new(Vec::new()),
            warm_ups: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn warm_ups(&self) -> usize {
        self.warm_ups.load(Ordering::Relaxed)
    }
}

impl TextGenerator for MockGenerator {
    fn name(&self) -> &str {
        "Mock"
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn generate<'a>(&'a self, prompt: &'a str, _max_tokens: u32) -> GenerationFuture<'a, String> {
        Box::pin(async move {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            match &self.reply {
                Ok(answer) => Ok(answer.clone()),
                Err(message) => Err(GenerationError::Http {
                    backend: self.name().to_string(),
                    status: 500,
                    message: message.clone(),
                }),
            }
        })
    }

    fn warm_up(&self) -> GenerationFuture<'_, ()> {
        Box::pin(async move {
            self.warm_ups.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}
