//! OpenAI-compatible chat completions backend.
//!
//! Works against any gateway exposing `/chat/completions` (LiteLLM, vLLM,
//! OpenAI itself).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{SummarizeError, SummarizeResult, SummaryBackend};
use crate::config::SummarizeSettings;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Summary backend calling a chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsBackend {
    /// Create a backend.
    ///
    /// # Arguments
    /// * `endpoint` - Base URL, e.g. "http://localhost:4000/v1"
    /// * `api_key` - Optional bearer token
    /// * `model` - Model name passed through to the gateway
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    /// Returns `SummarizeError::ConfigError` if the HTTP client cannot be built
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> SummarizeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SummarizeError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature: 0.1,
            max_tokens: 2000,
        })
    }

    /// Build a backend from configuration, reading the key from the named
    /// environment variable if one is configured.
    pub fn from_settings(settings: &SummarizeSettings) -> SummarizeResult<Self> {
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Ok(Self::new(
            &settings.endpoint,
            api_key,
            &settings.model,
            Duration::from_secs(settings.timeout_secs),
        )?
        .with_sampling(settings.temperature, settings.max_tokens))
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl SummaryBackend for ChatCompletionsBackend {
    async fn complete(&self, system: &str, user: &str) -> SummarizeResult<String> {
        let url = format!("{}/chat/completions", self.endpoint);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SummarizeError::BackendError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::BackendError(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::BackendError(format!("Malformed response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| SummarizeError::BackendError("Empty response".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
