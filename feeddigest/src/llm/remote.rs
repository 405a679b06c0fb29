use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{LlmProvider, LlmRequest, LlmResponse, ModelParams, UsageMetadata};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct RemoteLlmProvider {
    endpoint: String,
    api_key: String,
    model: String,
    params: ModelParams,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            params: ModelParams::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Parameters used when a request leaves them unset.
    pub fn with_params(mut self, params: &ModelParams) -> Self {
        self.params = params.clone();
        self
    }

    /// Build from the `[llm]` section, reading the API key from the configured env var.
    pub fn from_config(cfg: &common::LlmConfig) -> Result<Self> {
        let key_var = cfg.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        let api_key = std::env::var(key_var).with_context(|| format!("LLM API key env var '{}' not set", key_var))?;

        Ok(Self::new(
            cfg.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
            api_key,
            cfg.model.as_deref().unwrap_or(DEFAULT_MODEL),
        )
        .with_params(&ModelParams::from(cfg)))
    }

    async fn send_chat(&self, body: &ChatRequest<'_>) -> Result<ChatResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("LLM HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, text);
        }

        response.json::<ChatResponse>().await.context("Failed to parse LLM response")
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = Duration::from_secs(request.timeout_seconds.unwrap_or(self.params.timeout_seconds));

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: &request.prompt });

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.params.max_tokens),
            temperature: request.temperature.unwrap_or(self.params.temperature),
        };

        debug!(model = %self.model, prompt_chars = request.prompt.chars().count(), "sending chat completion");
        // Headers and body share one budget
        let reply = tokio::time::timeout(timeout, self.send_chat(&body))
            .await
            .context("LLM request timed out")??;

        let content = reply
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?
            .message
            .content
            .context("LLM response message has no content")?;

        let usage = reply
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LlmResponse { content, usage, model: reply.model.unwrap_or_else(|| self.model.clone()) })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}
