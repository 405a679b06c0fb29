use anyhow::Result;

/// Core trait for summarization backends.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a role-tagged prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Model identity, for logging
    fn model(&self) -> &str;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Sent as the `system` role message when present
    pub system: Option<String>,
    /// Sent as the `user` role message
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Fixed model parameters, configured once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_seconds: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self { temperature: 0.5, max_tokens: 2000, timeout_seconds: 60 }
    }
}

impl From<&common::LlmConfig> for ModelParams {
    fn from(cfg: &common::LlmConfig) -> Self {
        let defaults = ModelParams::default();
        Self {
            temperature: cfg.temperature.unwrap_or(defaults.temperature),
            max_tokens: cfg.max_tokens.unwrap_or(defaults.max_tokens),
            timeout_seconds: cfg.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        }
    }
}

/// Provider used when `llm.adapter = "none"`: every call fails, so digests are always the plain listing.
pub struct DisabledProvider;

#[async_trait::async_trait]
impl LlmProvider for DisabledProvider {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
        anyhow::bail!("summarization is disabled (llm.adapter = \"none\")")
    }

    fn model(&self) -> &str {
        "none"
    }
}

pub mod remote;
