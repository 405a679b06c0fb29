use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::AggregationOutcome;
use crate::llm::{LlmProvider, LlmRequest, ModelParams};
use crate::normalize::{NewsItem, PromptItem};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for crypto and market news digests.";

pub const DEFAULT_INSTRUCTIONS: &str = "You are a news editor writing for a Telegram channel.\n\
The input is a JSON array of recent news items.\n\
Your task: pick up to 10 of the most important items and write a single HTML post for Telegram.\n\n\
Formatting rules:\n\
1) Use ONLY these HTML tags: <b>, <i>, <u>, <code>, <a href=\"URL\">.\n   \
Do NOT use <br>, <div>, <p>, <span>.\n\
2) Use plain newlines for line breaks.\n\
3) For each item:\n   \
- <b>Headline</b>\n   \
- A short explanation (1-2 sentences)\n   \
- <a href=\"URL\">Read more</a>\n   \
- An empty line\n\
4) Finish with a short market overview (2-3 sentences).\n\
5) Return ONLY the text of the post, no JSON and no commentary.";

/// Exactly one of these is produced per digest request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestResult {
    /// No items survived aggregation. Not an error.
    Empty,
    /// Model output, verbatim.
    Generated(String),
    /// Local listing used when summarization failed.
    Fallback { items: Vec<FallbackEntry>, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackEntry {
    pub title: String,
    pub source: String,
    pub link: Option<String>,
}

/// Prompt and fallback shaping. Fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct DigestSettings {
    pub system_prompt: String,
    pub instructions: String,
    /// Items serialized into the prompt
    pub max_prompt_items: usize,
    /// Items listed by the fallback
    pub fallback_items: usize,
    pub include_links: bool,
    /// Output language appended to the instructions, e.g. "Russian"
    pub language: Option<String>,
    pub params: ModelParams,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_prompt_items: common::DEFAULT_TOTAL_ITEMS,
            fallback_items: 10,
            include_links: true,
            language: None,
            params: ModelParams::default(),
        }
    }
}

impl DigestSettings {
    pub fn from_config(cfg: &common::Config) -> Self {
        let defaults = DigestSettings::default();
        let digest = cfg.digest.clone().unwrap_or_default();
        Self {
            system_prompt: digest.system_prompt.unwrap_or(defaults.system_prompt),
            instructions: digest.instructions.unwrap_or(defaults.instructions),
            max_prompt_items: cfg.aggregation_settings().total_items,
            fallback_items: digest.fallback_items.unwrap_or(defaults.fallback_items),
            include_links: digest.include_links.unwrap_or(defaults.include_links),
            language: digest.language.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            params: cfg.llm.as_ref().map(ModelParams::from).unwrap_or_default(),
        }
    }
}

/// Digest Generator: one summarization attempt per request, local fallback on any failure.
pub struct DigestGenerator {
    provider: Arc<dyn LlmProvider>,
    settings: DigestSettings,
}

impl DigestGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: DigestSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &DigestSettings {
        &self.settings
    }

    /// Configured instructions, plus the output-language rule when one is set.
    pub fn instructions(&self) -> String {
        match &self.settings.language {
            Some(language) => format!(
                "{}\nWrite the whole post in {}, translating headlines and explanations; keep URLs unchanged.",
                self.settings.instructions.trim_end(),
                language
            ),
            None => self.settings.instructions.clone(),
        }
    }

    pub async fn generate(&self, outcome: &AggregationOutcome) -> DigestResult {
        if outcome.is_empty() {
            return DigestResult::Empty;
        }

        let request = LlmRequest {
            system: Some(self.settings.system_prompt.clone()),
            prompt: build_prompt(&self.instructions(), &outcome.items, self.settings.max_prompt_items),
            max_tokens: Some(self.settings.params.max_tokens),
            temperature: Some(self.settings.params.temperature),
            timeout_seconds: Some(self.settings.params.timeout_seconds),
        };

        info!(model = self.provider.model(), items = outcome.items.len(), "requesting digest");
        match self.provider.generate(request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                info!(
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    "digest generated"
                );
                DigestResult::Generated(response.content)
            }
            Ok(_) => {
                warn!("LLM returned an empty digest, falling back to plain listing");
                self.fallback(&outcome.items, "empty response".to_string())
            }
            Err(e) => {
                warn!("LLM digest failed: {:#}, falling back to plain listing", e);
                self.fallback(&outcome.items, format!("{:#}", e))
            }
        }
    }

    fn fallback(&self, items: &[NewsItem], reason: String) -> DigestResult {
        DigestResult::Fallback {
            items: fallback_list(items, self.settings.fallback_items, self.settings.include_links),
            reason,
        }
    }
}

/// Instructions followed by the JSON item list, capped at `max_items`.
pub fn build_prompt(instructions: &str, items: &[NewsItem], max_items: usize) -> String {
    let prompt_items: Vec<PromptItem<'_>> = items.iter().take(max_items).map(PromptItem::from).collect();
    // Serializing borrowed strings cannot fail
    let json = serde_json::to_string_pretty(&prompt_items).unwrap_or_else(|_| "[]".to_string());
    format!("{}\n\nNews items (JSON):\n{}", instructions.trim_end(), json)
}

pub fn fallback_list(items: &[NewsItem], limit: usize, include_links: bool) -> Vec<FallbackEntry> {
    items
        .iter()
        .take(limit)
        .map(|item| FallbackEntry {
            title: item.title.clone(),
            source: item.source.clone(),
            link: include_links.then(|| item.link.clone()),
        })
        .collect()
}

/// Render a fallback listing as Telegram HTML.
pub fn render_fallback(items: &[FallbackEntry]) -> String {
    let mut out = String::from("⚠️ <b>AI summary is unavailable right now.</b> Latest headlines:\n\n");
    for (i, entry) in items.iter().enumerate() {
        let _ = write!(
            out,
            "{}. <b>{}</b> ({})",
            i + 1,
            html_escape::encode_text(&entry.title),
            html_escape::encode_text(&entry.source)
        );
        if let Some(link) = &entry.link {
            let _ = write!(
                out,
                "\n<a href=\"{}\">Read more</a>",
                html_escape::encode_double_quoted_attribute(link)
            );
        }
        out.push_str("\n\n");
    }
    out.trim_end().to_string()
}
