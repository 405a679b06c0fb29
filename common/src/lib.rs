/*!
common/src/lib.rs

Shared configuration types for feeddigest.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an optional override
- Accessors that resolve every optional setting to its built-in default
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One configured feed. The list is ordered and fixed for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSourceConfig {
    pub url: String,
    /// Display name used when the feed document carries no title
    pub name: Option<String>,
}

/// Fetching / filtering limits for one aggregation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub per_source_items: Option<usize>,
    pub total_items: Option<usize>,
    pub source_timeout_seconds: Option<u64>,
    pub deadline_seconds: Option<u64>,
    pub summary_chars: Option<usize>,
    pub title_chars: Option<usize>,
    pub max_retries: Option<u32>,
    pub user_agent: Option<String>,
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

/// Prompt and fallback shaping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestConfig {
    pub fallback_items: Option<usize>,
    pub include_links: Option<bool>,
    pub system_prompt: Option<String>,
    pub instructions: Option<String>,
    /// Language the digest is written in; unset keeps the language of the feeds
    pub language: Option<String>,
}

/// Telegram Bot API settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub api_url: Option<String>,
    pub token_env: Option<String>,
    pub poll_timeout_seconds: Option<u64>,
    pub chunk_chars: Option<usize>,
    pub disable_web_page_preview: Option<bool>,
}

/// Health endpoint bind settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// A chat command that produces a digest. `window_hours = None` disables the time filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    pub name: String,
    pub window_hours: Option<u32>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<FeedSourceConfig>,
    pub aggregation: Option<AggregationConfig>,
    pub llm: Option<LlmConfig>,
    pub digest: Option<DigestConfig>,
    pub telegram: Option<TelegramConfig>,
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

pub const DEFAULT_PER_SOURCE_ITEMS: usize = 5;
pub const DEFAULT_TOTAL_ITEMS: usize = 20;
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_DEADLINE_SECS: u64 = 30;
pub const DEFAULT_SUMMARY_CHARS: usize = 400;
pub const DEFAULT_TITLE_CHARS: usize = 200;
pub const DEFAULT_CHUNK_CHARS: usize = 4096;
/// Largest accepted `window_hours` for a configured command.
pub const MAX_WINDOW_HOURS: u32 = 24 * 366;
pub const DEFAULT_CONFIG_FILE: &str = "config.default.toml";
pub const OVERRIDE_CONFIG_FILE: &str = "config.toml";

/// Fully resolved aggregation limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSettings {
    pub per_source_items: usize,
    pub total_items: usize,
    pub source_timeout: Duration,
    pub deadline: Duration,
    pub summary_chars: usize,
    pub title_chars: usize,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        AggregationConfig::default().resolve()
    }
}

impl AggregationConfig {
    pub fn resolve(&self) -> AggregationSettings {
        AggregationSettings {
            per_source_items: self.per_source_items.unwrap_or(DEFAULT_PER_SOURCE_ITEMS),
            total_items: self.total_items.unwrap_or(DEFAULT_TOTAL_ITEMS),
            source_timeout: Duration::from_secs(
                self.source_timeout_seconds.unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS),
            ),
            deadline: Duration::from_secs(self.deadline_seconds.unwrap_or(DEFAULT_DEADLINE_SECS)),
            summary_chars: self.summary_chars.unwrap_or(DEFAULT_SUMMARY_CHARS),
            title_chars: self.title_chars.unwrap_or(DEFAULT_TITLE_CHARS),
            max_retries: self.max_retries.unwrap_or(1),
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| "feeddigest/0.1.0".to_string()),
        }
    }
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// `config.default.toml` merged with `explicit`, or with `config.toml` when no file is given.
    /// An explicit file that does not exist is an error; the implicit ones are optional.
    pub async fn load_layered(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }
        let override_path = explicit.unwrap_or_else(|| Path::new(OVERRIDE_CONFIG_FILE));
        Self::load_with_defaults(Some(Path::new(DEFAULT_CONFIG_FILE)), Some(override_path)).await
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            anyhow::bail!("no feed sources configured ([[sources]] is empty)");
        }
        for source in &self.sources {
            url::Url::parse(&source.url)
                .with_context(|| format!("invalid feed source URL: {}", source.url))?;
        }
        let agg = self.aggregation_settings();
        if agg.source_timeout > agg.deadline {
            anyhow::bail!(
                "aggregation.source_timeout_seconds ({:?}) must not exceed aggregation.deadline_seconds ({:?})",
                agg.source_timeout,
                agg.deadline
            );
        }
        if agg.per_source_items == 0 {
            anyhow::bail!("aggregation.per_source_items must be greater than zero");
        }
        if agg.total_items == 0 {
            anyhow::bail!("aggregation.total_items must be greater than zero");
        }
        if self.digest.as_ref().and_then(|d| d.fallback_items) == Some(0) {
            anyhow::bail!("digest.fallback_items must be greater than zero");
        }
        if self.chunk_chars() == 0 {
            anyhow::bail!("telegram.chunk_chars must be greater than zero");
        }
        for command in self.digest_commands() {
            if command.window_hours.is_some_and(|h| h > MAX_WINDOW_HOURS) {
                anyhow::bail!(
                    "command /{} window_hours must be at most {}",
                    command.name,
                    MAX_WINDOW_HOURS
                );
            }
        }
        Ok(())
    }

    pub fn aggregation_settings(&self) -> AggregationSettings {
        self.aggregation.clone().unwrap_or_default().resolve()
    }

    pub fn chunk_chars(&self) -> usize {
        self.telegram
            .as_ref()
            .and_then(|t| t.chunk_chars)
            .unwrap_or(DEFAULT_CHUNK_CHARS)
    }

    /// Digest commands, falling back to `digest` / `digest12` / `digest6`.
    pub fn digest_commands(&self) -> Vec<CommandConfig> {
        if !self.commands.is_empty() {
            return self.commands.clone();
        }
        vec![
            CommandConfig { name: "digest".to_string(), window_hours: None },
            CommandConfig { name: "digest12".to_string(), window_hours: Some(12) },
            CommandConfig { name: "digest6".to_string(), window_hours: Some(6) },
        ]
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[sources]]
        url = "https://example.com/feed.xml"

        [[sources]]
        url = "https://news.example.org/rss"
        name = "Example News"
    "#;

    #[test]
    fn minimal_config_resolves_defaults() {
        let cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[1].name.as_deref(), Some("Example News"));
        cfg.validate().expect("valid config");

        let agg = cfg.aggregation_settings();
        assert_eq!(agg.per_source_items, 5);
        assert_eq!(agg.total_items, 20);
        assert_eq!(agg.summary_chars, 400);
        assert_eq!(agg.source_timeout, Duration::from_secs(5));
        assert_eq!(agg.deadline, Duration::from_secs(30));
        assert_eq!(cfg.chunk_chars(), 4096);

        let commands = cfg.digest_commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].window_hours, None);
        assert_eq!(commands[2].window_hours, Some(6));
    }

    #[test]
    fn validate_rejects_bad_setups() {
        let empty: Config = toml::from_str("").expect("parse empty");
        assert!(empty.validate().is_err());

        let bad_url: Config = toml::from_str(
            r#"
            [[sources]]
            url = "not a url"
            "#,
        )
        .expect("parse");
        assert!(bad_url.validate().is_err());

        let inverted: Config = toml::from_str(
            r#"
            [[sources]]
            url = "https://example.com/feed"
            [aggregation]
            source_timeout_seconds = 40
            deadline_seconds = 10
            "#,
        )
        .expect("parse");
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_item_caps() {
        for section in [
            "[aggregation]\nper_source_items = 0",
            "[aggregation]\ntotal_items = 0",
            "[digest]\nfallback_items = 0",
        ] {
            let cfg: Config = toml::from_str(&format!("{}\n{}", MINIMAL, section)).expect("parse");
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("greater than zero"), "{}: {}", section, err);
        }
    }

    #[test]
    fn validate_bounds_command_windows() {
        let year = format!("{}\n[[commands]]\nname = \"digest_year\"\nwindow_hours = {}", MINIMAL, MAX_WINDOW_HOURS);
        let cfg: Config = toml::from_str(&year).expect("parse");
        cfg.validate().expect("a year is accepted");

        let huge = format!("{}\n[[commands]]\nname = \"digest_forever\"\nwindow_hours = {}", MINIMAL, u32::MAX);
        let cfg: Config = toml::from_str(&huge).expect("parse");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("/digest_forever"));
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        tokio::fs::write(
            &default_path,
            r#"
            [[sources]]
            url = "https://example.com/feed.xml"

            [aggregation]
            total_items = 20
            per_source_items = 5

            [llm]
            model = "gpt-4o-mini"
            temperature = 0.5
            "#,
        )
        .await
        .expect("write default");
        tokio::fs::write(
            &override_path,
            r#"
            [aggregation]
            total_items = 8

            [[commands]]
            name = "digest24"
            window_hours = 24
            "#,
        )
        .await
        .expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load");
        let agg = cfg.aggregation_settings();
        assert_eq!(agg.total_items, 8);
        assert_eq!(agg.per_source_items, 5);
        assert_eq!(cfg.llm.and_then(|l| l.model).as_deref(), Some("gpt-4o-mini"));
        assert_eq!(
            cfg.commands,
            vec![CommandConfig { name: "digest24".to_string(), window_hours: Some(24) }]
        );
    }

    #[tokio::test]
    async fn layered_load_rejects_missing_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("custom.toml");
        let err = Config::load_layered(Some(&missing)).await.unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[tokio::test]
    async fn missing_override_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        tokio::fs::write(&default_path, MINIMAL).await.expect("write");

        let missing = dir.path().join("nope.toml");
        let cfg = Config::load_with_defaults(Some(&default_path), Some(&missing))
            .await
            .expect("load");
        assert_eq!(cfg.sources.len(), 2);
    }
}
