use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregationSettings;
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// A configured feed. Identity is the URL; constant for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    pub name: Option<String>,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), name: None }
    }

    pub fn named(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self { url: url.into(), name: Some(name.into()) }
    }

    /// Fallback label when the feed document has no title: configured name, then URL host.
    pub fn label(&self) -> String {
        if let Some(name) = self.name.as_ref().filter(|n| !n.trim().is_empty()) {
            return name.clone();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

impl From<&common::FeedSourceConfig> for FeedSource {
    fn from(cfg: &common::FeedSourceConfig) -> Self {
        Self { url: cfg.url.clone(), name: cfg.name.clone() }
    }
}

/// One article as parsed from a feed, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    /// Summary or body, possibly HTML
    pub summary: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub source: String,
}

impl RawEntry {
    /// Publish time, falling back to update time.
    pub fn resolved_timestamp(&self) -> Option<DateTime<Utc>> {
        self.published.or(self.updated)
    }
}

/// Source-local failure. Never aborts an aggregation.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Fetch(String),

    #[error("feed fetch failed with status: {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to parse feed: {0}")]
    Parse(String),

    #[error("feed task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    Fetch,
    Parse,
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Parse(_) => SourceErrorKind::Parse,
            _ => SourceErrorKind::Fetch,
        }
    }
}

/// Feed Source Client: fetch one URL and return at most `cap` raw entries.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &FeedSource, cap: usize) -> Result<Vec<RawEntry>, SourceError>;
}

/// HTTP implementation backed by reqwest + feed-rs.
pub struct HttpFeedFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFeedFetcher {
    pub fn new(settings: &AggregationSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.source_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build reqwest client: {}", e))?;
        Ok(Self { client, max_retries: settings.max_retries })
    }

    pub fn with_client(client: Client, max_retries: u32) -> Self {
        Self { client, max_retries }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let attempts = self.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = Duration::from_millis(250 * 2u64.pow(attempt - 2)); // 250ms, 500ms, ...
                tracing::info!(url, attempt, attempts, ?backoff, "retrying feed fetch");
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| SourceError::Fetch(format!("failed to read response body: {}", e)))?;
                        return Ok(bytes.to_vec());
                    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(SourceError::Status(status.as_u16()));
                        continue;
                    } else {
                        // 4xx other than 429 will not get better on retry
                        return Err(SourceError::Status(status.as_u16()));
                    }
                }
                Err(e) if e.is_timeout() => {
                    return Err(SourceError::Fetch(format!("request timed out: {}", e)));
                }
                Err(e) => {
                    last_error = Some(SourceError::Fetch(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SourceError::Fetch("unknown error after retries".to_string())))
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source: &FeedSource, cap: usize) -> Result<Vec<RawEntry>, SourceError> {
        let bytes = self.fetch_bytes(&source.url).await?;
        let entries = parse_feed(&bytes, source, cap)?;
        tracing::debug!(url = %source.url, entries = entries.len(), "parsed feed");
        Ok(entries)
    }
}

/// Parse a feed document into at most `cap` raw entries.
pub fn parse_feed(bytes: &[u8], source: &FeedSource, cap: usize) -> Result<Vec<RawEntry>, SourceError> {
    let feed = parser::parse(bytes).map_err(|e| SourceError::Parse(e.to_string()))?;

    let source_name = feed
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| source.label());

    Ok(feed
        .entries
        .iter()
        .take(cap)
        .map(|entry| raw_entry(entry, &source_name))
        .collect())
}

fn raw_entry(entry: &Entry, source_name: &str) -> RawEntry {
    let summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));

    RawEntry {
        title: entry.title.as_ref().map(|t| t.content.clone()),
        summary,
        link: entry.links.first().map(|l| l.href.clone()),
        published: entry.published,
        updated: entry.updated,
        source: source_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Chain Wire</title>
    <link>https://chainwire.example</link>
    <description>test</description>
    <item>
      <title>First</title>
      <link>https://chainwire.example/1</link>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Mon, 19 Oct 2026 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://chainwire.example/2</link>
    </item>
    <item>
      <title>Third</title>
      <link>https://chainwire.example/3</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_entries_up_to_cap() {
        let source = FeedSource::new("https://chainwire.example/feed");
        let entries = parse_feed(RSS.as_bytes(), &source, 2).expect("parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("First"));
        assert_eq!(entries[0].link.as_deref(), Some("https://chainwire.example/1"));
        assert_eq!(entries[0].source, "Chain Wire");
        assert!(entries[0].published.is_some());
        assert!(entries[0].summary.as_deref().unwrap_or_default().contains("<b>world</b>"));
    }

    #[test]
    fn undated_entries_are_kept() {
        let source = FeedSource::new("https://chainwire.example/feed");
        let entries = parse_feed(RSS.as_bytes(), &source, 10).expect("parse");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].resolved_timestamp(), None);
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let source = FeedSource::new("https://broken.example/feed");
        let err = parse_feed(b"this is not a feed", &source, 5).unwrap_err();
        assert_eq!(err.kind(), SourceErrorKind::Parse);
    }

    #[test]
    fn label_falls_back_to_host() {
        assert_eq!(FeedSource::new("https://www.coindesk.com/arc/rss/").label(), "coindesk.com");
        assert_eq!(FeedSource::named("https://x.example/rss", "X News").label(), "X News");
        assert_eq!(FeedSource::new("garbage").label(), "Unknown");
    }

    #[test]
    fn timeouts_count_as_fetch_errors() {
        assert_eq!(SourceError::Timeout(Duration::from_secs(5)).kind(), SourceErrorKind::Fetch);
        assert_eq!(SourceError::Status(503).kind(), SourceErrorKind::Fetch);
        assert_eq!(SourceError::Task("task panicked".into()).kind(), SourceErrorKind::Fetch);
    }
}
