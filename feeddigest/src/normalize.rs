//! RawEntry -> NewsItem normalization: markup stripping, length caps, timestamp resolution.

use chrono::{DateTime, SecondsFormat, Utc};
use scraper::Html;
use serde::Serialize;

use crate::ingestion::RawEntry;

/// Rendered in place of a timestamp when a feed entry carries neither a publish nor an update time.
pub const UNKNOWN_TIMESTAMP: &str = "unknown";

/// Normalized article handed to the digest generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsItem {
    pub title: String,
    pub summary: String,
    pub link: String,
    pub source: String,
    pub published: Option<DateTime<Utc>>,
}

impl NewsItem {
    /// ISO-8601 timestamp or the `unknown` sentinel.
    pub fn published_label(&self) -> String {
        self.published
            .map(|p| p.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string())
    }
}

/// Shape serialized into the prompt.
#[derive(Debug, Serialize)]
pub struct PromptItem<'a> {
    pub title: &'a str,
    pub summary: &'a str,
    pub link: &'a str,
    pub source: &'a str,
    pub published: String,
}

impl<'a> From<&'a NewsItem> for PromptItem<'a> {
    fn from(item: &'a NewsItem) -> Self {
        PromptItem {
            title: &item.title,
            summary: &item.summary,
            link: &item.link,
            source: &item.source,
            published: item.published_label(),
        }
    }
}

/// Strip markup and collapse whitespace, keeping only the text nodes.
pub fn clean_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let text = fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}

/// Turn a raw entry into a NewsItem.
///
/// Returns `None` when no link is present. A missing or blank title falls back to the link,
/// so neither field is ever empty downstream.
pub fn normalize_entry(entry: &RawEntry, title_chars: usize, summary_chars: usize) -> Option<NewsItem> {
    let link = entry.link.as_deref().map(str::trim).filter(|l| !l.is_empty())?.to_string();

    let title = entry
        .title
        .as_deref()
        .map(clean_html)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| link.clone());

    let summary = entry.summary.as_deref().map(clean_html).unwrap_or_default();

    Some(NewsItem {
        title: truncate_chars(&title, title_chars),
        summary: truncate_chars(&summary, summary_chars),
        link,
        source: entry.source.clone(),
        published: entry.resolved_timestamp(),
    })
}
