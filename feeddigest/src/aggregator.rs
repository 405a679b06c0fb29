use chrono::{DateTime, Utc};
use common::AggregationSettings;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ingestion::{FeedFetcher, FeedSource, HttpFeedFetcher, RawEntry, SourceError, SourceErrorKind};
use crate::normalize::{normalize_entry, NewsItem};

/// Recency cutoff in hours. Absent means no time filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub hours: u32,
}

impl TimeWindow {
    pub fn hours(hours: u32) -> Self {
        Self { hours }
    }

    /// Oldest accepted timestamp. Windows reaching past the representable range have no lower bound.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(chrono::Duration::hours(i64::from(self.hours)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Error record for a source that contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub kind: SourceErrorKind,
    pub message: String,
}

/// Result of one aggregation: the ordered items plus the per-source error log.
#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    pub items: Vec<NewsItem>,
    pub errors: Vec<SourceFailure>,
}

impl AggregationOutcome {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fans out feed fetches, then filters, deduplicates, sorts and caps the merged set.
pub struct Aggregator {
    sources: Arc<Vec<FeedSource>>,
    fetcher: Arc<dyn FeedFetcher>,
    settings: AggregationSettings,
}

impl Aggregator {
    pub fn new(sources: Vec<FeedSource>, fetcher: Arc<dyn FeedFetcher>, settings: AggregationSettings) -> Self {
        Self { sources: Arc::new(sources), fetcher, settings }
    }

    /// Aggregator over the configured sources using the HTTP fetcher.
    pub fn from_config(config: &common::Config) -> anyhow::Result<Self> {
        let settings = config.aggregation_settings();
        let fetcher = Arc::new(HttpFeedFetcher::new(&settings)?);
        let sources = config.sources.iter().map(FeedSource::from).collect();
        Ok(Self::new(sources, fetcher, settings))
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    pub async fn aggregate(&self, window: Option<TimeWindow>) -> AggregationOutcome {
        self.aggregate_at(window, Utc::now()).await
    }

    /// Same as [`Aggregator::aggregate`] with an explicit reference time for the window filter.
    pub async fn aggregate_at(&self, window: Option<TimeWindow>, now: DateTime<Utc>) -> AggregationOutcome {
        let started = Instant::now();
        let (per_source, errors) = self.fetch_all().await;

        let raw_count: usize = per_source.iter().map(Vec::len).sum();
        let items = merge_entries(per_source, window, now, &self.settings);

        info!(
            sources = self.sources.len(),
            failed = errors.len(),
            raw = raw_count,
            items = items.len(),
            window_hours = window.map(|w| w.hours),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregation finished"
        );

        AggregationOutcome { items, errors }
    }

    /// Fetch every source concurrently. Results come back in source order regardless of completion
    /// order; sources still running at the deadline are aborted and logged as timeouts.
    async fn fetch_all(&self) -> (Vec<Vec<RawEntry>>, Vec<SourceFailure>) {
        let deadline = tokio::time::Instant::now() + self.settings.deadline;
        let source_timeout = self.settings.source_timeout;
        let cap = self.settings.per_source_items;

        let mut set = JoinSet::new();
        let mut task_sources = HashMap::with_capacity(self.sources.len());
        for (idx, source) in self.sources.iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let source = source.clone();
            let handle = set.spawn(async move {
                let res = match tokio::time::timeout(source_timeout, fetcher.fetch(&source, cap)).await {
                    Ok(res) => res,
                    Err(_) => Err(SourceError::Timeout(source_timeout)),
                };
                (idx, res)
            });
            task_sources.insert(handle.id(), idx);
        }

        let mut results: Vec<Option<Result<Vec<RawEntry>, SourceError>>> =
            (0..self.sources.len()).map(|_| None).collect();

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((idx, res)))) => results[idx] = Some(res),
                Ok(Some(Err(join_err))) => {
                    warn!(%join_err, "feed task failed");
                    if let Some(&idx) = task_sources.get(&join_err.id()) {
                        let reason = if join_err.is_panic() { "task panicked" } else { "task cancelled" };
                        results[idx] = Some(Err(SourceError::Task(reason.to_string())));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = set.len(), "aggregation deadline reached, abandoning remaining sources");
                    set.abort_all();
                    break;
                }
            }
        }

        let mut per_source = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (source, res) in self.sources.iter().zip(results) {
            let res = res.unwrap_or(Err(SourceError::Timeout(self.settings.deadline)));
            match res {
                Ok(entries) => {
                    debug!(url = %source.url, entries = entries.len(), "source fetched");
                    per_source.push(entries);
                }
                Err(e) => {
                    warn!(url = %source.url, error = %e, "source skipped");
                    errors.push(SourceFailure { source: source.url.clone(), kind: e.kind(), message: e.to_string() });
                    per_source.push(Vec::new());
                }
            }
        }

        (per_source, errors)
    }
}

/// Normalize, window-filter, deduplicate, sort and cap.
///
/// Undated entries never pass a time window; without a window they are kept and sort last.
pub fn merge_entries(
    per_source: Vec<Vec<RawEntry>>,
    window: Option<TimeWindow>,
    now: DateTime<Utc>,
    settings: &AggregationSettings,
) -> Vec<NewsItem> {
    let cutoff = window.map(|w| w.cutoff(now));

    let mut items: Vec<NewsItem> = per_source
        .iter()
        .flat_map(|entries| entries.iter().take(settings.per_source_items))
        .filter_map(|entry| normalize_entry(entry, settings.title_chars, settings.summary_chars))
        .filter(|item| match (cutoff, item.published) {
            (None, _) => true,
            (Some(cutoff), Some(published)) => published >= cutoff,
            (Some(_), None) => false,
        })
        .collect();

    sort_items(&mut items);
    dedup_items(&mut items);
    items.truncate(settings.total_items);
    items
}

/// Newest first, undated last; ties broken by title then link.
pub fn sort_items(items: &mut [NewsItem]) {
    items.sort_by(|a, b| {
        b.published
            .cmp(&a.published)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.link.cmp(&b.link))
    });
}

/// Drop items whose link or case-folded title matches an item already kept.
pub fn dedup_items(items: &mut Vec<NewsItem>) {
    let mut seen_links = HashSet::new();
    let mut seen_titles = HashSet::new();
    items.retain(|item| {
        let title = item.title.to_lowercase();
        if seen_links.contains(&item.link) || seen_titles.contains(&title) {
            return false;
        }
        seen_links.insert(item.link.clone());
        seen_titles.insert(title);
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn raw(title: &str, link: &str, hours_ago: Option<i64>) -> RawEntry {
        RawEntry {
            title: Some(title.to_string()),
            summary: None,
            link: Some(link.to_string()),
            published: hours_ago.map(|h| now() - chrono::Duration::hours(h)),
            updated: None,
            source: "S".to_string(),
        }
    }

    #[test]
    fn window_keeps_recent_and_drops_undated() {
        let entries = vec![vec![
            raw("fresh", "https://a/1", Some(1)),
            raw("edge", "https://a/2", Some(6)),
            raw("old", "https://a/3", Some(7)),
            raw("undated", "https://a/4", None),
        ]];
        let items = merge_entries(entries, Some(TimeWindow::hours(6)), now(), &AggregationSettings::default());
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["fresh", "edge"]);
    }

    #[test]
    fn no_window_keeps_undated_last() {
        let entries = vec![vec![raw("undated", "https://a/4", None), raw("old", "https://a/3", Some(100))]];
        let items = merge_entries(entries, None, now(), &AggregationSettings::default());
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["old", "undated"]);
    }

    #[test]
    fn ties_break_on_title() {
        let entries = vec![
            vec![raw("Zeta", "https://a/1", Some(2))],
            vec![raw("Alpha", "https://b/1", Some(2))],
        ];
        let items = merge_entries(entries, None, now(), &AggregationSettings::default());
        assert_eq!(items[0].title, "Alpha");
        assert_eq!(items[1].title, "Zeta");
    }

    #[test]
    fn duplicates_by_link_or_title_are_removed() {
        let entries = vec![
            vec![raw("Same story", "https://a/1", Some(1))],
            vec![raw("SAME STORY", "https://b/9", Some(2)), raw("Other", "https://a/1", Some(3))],
        ];
        let items = merge_entries(entries, None, now(), &AggregationSettings::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://a/1");
    }

    #[test]
    fn dropped_duplicate_does_not_shadow_later_items() {
        let item = |title: &str, link: &str| NewsItem {
            title: title.to_string(),
            summary: String::new(),
            link: link.to_string(),
            source: "S".to_string(),
            published: None,
        };
        let mut items = vec![item("A", "https://x/1"), item("B", "https://x/1"), item("B", "https://x/2")];
        dedup_items(&mut items);

        let kept: Vec<_> = items.iter().map(|i| (i.title.as_str(), i.link.as_str())).collect();
        assert_eq!(kept, vec![("A", "https://x/1"), ("B", "https://x/2")]);
    }

    #[test]
    fn oversized_window_has_no_lower_bound() {
        let window = TimeWindow::hours(u32::MAX);
        assert_eq!(window.cutoff(now()), DateTime::<Utc>::MIN_UTC);

        let entries = vec![vec![raw("ancient", "https://a/1", Some(24 * 365 * 50)), raw("undated", "https://a/2", None)]];
        let items = merge_entries(entries, Some(window), now(), &AggregationSettings::default());
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["ancient"]);
    }

    #[test]
    fn caps_per_source_and_total() {
        let settings = AggregationSettings { per_source_items: 2, total_items: 3, ..AggregationSettings::default() };
        let entries = vec![
            (0..5).map(|i| raw(&format!("a{i}"), &format!("https://a/{i}"), Some(i))).collect(),
            (0..5).map(|i| raw(&format!("b{i}"), &format!("https://b/{i}"), Some(i))).collect(),
        ];
        let items = merge_entries(entries, None, now(), &settings);
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["a0", "b0", "a1"]);
    }
}
