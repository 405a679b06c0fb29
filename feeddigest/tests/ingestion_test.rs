use common::AggregationSettings;
use std::time::Duration;

use feeddigest::ingestion::{FeedFetcher, FeedSource, HttpFeedFetcher, SourceError, SourceErrorKind};

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Ledger Times</title>
  <id>urn:ledger</id>
  <updated>2026-10-19T10:00:00Z</updated>
  <entry>
    <title>ETH upgrade ships</title>
    <id>urn:ledger:1</id>
    <link href="https://ledger.example/eth-upgrade"/>
    <updated>2026-10-19T09:00:00Z</updated>
    <summary type="html">&lt;p&gt;The upgrade &lt;em&gt;went live&lt;/em&gt;.&lt;/p&gt;</summary>
  </entry>
  <entry>
    <title>Stablecoin bill advances</title>
    <id>urn:ledger:2</id>
    <link href="https://ledger.example/stablecoin"/>
    <published>2026-10-19T08:00:00Z</published>
    <updated>2026-10-19T08:30:00Z</updated>
  </entry>
</feed>"#;

fn fetcher(max_retries: u32) -> HttpFeedFetcher {
    let settings = AggregationSettings {
        source_timeout: Duration::from_secs(5),
        max_retries,
        ..AggregationSettings::default()
    };
    HttpFeedFetcher::new(&settings).expect("client")
}

#[tokio::test]
async fn fetches_and_parses_atom() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/atom.xml")
        .with_status(200)
        .with_header("content-type", "application/atom+xml")
        .with_body(ATOM)
        .create_async()
        .await;

    let source = FeedSource::new(format!("{}/atom.xml", server.url()));
    let entries = fetcher(0).fetch(&source, 5).await.expect("fetch");

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].source, "Ledger Times");
    assert_eq!(entries[0].link.as_deref(), Some("https://ledger.example/eth-upgrade"));
    assert!(entries[0].published.is_none());
    assert!(entries[0].resolved_timestamp().is_some(), "falls back to <updated>");
    assert!(entries[1].published.is_some());

    mock.assert_async().await;
}

#[tokio::test]
async fn malformed_body_is_parse_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body("<html><body>Service moved</body></html>")
        .create_async()
        .await;

    let source = FeedSource::new(format!("{}/feed", server.url()));
    let err = fetcher(0).fetch(&source, 5).await.unwrap_err();
    assert_eq!(err.kind(), SourceErrorKind::Parse);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/gone")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let source = FeedSource::new(format!("{}/gone", server.url()));
    let err = fetcher(2).fetch(&source, 5).await.unwrap_err();
    assert!(matches!(err, SourceError::Status(404)));
    assert_eq!(err.kind(), SourceErrorKind::Fetch);

    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_then_reported() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/flaky")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let source = FeedSource::new(format!("{}/flaky", server.url()));
    let err = fetcher(1).fetch(&source, 5).await.unwrap_err();
    assert!(matches!(err, SourceError::Status(503)));

    mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_host_is_fetch_error() {
    // Nothing listens on port 9 (discard) in test environments
    let source = FeedSource::new("http://127.0.0.1:9/feed");
    let err = fetcher(0).fetch(&source, 5).await.unwrap_err();
    assert_eq!(err.kind(), SourceErrorKind::Fetch);
}
