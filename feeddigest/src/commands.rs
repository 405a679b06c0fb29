use std::time::Instant;
use tracing::{error, info, warn};

use common::CommandConfig;

use crate::aggregator::{AggregationOutcome, Aggregator, TimeWindow};
use crate::delivery::{deliver_chunks, ChatId, ChatTransport, DeliveryError};
use crate::digest::{render_fallback, DigestGenerator, DigestResult};

/// Parsed inbound chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Digest { window_hours: Option<u32> },
    Unknown,
}

/// Maps `/name` (optionally `/name@botname` and trailing arguments) to a command.
pub fn parse_command(text: &str, commands: &[CommandConfig]) -> Command {
    let Some(first) = text.split_whitespace().next() else {
        return Command::Unknown;
    };
    let Some(name) = first.strip_prefix('/') else {
        return Command::Unknown;
    };
    let name = name.split('@').next().unwrap_or(name);

    if name == "start" || name == "help" {
        return Command::Start;
    }
    commands
        .iter()
        .find(|c| c.name == name)
        .map(|c| Command::Digest { window_hours: c.window_hours })
        .unwrap_or(Command::Unknown)
}

fn window_phrase(window_hours: Option<u32>) -> String {
    match window_hours {
        Some(h) => format!("for the last {} hours", h),
        None => "across all recent items".to_string(),
    }
}

pub fn help_text(commands: &[CommandConfig]) -> String {
    let mut text = String::from(
        "🤖 <b>Hi!</b>\n\nI collect fresh news from the configured feeds and turn them into a digest.\n\nCommands:\n",
    );
    for c in commands {
        text.push_str(&format!("/{} — digest {}\n", c.name, window_phrase(c.window_hours)));
    }
    text
}

pub fn unknown_text(commands: &[CommandConfig]) -> String {
    let digest = commands.first().map(|c| c.name.as_str()).unwrap_or("digest");
    format!("I don't understand this command. Try:\n/{} — digest\n/start — help", digest)
}

/// Everything produced for one digest request. Owned by that request alone.
#[derive(Debug, Clone)]
pub struct DigestReport {
    pub outcome: AggregationOutcome,
    pub result: DigestResult,
}

/// Request-scoped pipeline: aggregate, summarize, render, segment.
pub struct DigestService {
    aggregator: Aggregator,
    generator: DigestGenerator,
    chunk_chars: usize,
}

impl DigestService {
    pub fn new(aggregator: Aggregator, generator: DigestGenerator, chunk_chars: usize) -> Self {
        Self { aggregator, generator, chunk_chars }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn chunk_chars(&self) -> usize {
        self.chunk_chars
    }

    pub async fn aggregate(&self, window_hours: Option<u32>) -> AggregationOutcome {
        self.aggregator.aggregate(window_hours.map(TimeWindow::hours)).await
    }

    pub async fn summarize(&self, outcome: AggregationOutcome) -> DigestReport {
        let result = self.generator.generate(&outcome).await;
        DigestReport { outcome, result }
    }

    /// Run the full pipeline for one window.
    pub async fn request_digest(&self, window_hours: Option<u32>) -> DigestReport {
        let outcome = self.aggregate(window_hours).await;
        self.summarize(outcome).await
    }
}

/// Text to post for a result; `None` for the empty sentinel.
pub fn render_result(result: &DigestResult) -> Option<String> {
    match result {
        DigestResult::Empty => None,
        DigestResult::Generated(text) => Some(text.clone()),
        DigestResult::Fallback { items, .. } => Some(render_fallback(items)),
    }
}

pub fn no_news_text(window_hours: Option<u32>) -> String {
    match window_hours {
        Some(h) => format!("📭 No news found for the last {} hours.", h),
        None => "📭 No news found.".to_string(),
    }
}

/// Handle one digest command end to end, reporting progress through the transport.
///
/// Source and summarization failures only degrade the digest. Status edits and deletes are best effort;
/// failing to post the status or the digest itself is returned.
pub async fn handle_digest(
    service: &DigestService,
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    window_hours: Option<u32>,
) -> Result<DigestResult, DeliveryError> {
    let started = Instant::now();
    let status_id = transport
        .send_message(chat_id, &format!("🔍 Scanning news feeds {}...", window_phrase(window_hours)))
        .await?;

    let outcome = service.aggregate(window_hours).await;
    if outcome.is_empty() {
        info!(chat_id, ?window_hours, failed_sources = outcome.errors.len(), "no news found");
        let text = no_news_text(window_hours);
        if let Err(e) = transport.edit_message(chat_id, status_id, &text).await {
            warn!(chat_id, error = %e, "failed to edit status message, sending result instead");
            transport.send_message(chat_id, &text).await?;
        }
        return Ok(DigestResult::Empty);
    }

    let progress = format!("🧠 Found {} news items. Summarizing...", outcome.items.len());
    if let Err(e) = transport.edit_message(chat_id, status_id, &progress).await {
        warn!(chat_id, error = %e, "failed to update status message");
    }

    let report = service.summarize(outcome).await;
    let Some(text) = render_result(&report.result) else {
        return Ok(report.result);
    };

    if let Err(e) = transport.delete_message(chat_id, status_id).await {
        warn!(chat_id, error = %e, "failed to delete status message");
    }

    match deliver_chunks(transport, chat_id, &text, service.chunk_chars()).await {
        Ok(chunks) => {
            info!(
                chat_id,
                ?window_hours,
                chunks,
                fallback = matches!(report.result, DigestResult::Fallback { .. }),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "digest delivered"
            );
            Ok(report.result)
        }
        Err(e) => {
            error!(chat_id, error = %e, "digest delivery failed");
            let notice = format!("❌ Error: {}", html_escape::encode_text(&e.to_string()));
            if let Err(notify_err) = transport.send_message(chat_id, &notice).await {
                warn!(chat_id, error = %notify_err, "failed to report delivery error");
            }
            Err(e)
        }
    }
}

/// Dispatch one inbound message.
pub async fn handle_message(
    service: &DigestService,
    transport: &dyn ChatTransport,
    commands: &[CommandConfig],
    chat_id: ChatId,
    text: &str,
) -> Result<(), DeliveryError> {
    match parse_command(text, commands) {
        Command::Start => {
            transport.send_message(chat_id, &help_text(commands)).await?;
        }
        Command::Digest { window_hours } => {
            handle_digest(service, transport, chat_id, window_hours).await?;
        }
        Command::Unknown => {
            transport.send_message(chat_id, &unknown_text(commands)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> Vec<CommandConfig> {
        vec![
            CommandConfig { name: "digest".into(), window_hours: None },
            CommandConfig { name: "digest12".into(), window_hours: Some(12) },
            CommandConfig { name: "digest6".into(), window_hours: Some(6) },
        ]
    }

    #[test]
    fn parses_configured_commands() {
        let cmds = commands();
        assert_eq!(parse_command("/digest", &cmds), Command::Digest { window_hours: None });
        assert_eq!(parse_command("/digest12", &cmds), Command::Digest { window_hours: Some(12) });
        assert_eq!(parse_command("/digest6@news_bot extra", &cmds), Command::Digest { window_hours: Some(6) });
        assert_eq!(parse_command("/start", &cmds), Command::Start);
    }

    #[test]
    fn everything_else_is_unknown() {
        let cmds = commands();
        assert_eq!(parse_command("hello", &cmds), Command::Unknown);
        assert_eq!(parse_command("/digest24", &cmds), Command::Unknown);
        assert_eq!(parse_command("   ", &cmds), Command::Unknown);
    }

    #[test]
    fn help_lists_every_command() {
        let text = help_text(&commands());
        assert!(text.contains("/digest — digest across all recent items"));
        assert!(text.contains("/digest12 — digest for the last 12 hours"));
        assert!(text.contains("/digest6 — digest for the last 6 hours"));
    }

    #[test]
    fn empty_result_renders_nothing() {
        assert_eq!(render_result(&DigestResult::Empty), None);
        assert_eq!(render_result(&DigestResult::Generated("x".into())), Some("x".to_string()));
    }
}
