use clap::Parser;
use common::Config;
use std::path::PathBuf;

use feeddigest::aggregator::{Aggregator, TimeWindow};

/// Run one aggregation against the configured feeds and print what would be summarized.
#[derive(Parser, Debug)]
#[command(name = "check_feeds")]
struct Args {
    /// Override file merged over config.default.toml (defaults to config.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only keep items from the last N hours
    #[arg(long)]
    window_hours: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::load_layered(args.config.as_deref()).await?;
    config.validate()?;

    let aggregator = Aggregator::from_config(&config)?;
    let outcome = aggregator.aggregate(args.window_hours.map(TimeWindow::hours)).await;

    println!("\n{}", "=".repeat(60));
    println!("{} items from {} sources", outcome.items.len(), aggregator.sources().len());
    println!("{}", "=".repeat(60));

    for (i, item) in outcome.items.iter().enumerate() {
        println!("{:>2}. [{}] {}", i + 1, item.source, item.title);
        println!("    {}  ({})", item.link, item.published_label());
    }

    if !outcome.errors.is_empty() {
        println!("\nFailed sources:");
        for failure in &outcome.errors {
            println!("  ✗ {} ({:?}): {}", failure.source, failure.kind, failure.message);
        }
    }

    Ok(())
}
