/*
feeddigest - single-binary main.rs
This binary runs the Telegram polling loop and the health endpoint inside the same process.
*/

use anyhow::Context;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use feeddigest::aggregator::Aggregator;
use feeddigest::bot::run_bot;
use feeddigest::commands::DigestService;
use feeddigest::digest::{DigestGenerator, DigestSettings};
use feeddigest::llm::{self, LlmProvider};
use feeddigest::server::launch_rocket;
use feeddigest::telegram::TelegramTransport;

#[derive(Parser, Debug)]
#[command(name = "feeddigest", about = "News feed digest bot with health endpoint")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run the bot loop only (do not bind the HTTP server)
    #[arg(long, conflicts_with = "server_only")]
    no_server: bool,

    /// Run the health endpoint only (no bot loop)
    #[arg(long)]
    server_only: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if let Ok(path) = dotenv::dotenv() {
        info!(path = ?path, "loaded environment file");
    }

    let config = Arc::new(load_config(args.config).await?);
    config.validate().context("invalid configuration")?;
    info!(sources = config.sources.len(), "configuration loaded");

    let shutdown_notify = Arc::new(Notify::new());

    let mut bot_handle = None;
    if !args.server_only {
        let service = Arc::new(build_service(&config)?);
        let transport = Arc::new(TelegramTransport::from_config(&config.telegram.clone().unwrap_or_default())?);
        let commands = Arc::new(config.digest_commands());

        info!("Spawning bot polling task");
        let b_shutdown = shutdown_notify.clone();
        bot_handle = Some(tokio::spawn(run_bot(transport, service, commands, b_shutdown)));
    } else {
        info!("Bot loop disabled via CLI (--server-only)");
    }

    if args.no_server {
        info!("HTTP server disabled via CLI (--no-server)");
        tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        info!("ctrl-c received, shutting down");
    } else {
        info!("Launching Rocket HTTP server");
        if let Err(e) = launch_rocket(config.clone(), shutdown_notify.clone()).await {
            error!(%e, "Rocket server failed");
        }
        info!("HTTP server stopped");
    }

    shutdown_notify.notify_waiters();

    if let Some(handle) = bot_handle {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(Ok(Ok(()))) => info!("bot exited cleanly"),
            Ok(Ok(Err(e))) => error!(%e, "bot task returned an error"),
            Ok(Err(join_err)) => error!(%join_err, "bot task panicked"),
            Err(_) => warn!("Timed out waiting for bot to exit; continuing shutdown"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// `config.default.toml` merged with `--config FILE`, or `config.toml` when present.
async fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = Config::load_layered(explicit.as_deref()).await.map_err(|e| {
        error!(path = ?explicit, error = %e, "failed to load configuration");
        e
    })?;
    info!(
        default_file = common::DEFAULT_CONFIG_FILE,
        override_file = ?explicit.unwrap_or_else(|| PathBuf::from(common::OVERRIDE_CONFIG_FILE)),
        "configuration files read"
    );
    Ok(config)
}

/// Create the summarization backend selected by `llm.adapter`.
fn create_llm_provider(config: &Config) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let llm_config = config.llm.clone().unwrap_or_default();
    let adapter = llm_config.adapter.as_deref().unwrap_or("remote");
    match adapter {
        "remote" => {
            let provider = llm::remote::RemoteLlmProvider::from_config(&llm_config)?;
            info!(model = provider.model(), "LLM provider initialized: remote");
            Ok(Arc::new(provider))
        }
        "none" => {
            warn!("LLM adapter 'none': digests will use the plain headline listing");
            Ok(Arc::new(llm::DisabledProvider))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}

fn build_service(config: &Config) -> anyhow::Result<DigestService> {
    let aggregator = Aggregator::from_config(config)?;
    let generator = DigestGenerator::new(create_llm_provider(config)?, DigestSettings::from_config(config));
    Ok(DigestService::new(aggregator, generator, config.chunk_chars()))
}
