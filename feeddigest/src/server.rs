use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::serde::json::Json;
use rocket::{get, routes, Build, Rocket, State};
use serde::Serialize;
use tokio::sync::Notify;

use common::Config;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    sources: Vec<String>,
    commands: Vec<String>,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning uptime and the configured pipeline shape.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        sources: state.config.sources.iter().map(|s| s.url.clone()).collect(),
        commands: state
            .config
            .digest_commands()
            .into_iter()
            .map(|c| format!("/{}", c.name))
            .collect(),
    })
}

/// Build the Rocket instance, applying `[server] bind/port` when present.
pub fn build_rocket(config: Arc<Config>) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = &config.server {
        if let Some(bind) = &server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    let state = AppState { started_at: Utc::now(), config };
    rocket::custom(fig).manage(state).mount("/", routes![health, status])
}

/// Launch the health server. Blocks until Rocket shuts down or `shutdown` is notified.
pub async fn launch_rocket(config: Arc<Config>, shutdown: Arc<Notify>) -> Result<()> {
    let rocket = build_rocket(config)
        .ignite()
        .await
        .map_err(|e| anyhow!("Rocket failed to ignite: {}", e))?;

    let handle = rocket.shutdown();
    tokio::spawn(async move {
        shutdown.notified().await;
        handle.notify();
    });

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
