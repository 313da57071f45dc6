//! Feed aggregator binary.
//! Loads config, builds the aggregator, starts the refresh scheduler and serves the HTTP API.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_aggregator::{
    api::{self, AppState},
    bootstrap, config::AppConfig, metrics::Metrics, scheduler,
};

/// `RUST_LOG` filter (default `feed_aggregator=info,warn`); `LOG_FORMAT=json` switches to
/// structured JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feed_aggregator=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed");
    }
    tracing::info!("shutdown requested");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading configuration")?;
    let metrics = Metrics::init(&cfg)?;
    let aggregator = bootstrap::build_aggregator(&cfg).await?;

    let shutdown = CancellationToken::new();
    let scheduler = scheduler::spawn_refresh_scheduler(
        aggregator.clone(),
        Duration::from_secs(cfg.engine.refresh_interval_secs),
        shutdown.clone(),
    );

    let app = api::router(AppState { aggregator }).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind_addr))?;
    tracing::info!(addr = %cfg.server.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("http server")?;

    shutdown.cancel();
    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "scheduler task ended abnormally");
    }
    Ok(())
}
