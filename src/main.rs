//! Bidding Aggregation Service — Binary Entrypoint
//! Boots the Axum HTTP server wiring the fetcher table, aggregator,
//! reconciler and an in-memory store behind the API routes.

use std::sync::Arc;

use licita_radar::store::MemoryStore;
use licita_radar::{build_app, AppConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("licita_radar=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    tracing::info!(
        cache_ttl_secs = config.cache_ttl_secs,
        allow_fragile = config.allow_fragile,
        "starting licita-radar"
    );

    // The real deployment plugs its relational store in here.
    let store = Arc::new(MemoryStore::new());
    let router = build_app(config, store);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
