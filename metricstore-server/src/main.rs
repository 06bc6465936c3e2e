//! MetricStore Server - HTTP adapter over the series cache

mod api;
mod config;

use config::ServerConfig;
use metricstore_core::cache::CacheEngine;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = ServerConfig::load()?;

    info!("Starting MetricStore server v{}...", metricstore_core::VERSION);
    info!("HTTP server: http://{}", config.http_addr);

    // Initialize cache engine
    let engine = Arc::new(CacheEngine::new(config.cache.clone())?);
    let maintenance = engine.spawn_maintenance();

    // Create router
    let app = api::create_router(engine.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("MetricStore server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    engine.shutdown();
    info!("MetricStore server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
