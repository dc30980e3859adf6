mod batch;
mod config;
mod demo;
mod encoding;
mod error;
mod export;
mod extract;
mod gemini;
mod generator;
mod models;
mod poller;
mod routes;
mod sink;
mod tools;
mod video;

#[cfg(test)]
mod testing;

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::AppConfig, demo::DemoGenerator, gemini::GeminiClient, generator::Generator, routes::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    let generator: Arc<dyn Generator> = if config.is_demo() {
        tracing::warn!("GEMINI_API_KEY not set, running in demo mode");
        Arc::new(DemoGenerator::new())
    } else {
        tracing::info!(
            image_model = %config.image_model,
            text_model = %config.text_model,
            video_model = %config.video_model,
            "Using Gemini API key: {}...",
            config.api_key.chars().take(6).collect::<String>()
        );
        Arc::new(GeminiClient::new(&config).context("building Gemini client")?)
    };

    let port = config.port;
    let state = AppState::new(generator, config);
    let app = routes::router(state).layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "🚀 Starting server");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("👋 Shutting down");
}
