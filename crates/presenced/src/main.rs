use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = config::Config::from_env();
    std::fs::create_dir_all(&config.upload_dir)
        .with_context(|| format!("creating upload dir {}", config.upload_dir.display()))?;

    // Fail fast: both models load before the listener binds.
    let engine = engine::spawn_engine(
        &config.detector_model_path(),
        &config.arcface_model_path(),
        config.detection_threshold,
    )
    .context("loading ONNX models")?;

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
        .parse()
        .context("invalid bind address")?;

    let state = routes::AppState {
        engine,
        config: Arc::new(config),
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "presenced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("presenced shutting down");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
