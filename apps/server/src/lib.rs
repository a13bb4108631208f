mod commands;
pub mod config;
pub mod managers;
pub mod video;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use rtspcast_core::{CaptureController, CaptureService};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub use commands::ApiError;
use config::Config;
use managers::BroadcastPublisher;
use video::FfmpegCaptureEngine;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub controller: CaptureController,
    pub hub: Arc<BroadcastPublisher>,
    /// Fires once on process shutdown so long-lived sockets close
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/capture/start", post(commands::capture::start_capture))
        .route("/api/capture/stop", post(commands::capture::stop_capture))
        .route("/api/capture/status", get(commands::capture::get_status))
        .route("/api/capture/frame", get(commands::capture::get_frame))
        .route("/ws", get(commands::ws::ws_upgrade))
        .route("/healthz", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() -> anyhow::Result<()> {
    // Optional; variables already in the environment win
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rtspcast=debug,rtspcast_lib=debug,rtspcast_core=debug".into()),
        )
        .init();

    let config = Config::from_env();
    info!(
        rtsp_url = %config.rtsp_url,
        fps = config.stream.target_fps,
        ffmpeg = %config.ffmpeg.ffmpeg_path,
        "Starting rtspcast"
    );

    let hub = Arc::new(BroadcastPublisher::new(config.event_buffer));
    let engine = Arc::new(FfmpegCaptureEngine::new(config.ffmpeg.clone()));
    let service = CaptureService::new(
        config.rtsp_url.clone(),
        engine,
        hub.clone(),
        config.stream.clone(),
    );
    let shutdown = CancellationToken::new();

    let app = build_router(AppState {
        controller: CaptureController::new(service.clone()),
        hub,
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .context("HTTP server error")?;

    service.shutdown().await;
    info!("rtspcast stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}
