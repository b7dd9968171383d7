//! Murmur server binary.
//!
//! Starts an axum HTTP server in front of the voice pipeline, with
//! structured logging and graceful shutdown on SIGTERM/SIGINT.

use murmur_server::{app, build_engines, config, AppState};
use murmur_types::FrameFormat;
use murmur_voice::codec::opus;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("MURMUR_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if config.voice.synthesizer.encoding == FrameFormat::Opus && !opus::opus_available() {
        tracing::warn!("synthesizer.encoding is opus but this build lacks the opus feature, streamed output will fail");
    }

    config.voice.ensure_directories();
    if let Err(e) = std::fs::create_dir_all(&config.server.upload_dir) {
        tracing::warn!(path = %config.server.upload_dir.display(), error = %e, "failed to create upload directory");
    }

    let engines = build_engines(&config).expect("failed to build inference engines, check [llm] in config");
    let state = Arc::new(AppState::new(&config, engines));
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting murmur server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    state.sessions.close_all().await;
    tracing::info!("murmur server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
