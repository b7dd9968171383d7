//! Murmur server library logic.

pub mod api;
pub mod config;
pub mod sessions;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use config::Config;
use murmur_voice::backends::{OpenAiChatModel, PiperEngine, WhisperCliEngine};
use murmur_voice::tts::ARTIFACT_PREFIX;
use murmur_voice::{ResourceGuard, VoiceEngines, VoiceError, WorkerPool};
use serde_json::{json, Value};
use sessions::SessionRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Maximum request body size (16 MiB), above the recognizer's input limit.
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Open pipeline sessions.
    pub sessions: SessionRegistry,
    /// Directory uploaded audio is spooled to.
    pub upload_dir: PathBuf,
    /// Directory persisted replies are served from under `/audio`.
    pub audio_dir: PathBuf,
}

impl AppState {
    pub fn new(config: &Config, engines: VoiceEngines) -> Self {
        let voice = Arc::new(config.voice.clone());
        let pool = WorkerPool::new(voice.pipeline.worker_threads);
        let audio_dir = voice.synthesizer.output_dir.clone();
        Self {
            sessions: SessionRegistry::new(
                voice,
                engines,
                pool,
                ResourceGuard::new(),
                config.server.max_sessions,
            ),
            upload_dir: config.server.upload_dir.clone(),
            audio_dir,
        }
    }
}

/// Builds the subprocess and HTTP engines named by `config`.
///
/// # Errors
///
/// Returns `VoiceError::Config` if the chat model client cannot be built.
pub fn build_engines(config: &Config) -> Result<VoiceEngines, VoiceError> {
    let recognition = WhisperCliEngine::new(&config.whisper.binary, &config.whisper.model)
        .with_timeout(config.whisper.timeout());
    let synthesis = PiperEngine::new(&config.piper.binary, &config.piper.model)
        .with_sample_rate(config.piper.sample_rate)
        .with_timeout(config.piper.timeout());
    let model = OpenAiChatModel::new(
        &config.llm.base_url,
        &config.llm.model,
        config.llm.api_key.clone(),
        config.llm.timeout(),
    )?;
    Ok(VoiceEngines {
        recognition: Arc::new(recognition),
        synthesis: Arc::new(synthesis),
        model: Arc::new(model),
    })
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Lets only synthesized replies through to the `/audio` file service.
///
/// Anything else that happens to live in the output directory answers 404.
async fn synthesized_audio_only(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let name = req.uri().path().trim_start_matches('/');
    if is_synthesized_audio_name(name) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

fn is_synthesized_audio_name(name: &str) -> bool {
    name.starts_with(ARTIFACT_PREFIX)
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'@' | b'.'))
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    tracing::info!(path = %state.audio_dir.display(), "serving synthesized audio at /audio");

    let audio = Router::new()
        .fallback_service(ServeDir::new(&state.audio_dir))
        .layer(axum::middleware::from_fn(synthesized_audio_only));

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/voice-chat", post(api::voice_chat_handler))
        .route("/api/v1/text-chat", post(api::text_chat_handler))
        .route(
            "/api/v1/sessions/{sessionId}",
            delete(api::close_session_handler),
        )
        .nest_service("/audio", audio)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_reply_file_names_are_served() {
        assert!(is_synthesized_audio_name("tts-2025-01-01@0123abcd.wav"));
        assert!(!is_synthesized_audio_name("kitchen.wav"));
        assert!(!is_synthesized_audio_name("0b7c9f2e_question.wav"));
        assert!(!is_synthesized_audio_name("tts-x/../kitchen.wav"));
        assert!(!is_synthesized_audio_name(""));
    }
}
