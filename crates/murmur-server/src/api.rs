//! Voice and text chat handlers.

use crate::AppState;
use axum::{
    extract::{Extension, Multipart, Path as UrlPath},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use murmur_types::{QueryStatus, TextChatResponse, VoiceChatResponse};
use murmur_voice::{SynthesisArtifact, VoiceError, VoiceInput};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Name given to an upload that arrives without a usable file name.
const DEFAULT_UPLOAD_NAME: &str = "audio.wav";

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        if e.is_validation() {
            ApiError::BadRequest(e.to_string())
        } else {
            ApiError::InternalServerError(e.to_string())
        }
    }
}

/// Request body for `POST /api/v1/text-chat`.
#[derive(Debug, Deserialize)]
pub struct TextChatRequest {
    pub text: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Handler for `POST /api/v1/voice-chat`.
///
/// Expects a multipart body with an `audio` file field and an optional
/// `session_id` text field. The upload is spooled under the upload
/// directory for the duration of the request and removed afterwards.
pub async fn voice_chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<VoiceChatResponse>, ApiError> {
    let mut audio: Option<(String, Vec<u8>)> = None;
    let mut session_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("multipart error: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("audio") => {
                let file_name = upload_name(field.file_name());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read audio: {}", e)))?;
                audio = Some((file_name, data.to_vec()));
            }
            Some("session_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read session_id: {}", e)))?;
                session_id = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    let (file_name, data) =
        audio.ok_or_else(|| ApiError::BadRequest("no audio file provided".to_string()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("audio file is empty".to_string()));
    }

    let (id, coordinator) = state.sessions.checkout(session_id.as_deref())?;
    let spooled = spool_upload(&state.upload_dir, &file_name, &data).await?;
    let result = coordinator
        .lock()
        .await
        .handle_voice_query(VoiceInput::File(spooled.clone()), Some(&id))
        .await;
    remove_spooled(&spooled).await;

    let outcome = result.inspect_err(|e| {
        tracing::error!(session_id = %id, error = %e, "voice chat failed");
    })?;
    let (audio_url, audio_base64) = audio_fields(outcome.artifact.as_ref());
    Ok(Json(VoiceChatResponse {
        session_id: outcome.session_id,
        recognized_text: outcome.recognized_text,
        response_text: outcome.response_text,
        audio_url,
        audio_base64,
        status: QueryStatus::Success,
    }))
}

/// Handler for `POST /api/v1/text-chat`.
pub async fn text_chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<TextChatRequest>,
) -> Result<Json<TextChatResponse>, ApiError> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text is empty".to_string()));
    }

    let requested = request.session_id.as_deref().filter(|id| !id.trim().is_empty());
    let (id, coordinator) = state.sessions.checkout(requested)?;
    let outcome = coordinator
        .lock()
        .await
        .handle_text_query(text, Some(&id))
        .await
        .inspect_err(|e| {
            tracing::error!(session_id = %id, error = %e, "text chat failed");
        })?;

    let (audio_url, audio_base64) = audio_fields(outcome.artifact.as_ref());
    Ok(Json(TextChatResponse {
        session_id: outcome.session_id,
        response_text: outcome.response_text,
        audio_url,
        audio_base64,
        status: QueryStatus::Success,
    }))
}

/// Handler for `DELETE /api/v1/sessions/{sessionId}`.
pub async fn close_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    UrlPath(session_id): UrlPath<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.close(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session not found: {}", session_id)))
    }
}

/// Final path component of a client-supplied file name.
fn upload_name(raw: Option<&str>) -> String {
    raw.and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(DEFAULT_UPLOAD_NAME)
        .to_string()
}

async fn spool_upload(dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf, ApiError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("failed to create upload dir: {}", e)))?;
    let path = dir.join(format!("{}_{}", Uuid::new_v4(), file_name));
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("failed to spool upload: {}", e)))?;
    Ok(path)
}

async fn remove_spooled(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::error!(path = %path.display(), error = %e, "failed to remove spooled upload");
        }
    }
}

/// `audio_url` for a persisted reply, base64 audio for an in-memory one.
fn audio_fields(artifact: Option<&SynthesisArtifact>) -> (Option<String>, Option<String>) {
    match artifact {
        Some(SynthesisArtifact::File { path, .. }) => (
            path.file_name()
                .map(|name| format!("/audio/{}", name.to_string_lossy())),
            None,
        ),
        Some(SynthesisArtifact::Buffer { bytes, .. }) => (None, Some(BASE64_STANDARD.encode(bytes))),
        None => (None, None),
    }
}
