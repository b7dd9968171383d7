use crate::engine::{LanguageModel, TextStream};
use crate::error::VoiceError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{future, StreamExt};
use murmur_types::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SSE_DONE: &str = "[DONE]";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    user: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Streaming chat model behind an OpenAI-compatible `/chat/completions`
/// endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Extracts the text fragment carried by one SSE `data` payload.
fn parse_chunk(data: &str) -> Result<Option<String>, VoiceError> {
    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| VoiceError::Llm(format!("malformed stream chunk: {}: {}", e, data)))?;
    if let Some(error) = chunk.error {
        return Err(VoiceError::Llm(error.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn stream_response(
        &self,
        session_id: &str,
        history: &[Message],
    ) -> Result<TextStream, VoiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: history,
            stream: true,
            user: session_id,
        };
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VoiceError::Llm(format!("chat request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Llm(format!(
                "chat endpoint returned {}: {}",
                status,
                detail.trim()
            )));
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(event) if event.data.trim() == SSE_DONE))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => parse_chunk(&event.data).transpose(),
                    Err(e) => Some(Err(VoiceError::Llm(format!("SSE stream error: {}", e)))),
                })
            });
        Ok(stream.boxed())
    }
}
