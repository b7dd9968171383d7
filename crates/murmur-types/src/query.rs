//! Response bodies for voice and text queries.
//!
//! Field names are snake_case on the wire, matching what existing clients of
//! the voice-chat endpoints expect.

use serde::{Deserialize, Serialize};

/// Overall outcome of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Failed,
}

/// Response to a voice query (recognition → dialogue → synthesis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChatResponse {
    pub session_id: String,
    pub recognized_text: String,
    pub response_text: String,
    /// Relative URL of a persisted audio reply, when one was written to disk.
    pub audio_url: Option<String>,
    /// Base64-encoded audio reply, when synthesis ran in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    pub status: QueryStatus,
}

/// Response to a text query (dialogue → synthesis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChatResponse {
    pub session_id: String,
    pub response_text: String,
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    pub status: QueryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_response_omits_absent_base64() {
        let body = VoiceChatResponse {
            session_id: "s-1".to_string(),
            recognized_text: "hello".to_string(),
            response_text: "hi there".to_string(),
            audio_url: None,
            audio_base64: None,
            status: QueryStatus::Success,
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["status"], "success");
        assert!(json["audio_url"].is_null());
        assert!(json.get("audio_base64").is_none());
    }
}
