use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::{stream, StreamExt};
use murmur_server::config::Config;
use murmur_server::{app, AppState};
use murmur_types::Message;
use murmur_voice::{
    InferenceOptions, LanguageModel, RecognitionEngine, RecognitionInput, SynthesisEngine,
    SynthesisTarget, TextStream, VoiceEngines, VoiceError,
};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const BOUNDARY: &str = "murmur-test-boundary";

struct FixedRecognizer(String);

impl RecognitionEngine for FixedRecognizer {
    fn infer(&self, _input: &RecognitionInput, _options: &InferenceOptions) -> Result<String, VoiceError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct EchoSynth {
    finished: Mutex<Vec<String>>,
}

impl SynthesisEngine for EchoSynth {
    fn synthesize(&self, text: &str, target: SynthesisTarget<'_>) -> Result<Vec<u8>, VoiceError> {
        match target {
            SynthesisTarget::Memory => Ok(text.as_bytes().to_vec()),
            SynthesisTarget::File(path) => {
                std::fs::write(path, text.as_bytes())?;
                Ok(Vec::new())
            }
        }
    }

    fn finish_session(&self, session_id: &str) -> Result<(), VoiceError> {
        self.finished.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct CountingModel {
    calls: AtomicU32,
    history_lengths: Mutex<Vec<usize>>,
}

#[async_trait]
impl LanguageModel for CountingModel {
    async fn stream_response(
        &self,
        _session_id: &str,
        history: &[Message],
    ) -> Result<TextStream, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history_lengths.lock().unwrap().push(history.len());
        let fragments: Vec<Result<String, VoiceError>> =
            vec![Ok("Sure, ".to_string()), Ok("done.".to_string())];
        Ok(stream::iter(fragments).boxed())
    }
}

struct TestServer {
    router: Router,
    model: Arc<CountingModel>,
    synth: Arc<EchoSynth>,
    upload_dir: tempfile::TempDir,
    output_dir: tempfile::TempDir,
}

fn server(transcript: &str, persistent: bool) -> TestServer {
    server_with(transcript, |config| {
        config.voice.synthesizer.delete_audio_file = !persistent;
    })
}

fn server_with(transcript: &str, configure: impl FnOnce(&mut Config)) -> TestServer {
    let upload_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.server.upload_dir = upload_dir.path().to_path_buf();
    config.voice.recognizer.output_dir = output_dir.path().join("asr");
    config.voice.synthesizer.output_dir = output_dir.path().to_path_buf();
    configure(&mut config);

    let model = Arc::new(CountingModel::default());
    let synth = Arc::new(EchoSynth::default());
    let engines = VoiceEngines {
        recognition: Arc::new(FixedRecognizer(transcript.to_string())),
        synthesis: synth.clone(),
        model: model.clone(),
    };
    let state = Arc::new(AppState::new(&config, engines));

    TestServer {
        router: app(state),
        model,
        synth,
        upload_dir,
        output_dir,
    }
}

fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Body {
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, file_name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    Body::from(body)
}

fn voice_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/voice-chat")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(multipart(parts))
        .unwrap()
}

fn text_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/text-chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let s = server("unused", false);
    let (status, json) = send_json(
        &s.router,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn voice_chat_answers_and_removes_upload() {
    let s = server("what's the weather", false);

    let (status, json) = send_json(
        &s.router,
        voice_request(&[
            ("audio", Some("question.wav"), b"RIFF-not-really"),
            ("session_id", None, b"living-room"),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["session_id"], "living-room");
    assert_eq!(json["recognized_text"], "what's the weather");
    assert_eq!(json["response_text"], "Sure, done.");
    assert_eq!(json["status"], "success");
    assert!(json["audio_url"].is_null());
    assert_eq!(json["audio_base64"], "U3VyZSwgZG9uZS4=");
    assert!(is_empty_dir(s.upload_dir.path()), "spooled upload must be removed");
}

#[tokio::test]
async fn voice_chat_without_audio_is_rejected() {
    let s = server("unused", false);
    let (status, json) = send_json(&s.router, voice_request(&[("session_id", None, b"abc")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("no audio"));
    assert_eq!(s.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unintelligible_audio_is_a_server_error() {
    let s = server("   ", false);
    let (status, json) = send_json(
        &s.router,
        voice_request(&[("audio", Some("noise.mp3"), b"ID3")]),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("no transcript"));
    assert_eq!(s.model.calls.load(Ordering::SeqCst), 0);
    assert!(is_empty_dir(s.upload_dir.path()));
}

#[tokio::test]
async fn empty_text_is_a_bad_request() {
    let s = server("unused", false);
    let (status, _) = send_json(&s.router, text_request(serde_json::json!({ "text": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(s.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn text_chat_continues_a_session() {
    let s = server("unused", false);

    let (status, first) =
        send_json(&s.router, text_request(serde_json::json!({ "text": "hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    let session_id = first["session_id"].as_str().unwrap().to_string();

    let (status, second) = send_json(
        &s.router,
        text_request(serde_json::json!({ "text": "again", "session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["session_id"], session_id.as_str());
    assert_eq!(*s.model.history_lengths.lock().unwrap(), vec![1, 3]);
}

#[tokio::test]
async fn persisted_reply_is_served_under_audio() {
    let s = server("unused", true);

    let (status, json) =
        send_json(&s.router, text_request(serde_json::json!({ "text": "read it" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("audio_base64").is_none());
    let url = json["audio_url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/audio/tts-"));

    let (status, body) = send(
        &s.router,
        Request::builder().uri(url.as_str()).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Sure, done.");
}

#[tokio::test]
async fn closing_a_session_releases_it() {
    let s = server("unused", false);
    let (_, json) = send_json(
        &s.router,
        text_request(serde_json::json!({ "text": "hi", "session_id": "kitchen" })),
    )
    .await;
    assert_eq!(json["session_id"], "kitchen");

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/api/v1/sessions/kitchen")
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&s.router, delete()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(*s.synth.finished.lock().unwrap(), vec!["kitchen".to_string()]);

    let (status, _) = send(&s.router, delete()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn path_like_session_id_is_a_bad_request() {
    let s = server_with("hello", |config| {
        config.voice.recognizer.delete_audio_file = false;
    });

    let (status, _) = send_json(
        &s.router,
        voice_request(&[
            ("audio", Some("question.wav"), b"RIFF"),
            ("session_id", None, b"../escaped"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!s.output_dir.path().join("escaped.wav").exists());
    assert!(is_empty_dir(s.upload_dir.path()));

    let (status, _) = send_json(
        &s.router,
        text_request(serde_json::json!({ "text": "hi", "session_id": "a/b" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(s.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn only_synthesized_replies_are_served_under_audio() {
    // Recordings retained into the served directory must still stay private.
    let s = server_with("hello", |config| {
        config.voice.recognizer.output_dir = config.voice.synthesizer.output_dir.clone();
        config.voice.recognizer.delete_audio_file = false;
    });

    let (status, _) = send_json(
        &s.router,
        voice_request(&[
            ("audio", Some("question.wav"), b"RIFF-recording"),
            ("session_id", None, b"kitchen"),
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(s.output_dir.path().join("kitchen.wav").exists());
    std::fs::write(
        s.output_dir.path().join("0b7c9f2e_question.wav"),
        b"spooled",
    )
    .unwrap();

    for uri in ["/audio/kitchen.wav", "/audio/0b7c9f2e_question.wav"] {
        let (status, _) = send(
            &s.router,
            Request::builder().uri(uri).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} must not be served", uri);
    }
}
