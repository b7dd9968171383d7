//! Per-session recognition → dialogue → synthesis chain.

use crate::config::VoiceConfig;
use crate::dialogue::{AbortHandle, DialogueSession};
use crate::engine::{LanguageModel, RecognitionEngine, SynthesisEngine};
use crate::error::VoiceError;
use crate::guard::ResourceGuard;
use crate::janitor::TempFileJanitor;
use crate::stt::{validate_session_id, RecognitionResult, SpeechRecognizer};
use crate::tts::{SpeechSynthesizer, SynthesisArtifact};
use crate::worker::WorkerPool;
use chrono::{DateTime, Utc};
use murmur_types::FrameFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// The backends a coordinator drives.
#[derive(Clone)]
pub struct VoiceEngines {
    pub recognition: Arc<dyn RecognitionEngine>,
    pub synthesis: Arc<dyn SynthesisEngine>,
    pub model: Arc<dyn LanguageModel>,
}

/// Audio handed to [`PipelineCoordinator::handle_voice_query`].
#[derive(Debug, Clone)]
pub enum VoiceInput {
    /// A caller-owned file; it is never deleted by the pipeline.
    File(PathBuf),
    /// A complete payload in the container named by `extension`.
    Stream { audio: Vec<u8>, extension: String },
    /// Ordered audio frames.
    Frames {
        frames: Vec<Vec<u8>>,
        format: FrameFormat,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceQueryOutcome {
    pub session_id: String,
    pub recognized_text: String,
    pub response_text: String,
    /// `None` when synthesis failed; the text reply still stands.
    pub artifact: Option<SynthesisArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQueryOutcome {
    pub session_id: String,
    pub response_text: String,
    pub artifact: Option<SynthesisArtifact>,
}

/// One user interaction scope and its dialogue.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    dialogue: DialogueSession,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dialogue(&self) -> &DialogueSession {
        &self.dialogue
    }
}

/// Composes the three stages for one session at a time.
///
/// Stages run strictly in sequence; a failed recognition or dialogue turn
/// ends the request, a failed synthesis only drops the audio.
pub struct PipelineCoordinator {
    config: Arc<VoiceConfig>,
    recognizer: SpeechRecognizer,
    synthesizer: SpeechSynthesizer,
    model: Arc<dyn LanguageModel>,
    janitor: TempFileJanitor,
    session: Option<Session>,
}

impl PipelineCoordinator {
    /// Builds a coordinator over a private copy of `config`'s stage
    /// sections.
    pub fn new(
        config: Arc<VoiceConfig>,
        engines: &VoiceEngines,
        pool: WorkerPool,
        guard: ResourceGuard,
    ) -> Self {
        let recognizer = SpeechRecognizer::new(
            engines.recognition.clone(),
            config.recognizer.clone(),
            guard,
            pool.clone(),
        );
        let synthesizer =
            SpeechSynthesizer::new(engines.synthesis.clone(), config.synthesizer.clone(), pool);
        let janitor = TempFileJanitor::new(config.pipeline.janitor_delay());
        Self {
            config,
            recognizer,
            synthesizer,
            model: engines.model.clone(),
            janitor,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    /// Cancels the current dialogue turn, if any.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.session.as_ref().map(|s| s.dialogue.abort_handle())
    }

    pub fn recognizer(&self) -> &SpeechRecognizer {
        &self.recognizer
    }

    pub fn synthesizer(&self) -> &SpeechSynthesizer {
        &self.synthesizer
    }

    /// Recognizes `input`, answers it, and voices the answer.
    pub async fn handle_voice_query(
        &mut self,
        input: VoiceInput,
        session_id: Option<&str>,
    ) -> Result<VoiceQueryOutcome, VoiceError> {
        let session_id = self.open_session(session_id).await?;
        let started = Instant::now();

        let recognition = self.recognize(input, &session_id).await;
        if recognition.is_empty() {
            tracing::error!(session_id = %session_id, attempts = recognition.attempts, "no transcript, abandoning request");
            return Err(VoiceError::EmptyTranscript);
        }
        tracing::info!(
            session_id = %session_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recognition stage finished"
        );

        let response_text = self.respond(&recognition.text).await?;
        let artifact = self.voice(&session_id, &response_text).await;

        Ok(VoiceQueryOutcome {
            session_id,
            recognized_text: recognition.text,
            response_text,
            artifact,
        })
    }

    /// Answers `text` and voices the answer, skipping recognition.
    pub async fn handle_text_query(
        &mut self,
        text: &str,
        session_id: Option<&str>,
    ) -> Result<TextQueryOutcome, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::Validation("query text is empty".to_string()));
        }
        let session_id = self.open_session(session_id).await?;
        let response_text = self.respond(text).await?;
        let artifact = self.voice(&session_id, &response_text).await;
        Ok(TextQueryOutcome {
            session_id,
            response_text,
            artifact,
        })
    }

    /// Ends the current session, running every cleanup step even if one
    /// fails. Safe to call repeatedly.
    ///
    /// Returns the errors encountered; they are logged, never raised.
    pub async fn close(&mut self) -> Vec<VoiceError> {
        let mut errors = Vec::new();
        let Some(session) = self.session.take() else {
            return errors;
        };

        session.dialogue.abort_handle().abort();
        if let Err(e) = self.synthesizer.finish_session(&session.id).await {
            tracing::error!(session_id = %session.id, error = %e, "failed to release synthesis session");
            errors.push(e);
        }
        tracing::info!(
            session_id = %session.id,
            messages = session.dialogue.dialogue().len(),
            "session closed"
        );
        errors
    }

    async fn open_session(&mut self, requested: Option<&str>) -> Result<String, VoiceError> {
        if let Some(id) = requested {
            validate_session_id(id)?;
        }
        if let Some(current) = &self.session {
            if requested.map_or(true, |id| id == current.id) {
                return Ok(current.id.clone());
            }
            self.close().await;
        }

        let id = requested
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Err(e) = self.synthesizer.start_session(&id).await {
            tracing::warn!(session_id = %id, error = %e, "synthesis engine rejected session start");
        }
        let dialogue = DialogueSession::new(
            id.clone(),
            self.model.clone(),
            self.config.dialogue.system_prompt.as_deref(),
        );
        tracing::info!(session_id = %id, "session opened");
        self.session = Some(Session {
            id: id.clone(),
            created_at: Utc::now(),
            dialogue,
        });
        Ok(id)
    }

    async fn recognize(&self, input: VoiceInput, session_id: &str) -> RecognitionResult {
        match input {
            VoiceInput::File(path) => self.recognizer.recognize_from_file(&path, session_id).await,
            VoiceInput::Stream { audio, extension } => {
                self.recognizer
                    .recognize_from_stream(audio, session_id, &extension)
                    .await
            }
            VoiceInput::Frames { frames, format } => {
                self.recognizer
                    .recognize_from_frames(frames, session_id, format)
                    .await
            }
        }
    }

    async fn respond(&mut self, text: &str) -> Result<String, VoiceError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| VoiceError::Worker("no open session".to_string()))?;
        let started = Instant::now();
        match session.dialogue.converse(text).await {
            Ok(reply) => {
                tracing::info!(
                    session_id = %session.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dialogue stage finished"
                );
                Ok(reply)
            }
            Err(VoiceError::Aborted) => Err(VoiceError::Aborted),
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "dialogue failed, abandoning request");
                Err(e)
            }
        }
    }

    async fn voice(&self, session_id: &str, response_text: &str) -> Option<SynthesisArtifact> {
        let started = Instant::now();
        let artifact = self.synthesizer.synthesize(response_text).await;
        match &artifact {
            None => {
                tracing::warn!(session_id, "synthesis failed, replying with text only");
            }
            Some(artifact) => {
                tracing::info!(
                    session_id,
                    persistent = artifact.is_persistent(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "synthesis stage finished"
                );
                if let (Some(path), true) = (artifact.path(), self.config.pipeline.delete_audio) {
                    self.janitor
                        .schedule_delete(path, self.config.pipeline.artifact_exposure());
                }
            }
        }
        artifact
    }
}
