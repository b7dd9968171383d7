//! Speech recognition stage.

use crate::codec::{opus, wav};
use crate::config::RecognizerConfig;
use crate::engine::{InferenceOptions, RecognitionEngine, RecognitionInput, PCM_SAMPLE_RATE};
use crate::error::VoiceError;
use crate::guard::ResourceGuard;
use crate::retry::RetryPolicy;
use crate::worker::WorkerPool;
use murmur_types::{AudioContainer, FrameFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Longest session id accepted as a retention file stem.
const MAX_SESSION_ID_LEN: usize = 64;

/// Outcome of one recognition call. Empty `text` is the only failure signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,
    /// Retained copy of the input audio, when retention is enabled.
    pub artifact_path: Option<PathBuf>,
    /// Attempts made. Inputs rejected before inference count as one.
    pub attempts: u32,
}

impl RecognitionResult {
    fn failed(attempts: u32) -> Self {
        Self {
            text: String::new(),
            artifact_path: None,
            attempts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Converts audio into text through a [`RecognitionEngine`].
///
/// Resource faults (headroom, I/O) are retried under the configured policy;
/// validation and inference failures end the call at once. Every failure
/// degrades to an empty [`RecognitionResult`] instead of an error.
#[derive(Clone)]
pub struct SpeechRecognizer {
    engine: Arc<dyn RecognitionEngine>,
    config: RecognizerConfig,
    guard: ResourceGuard,
    pool: WorkerPool,
    policy: RetryPolicy,
}

impl SpeechRecognizer {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        config: RecognizerConfig,
        guard: ResourceGuard,
        pool: WorkerPool,
    ) -> Self {
        let policy = RetryPolicy::transient_only(config.max_attempts, config.retry_delay());
        Self {
            engine,
            config,
            guard,
            pool,
            policy,
        }
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    fn retains_audio(&self) -> bool {
        !self.config.delete_audio_file
    }

    fn options(&self) -> InferenceOptions {
        InferenceOptions {
            language: self.config.language.clone(),
            ..InferenceOptions::default()
        }
    }

    /// Recognizes an ordered sequence of audio frames.
    ///
    /// Frames are merged into one contiguous 16 kHz PCM payload first;
    /// Opus frames are decoded, PCM frames concatenated as-is.
    pub async fn recognize_from_frames(
        &self,
        frames: Vec<Vec<u8>>,
        session_id: &str,
        format: FrameFormat,
    ) -> RecognitionResult {
        let frame_count = frames.len();
        let pcm = match self.pool.run(move || merge_frames(frames, format)).await {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::error!(session_id, %format, error = %e, "failed to merge audio frames");
                return RecognitionResult::failed(1);
            }
        };
        tracing::debug!(session_id, frame_count, pcm_bytes = pcm.len(), "merged audio frames");

        let target = match self.retention_target(session_id, AudioContainer::Wav) {
            Ok(target) => target,
            Err(e) => return self.reject(session_id, e),
        };

        let outcome = self
            .policy
            .run("recognize_frames", |_| {
                let pcm = pcm.clone();
                let target = target.clone();
                async move {
                    if let Some(target) = &target {
                        self.persist_pcm(&pcm, target).await?;
                    }
                    self.infer(RecognitionInput::pcm(pcm)).await
                }
            })
            .await;

        self.finish(session_id, outcome.result, outcome.attempts, target)
    }

    /// Recognizes a complete audio file. The caller's file is never deleted.
    pub async fn recognize_from_file(&self, path: &Path, session_id: &str) -> RecognitionResult {
        let container = match recognizable_container(path.extension().and_then(|e| e.to_str())) {
            Ok(container) => container,
            Err(e) => return self.reject(session_id, e),
        };
        if !path.exists() {
            return self.reject(session_id, VoiceError::FileNotFound(path.to_path_buf()));
        }

        let target = match self.retention_target(session_id, container) {
            Ok(target) => target,
            Err(e) => return self.reject(session_id, e),
        };

        let outcome = self
            .policy
            .run("recognize_file", |_| {
                let target = target.clone();
                async move {
                    let audio = tokio::fs::read(path).await?;
                    if let Some(target) = &target {
                        self.persist_bytes(&audio, target).await?;
                    }
                    self.infer(RecognitionInput::container(audio, container))
                        .await
                }
            })
            .await;

        self.finish(session_id, outcome.result, outcome.attempts, target)
    }

    /// Recognizes an in-memory audio payload in the container named by
    /// `extension` (with or without the leading dot).
    pub async fn recognize_from_stream(
        &self,
        audio: Vec<u8>,
        session_id: &str,
        extension: &str,
    ) -> RecognitionResult {
        let container = match recognizable_container(Some(extension)) {
            Ok(container) => container,
            Err(e) => return self.reject(session_id, e),
        };
        if audio.is_empty() {
            return self.reject(
                session_id,
                VoiceError::Validation("audio payload is empty".to_string()),
            );
        }

        let target = match self.retention_target(session_id, container) {
            Ok(target) => target,
            Err(e) => return self.reject(session_id, e),
        };

        let outcome = self
            .policy
            .run("recognize_stream", |_| {
                let audio = audio.clone();
                let target = target.clone();
                async move {
                    if let Some(target) = &target {
                        self.persist_bytes(&audio, target).await?;
                    }
                    self.infer(RecognitionInput::container(audio, container))
                        .await
                }
            })
            .await;

        self.finish(session_id, outcome.result, outcome.attempts, target)
    }

    /// Where the input of `session_id` is retained, if retention is on.
    fn retention_target(
        &self,
        session_id: &str,
        container: AudioContainer,
    ) -> Result<Option<PathBuf>, VoiceError> {
        if !self.retains_audio() {
            return Ok(None);
        }
        validate_session_id(session_id)?;
        Ok(Some(
            self.config
                .output_dir
                .join(format!("{}{}", session_id, container.extension())),
        ))
    }

    async fn persist_bytes(&self, audio: &[u8], target: &Path) -> Result<(), VoiceError> {
        let dir = self.config.output_dir.as_path();
        if target.parent() != Some(dir) {
            return Err(VoiceError::Validation(format!(
                "retention target {} is outside {}",
                target.display(),
                dir.display()
            )));
        }
        tokio::fs::create_dir_all(dir).await?;
        self.guard.check_headroom(dir, audio.len() as u64)?;
        tokio::fs::write(target, audio).await?;
        Ok(())
    }

    async fn persist_pcm(&self, pcm: &[u8], target: &Path) -> Result<(), VoiceError> {
        let wav = wav::pcm_to_wav(pcm, PCM_SAMPLE_RATE)?;
        self.persist_bytes(&wav, target).await
    }

    async fn infer(&self, input: RecognitionInput) -> Result<String, VoiceError> {
        let engine = self.engine.clone();
        let options = self.options();
        let started = Instant::now();
        let text = self
            .pool
            .run(move || engine.infer(&input, &options))
            .await?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recognition inference finished"
        );
        Ok(text.trim().to_string())
    }

    fn reject(&self, session_id: &str, err: VoiceError) -> RecognitionResult {
        tracing::error!(session_id, error = %err, "rejected recognition input");
        RecognitionResult::failed(1)
    }

    fn finish(
        &self,
        session_id: &str,
        result: Result<String, VoiceError>,
        attempts: u32,
        artifact_path: Option<PathBuf>,
    ) -> RecognitionResult {
        match result {
            Ok(text) => {
                if text.is_empty() {
                    tracing::warn!(session_id, "recognition produced an empty transcript");
                } else {
                    tracing::info!(session_id, attempts, chars = text.chars().count(), "recognized speech");
                }
                RecognitionResult {
                    text,
                    artifact_path,
                    attempts,
                }
            }
            Err(e) => {
                tracing::error!(
                    session_id,
                    attempts,
                    max_attempts = self.policy.max_attempts(),
                    error = %e,
                    "speech recognition failed"
                );
                RecognitionResult::failed(attempts)
            }
        }
    }
}

/// Accepts ids made of ASCII letters, digits, `-` and `_`, at most
/// 64 bytes long. Anything else could escape the retention directory.
pub fn validate_session_id(session_id: &str) -> Result<(), VoiceError> {
    let plain = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if plain {
        Ok(())
    } else {
        Err(VoiceError::Validation(format!(
            "invalid session id {:?}",
            session_id
        )))
    }
}

fn recognizable_container(extension: Option<&str>) -> Result<AudioContainer, VoiceError> {
    let extension = extension.unwrap_or_default();
    AudioContainer::from_extension(extension)
        .filter(|c| c.is_recognizable())
        .ok_or_else(|| VoiceError::UnsupportedFormat(extension.to_string()))
}

fn merge_frames(frames: Vec<Vec<u8>>, format: FrameFormat) -> Result<Vec<u8>, VoiceError> {
    let pcm = match format {
        FrameFormat::Pcm => frames.concat(),
        FrameFormat::Opus => wav::samples_to_le_bytes(&opus::decode_packets(&frames)?),
    };
    if pcm.is_empty() {
        return Err(VoiceError::Validation("no audio in frames".to_string()));
    }
    Ok(pcm)
}
