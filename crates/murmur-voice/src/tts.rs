//! Speech synthesis stage.
//!
//! The synthesizer runs in one of two modes fixed by
//! [`SynthesizerConfig::delete_audio_file`]:
//!
//! - **ephemeral** (`true`): audio is produced in memory and never touches
//!   storage.
//! - **persistent** (`false`): every attempt writes a fresh
//!   `tts-<date>@<hex>.<ext>` file under the output directory.
//!
//! Both modes retry up to `max_attempts` times and degrade to `None` on
//! exhaustion.

use crate::codec::{self, AudioSource, ChunkSink};
use crate::config::SynthesizerConfig;
use crate::engine::{SynthesisEngine, SynthesisTarget};
use crate::error::VoiceError;
use crate::markdown::clean_markdown;
use crate::retry::RetryPolicy;
use crate::worker::WorkerPool;
use murmur_types::AudioContainer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Audio produced by one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisArtifact {
    Buffer {
        bytes: Vec<u8>,
        container: AudioContainer,
    },
    File {
        path: PathBuf,
        container: AudioContainer,
    },
}

impl SynthesisArtifact {
    pub fn container(&self) -> AudioContainer {
        match self {
            Self::Buffer { container, .. } | Self::File { container, .. } => *container,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Buffer { .. } => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Buffer { bytes, .. } => Some(bytes),
            Self::File { .. } => None,
        }
    }

    fn into_source(self) -> AudioSource {
        match self {
            Self::Buffer { bytes, container } => AudioSource::Bytes {
                data: bytes,
                container,
            },
            Self::File { path, .. } => AudioSource::File(path),
        }
    }
}

/// What [`SpeechSynthesizer::synthesize_one_utterance`] should speak.
#[derive(Debug, Clone)]
pub enum UtteranceContent {
    /// Text to synthesize.
    Text(String),
    /// An already-produced audio file to stream as-is.
    File(PathBuf),
}

/// File name prefix of every persisted synthesis file.
pub const ARTIFACT_PREFIX: &str = "tts-";

/// Generates a collision-free name for a persisted synthesis file.
pub fn unique_filename(container: AudioContainer) -> String {
    format!(
        "{}{}@{}{}",
        ARTIFACT_PREFIX,
        chrono::Local::now().format("%Y-%m-%d"),
        Uuid::new_v4().simple(),
        container.extension()
    )
}

#[derive(Clone)]
pub struct SpeechSynthesizer {
    engine: Arc<dyn SynthesisEngine>,
    config: SynthesizerConfig,
    pool: WorkerPool,
    policy: RetryPolicy,
}

impl SpeechSynthesizer {
    pub fn new(
        engine: Arc<dyn SynthesisEngine>,
        config: SynthesizerConfig,
        pool: WorkerPool,
    ) -> Self {
        let policy = RetryPolicy::all_but_validation(config.max_attempts);
        Self {
            engine,
            config,
            pool,
            policy,
        }
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    pub fn is_ephemeral(&self) -> bool {
        self.config.delete_audio_file
    }

    /// Synthesizes `text` in the configured mode.
    pub async fn synthesize(&self, text: &str) -> Option<SynthesisArtifact> {
        let container = self.config.container;
        if self.is_ephemeral() {
            self.synthesize_to_buffer(text)
                .await
                .map(|bytes| SynthesisArtifact::Buffer { bytes, container })
        } else {
            self.synthesize_to_file(text)
                .await
                .map(|path| SynthesisArtifact::File { path, container })
        }
    }

    /// Synthesizes `text` into memory. `None` means no audio was produced.
    pub async fn synthesize_to_buffer(&self, text: &str) -> Option<Vec<u8>> {
        let text = spoken_text(text)?;
        let outcome = self
            .policy
            .run("synthesize_to_buffer", |_| {
                let engine = self.engine.clone();
                let text = text.clone();
                async move {
                    let bytes = self
                        .pool
                        .run(move || engine.synthesize(&text, SynthesisTarget::Memory))
                        .await?;
                    if bytes.is_empty() {
                        return Err(VoiceError::Tts("engine returned no audio".to_string()));
                    }
                    Ok(bytes)
                }
            })
            .await;
        self.settle(outcome.result, outcome.attempts)
    }

    /// Synthesizes `text` into a new file under the output directory.
    ///
    /// An attempt counts only if the file exists afterwards; a failed
    /// attempt's partial file is removed before the next one starts.
    pub async fn synthesize_to_file(&self, text: &str) -> Option<PathBuf> {
        let text = spoken_text(text)?;
        let outcome = self
            .policy
            .run("synthesize_to_file", |_| {
                let text = text.clone();
                async move { self.attempt_file(text).await }
            })
            .await;
        self.settle(outcome.result, outcome.attempts)
    }

    async fn attempt_file(&self, text: Arc<str>) -> Result<PathBuf, VoiceError> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let path = self
            .config
            .output_dir
            .join(unique_filename(self.config.container));

        let engine = self.engine.clone();
        let target = path.clone();
        let result = self
            .pool
            .run(move || engine.synthesize(&text, SynthesisTarget::File(&target)))
            .await;

        match result {
            Ok(_) if path.exists() => Ok(path),
            Ok(_) => Err(VoiceError::Tts(format!(
                "engine reported success but wrote no file to {}",
                path.display()
            ))),
            Err(e) => {
                remove_partial(&path).await;
                Err(e)
            }
        }
    }

    fn settle<T>(&self, result: Result<T, VoiceError>, attempts: u32) -> Option<T> {
        match result {
            Ok(value) => {
                tracing::debug!(attempts, "speech synthesized");
                Some(value)
            }
            Err(e) => {
                tracing::error!(
                    attempts,
                    max_attempts = self.policy.max_attempts(),
                    error = %e,
                    "speech synthesis failed, no audio produced"
                );
                None
            }
        }
    }

    /// Synthesizes `text` and delivers it to `sink` as encoded chunks.
    ///
    /// Returns the number of chunks delivered. Delivery blocks while the
    /// channel is full, so the receiver must be drained concurrently with
    /// this call unless its capacity covers every chunk.
    pub async fn synthesize_to_stream(
        &self,
        text: &str,
        sink: &ChunkSink,
    ) -> Result<usize, VoiceError> {
        let artifact = self
            .synthesize(text)
            .await
            .ok_or_else(|| VoiceError::Tts("synthesis produced no audio".to_string()))?;
        match artifact {
            SynthesisArtifact::File { path, .. } => self.stream_file(path, sink).await,
            buffer => self.stream_source(buffer.into_source(), sink).await,
        }
    }

    /// Streams an existing audio file through the codec.
    ///
    /// In ephemeral mode a file under the output directory is deleted once
    /// it has been streamed. The receiver must be drained while this runs,
    /// as with [`synthesize_to_stream`](Self::synthesize_to_stream).
    pub async fn stream_file(&self, path: PathBuf, sink: &ChunkSink) -> Result<usize, VoiceError> {
        let result = self
            .stream_source(AudioSource::File(path.clone()), sink)
            .await;
        if self.config.delete_audio_file && path.exists() && self.is_managed(&path) {
            remove_partial(&path).await;
        }
        result
    }

    // Decoding holds a worker slot; delivery waits on the consumer and
    // does not.
    async fn stream_source(
        &self,
        source: AudioSource,
        sink: &ChunkSink,
    ) -> Result<usize, VoiceError> {
        let encoding = self.config.encoding;
        let sink = sink.clone();
        self.pool
            .run_releasable(move |slot| {
                let stream = codec::encode(source, encoding)?;
                slot.release();
                codec::pump_blocking(stream, &sink)
            })
            .await
    }

    /// Speaks one utterance for `session_id`, tagging it with
    /// `utterance_id` or a freshly generated one, which is returned.
    pub async fn synthesize_one_utterance(
        &self,
        session_id: &str,
        content: UtteranceContent,
        utterance_id: Option<String>,
        sink: &ChunkSink,
    ) -> Result<String, VoiceError> {
        let utterance_id = utterance_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let result = match content {
            UtteranceContent::Text(text) => self.synthesize_to_stream(&text, sink).await,
            UtteranceContent::File(path) => {
                if !path.exists() {
                    return Err(VoiceError::FileNotFound(path));
                }
                self.stream_file(path, sink).await
            }
        };
        match result {
            Ok(chunks) => {
                tracing::info!(session_id, utterance_id = %utterance_id, chunks, "utterance delivered");
                Ok(utterance_id)
            }
            Err(e) => {
                tracing::error!(session_id, utterance_id = %utterance_id, error = %e, "utterance failed");
                Err(e)
            }
        }
    }

    pub async fn start_session(&self, session_id: &str) -> Result<(), VoiceError> {
        let engine = self.engine.clone();
        let session_id = session_id.to_string();
        self.pool.run(move || engine.start_session(&session_id)).await
    }

    /// Releases the engine's per-session state.
    pub async fn finish_session(&self, session_id: &str) -> Result<(), VoiceError> {
        let engine = self.engine.clone();
        let session_id = session_id.to_string();
        self.pool
            .run(move || engine.finish_session(&session_id))
            .await
    }

    fn is_managed(&self, path: &Path) -> bool {
        match (
            std::fs::canonicalize(path),
            std::fs::canonicalize(&self.config.output_dir),
        ) {
            (Ok(path), Ok(dir)) => path.starts_with(dir),
            _ => path.starts_with(&self.config.output_dir),
        }
    }
}

/// Markup-free text to speak, or `None` when nothing speakable remains.
fn spoken_text(text: &str) -> Option<Arc<str>> {
    let cleaned = clean_markdown(text);
    if cleaned.is_empty() {
        tracing::warn!("nothing to synthesize after removing markup");
        return None;
    }
    Some(Arc::from(cleaned))
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed synthesis file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to remove synthesis file")
        }
    }
}
