//! Pipeline configuration.
//!
//! `VoiceConfig` is loaded once per process and shared as an immutable
//! `Arc` snapshot; every session clones what it needs at creation so no
//! session can observe another's mutation.

use murmur_types::{AudioContainer, FrameFormat};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level voice pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub recognizer: RecognizerConfig,

    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    #[serde(default)]
    pub dialogue: DialogueConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Speech recognition settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    /// Directory retained input audio is written to.
    #[serde(default = "default_recognizer_output_dir")]
    pub output_dir: PathBuf,

    /// When `false`, input audio is retained under `output_dir`.
    #[serde(default = "default_true")]
    pub delete_audio_file: bool,

    /// Language hint passed to the recognition engine.
    #[serde(default = "default_language")]
    pub language: String,

    /// Total attempts for resource-class failures. Default: 2.
    #[serde(default = "default_recognizer_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds. Default: 1000.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesizerConfig {
    /// Directory synthesized files are written to in persistent mode.
    ///
    /// The server exposes this directory under `/audio`, so it must not be
    /// shared with retained input audio.
    #[serde(default = "default_synthesizer_output_dir")]
    pub output_dir: PathBuf,

    /// `true` selects ephemeral (in-memory) mode, `false` persistent mode.
    #[serde(default = "default_true")]
    pub delete_audio_file: bool,

    /// Total synthesis attempts. Default: 5.
    #[serde(default = "default_synthesizer_attempts")]
    pub max_attempts: u32,

    /// Encoding of streamed output chunks.
    #[serde(default)]
    pub encoding: FrameFormat,

    /// Container produced by the synthesis engine.
    #[serde(default)]
    pub container: AudioContainer,
}

/// Dialogue settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DialogueConfig {
    /// Optional system prompt seeded at the start of every session.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Coordinator and artifact lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Schedule persisted reply audio for deletion after the exposure window.
    #[serde(default = "default_true")]
    pub delete_audio: bool,

    /// How long a persisted reply stays reachable before deletion. Default: 300s.
    #[serde(default = "default_artifact_exposure_secs")]
    pub artifact_exposure_secs: u64,

    /// Default delay for janitor deletions without an explicit window. Default: 30s.
    #[serde(default = "default_janitor_delay_secs")]
    pub janitor_delay_secs: u64,

    /// Maximum concurrent blocking inference calls. Default: 4.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_recognizer_output_dir() -> PathBuf {
    PathBuf::from("tmp/asr/")
}

fn default_synthesizer_output_dir() -> PathBuf {
    PathBuf::from("tmp/tts/")
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_recognizer_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_synthesizer_attempts() -> u32 {
    5
}

fn default_artifact_exposure_secs() -> u64 {
    300
}

fn default_janitor_delay_secs() -> u64 {
    30
}

fn default_worker_threads() -> usize {
    4
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            output_dir: default_recognizer_output_dir(),
            delete_audio_file: true,
            language: default_language(),
            max_attempts: default_recognizer_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RecognizerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            output_dir: default_synthesizer_output_dir(),
            delete_audio_file: true,
            max_attempts: default_synthesizer_attempts(),
            encoding: FrameFormat::default(),
            container: AudioContainer::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            delete_audio: true,
            artifact_exposure_secs: default_artifact_exposure_secs(),
            janitor_delay_secs: default_janitor_delay_secs(),
            worker_threads: default_worker_threads(),
        }
    }
}

impl PipelineConfig {
    pub fn artifact_exposure(&self) -> Duration {
        Duration::from_secs(self.artifact_exposure_secs)
    }

    pub fn janitor_delay(&self) -> Duration {
        Duration::from_secs(self.janitor_delay_secs)
    }
}

impl VoiceConfig {
    /// Creates every output directory the pipeline writes to.
    ///
    /// Failures are logged rather than returned; a missing directory later
    /// surfaces as a transient I/O fault on the stage that needs it.
    pub fn ensure_directories(&self) {
        for dir in [&self.recognizer.output_dir, &self.synthesizer.output_dir] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(path = %dir.display(), error = %e, "failed to create output directory");
            }
        }
    }
}
