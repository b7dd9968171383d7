//! Capability traits for the opaque inference backends.
//!
//! The pipeline depends only on these traits; each backend is one
//! implementing type (see [`crate::backends`]). Recognition and synthesis
//! engines are synchronous and are always invoked through the
//! [`WorkerPool`](crate::worker::WorkerPool). The language model is async
//! and streams its reply.

use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use murmur_types::{AudioContainer, Message};
use std::path::Path;

/// Sample rate of all PCM exchanged inside the pipeline.
pub const PCM_SAMPLE_RATE: u32 = 16_000;

/// How the bytes of a [`RecognitionInput`] are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEncoding {
    /// Raw mono signed 16-bit little-endian samples.
    Pcm16 { sample_rate: u32 },
    /// A complete file in the given container.
    Container(AudioContainer),
}

/// Audio handed to a recognition engine.
#[derive(Debug, Clone)]
pub struct RecognitionInput {
    pub audio: Vec<u8>,
    pub encoding: InputEncoding,
}

impl RecognitionInput {
    pub fn pcm(audio: Vec<u8>) -> Self {
        Self {
            audio,
            encoding: InputEncoding::Pcm16 {
                sample_rate: PCM_SAMPLE_RATE,
            },
        }
    }

    pub fn container(audio: Vec<u8>, container: AudioContainer) -> Self {
        Self {
            audio,
            encoding: InputEncoding::Container(container),
        }
    }
}

/// Per-call recognition options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceOptions {
    /// Language hint, or `auto`.
    pub language: String,
    /// Apply inverse text normalization (numbers, punctuation).
    pub use_itn: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            use_itn: true,
        }
    }
}

/// Speech-to-text backend. Must be safe to call from a worker thread.
pub trait RecognitionEngine: Send + Sync {
    fn infer(&self, input: &RecognitionInput, options: &InferenceOptions)
        -> Result<String, VoiceError>;
}

/// Where a synthesis engine should put its audio.
#[derive(Debug, Clone, Copy)]
pub enum SynthesisTarget<'a> {
    /// Return the encoded audio bytes.
    Memory,
    /// Write the audio to this path; the returned bytes are ignored.
    File(&'a Path),
}

/// Text-to-speech backend. Must be safe to call from a worker thread.
pub trait SynthesisEngine: Send + Sync {
    fn synthesize(&self, text: &str, target: SynthesisTarget<'_>) -> Result<Vec<u8>, VoiceError>;

    fn start_session(&self, _session_id: &str) -> Result<(), VoiceError> {
        Ok(())
    }

    /// Releases any per-session state held by the backend.
    fn finish_session(&self, _session_id: &str) -> Result<(), VoiceError> {
        Ok(())
    }
}

/// Finite stream of reply fragments in generation order.
pub type TextStream = BoxStream<'static, Result<String, VoiceError>>;

/// Conversational language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_response(
        &self,
        session_id: &str,
        history: &[Message],
    ) -> Result<TextStream, VoiceError>;
}
