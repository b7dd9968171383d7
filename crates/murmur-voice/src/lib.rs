//! The murmur voice pipeline.
//!
//! Turns speech or text into a spoken reply through three sequential
//! stages: [`SpeechRecognizer`], [`DialogueSession`], and
//! [`SpeechSynthesizer`], composed per session by [`PipelineCoordinator`].
//! Around them sit the resource concerns that make the stages usable in
//! production: bounded retry ([`RetryPolicy`]), disk headroom checks
//! ([`ResourceGuard`]), deferred artifact cleanup ([`TempFileJanitor`]),
//! a bounded pool for blocking inference ([`WorkerPool`]), and the audio
//! codec that frames synthesized audio for streaming ([`codec`]).
//!
//! Inference backends are reached only through the traits in [`engine`];
//! [`backends`] holds the concrete subprocess and HTTP implementations.

pub mod backends;
pub mod codec;
pub mod config;
pub mod dialogue;
pub mod engine;
pub mod error;
pub mod guard;
pub mod janitor;
pub mod markdown;
pub mod pipeline;
pub mod retry;
pub mod stt;
pub mod tts;
pub mod worker;

pub use codec::{chunk_channel, encode, AudioSource, ChunkSink, ChunkStream};
pub use config::{
    DialogueConfig, PipelineConfig, RecognizerConfig, SynthesizerConfig, VoiceConfig,
};
pub use dialogue::{AbortHandle, Dialogue, DialogueSession, TurnStatus};
pub use engine::{
    InferenceOptions, InputEncoding, LanguageModel, RecognitionEngine, RecognitionInput,
    SynthesisEngine, SynthesisTarget, TextStream, PCM_SAMPLE_RATE,
};
pub use error::{ErrorKind, VoiceError};
pub use guard::{FreeSpace, ResourceGuard, SystemFreeSpace};
pub use janitor::TempFileJanitor;
pub use pipeline::{
    PipelineCoordinator, Session, TextQueryOutcome, VoiceEngines, VoiceInput, VoiceQueryOutcome,
};
pub use retry::{RetryOutcome, RetryPolicy};
pub use stt::{validate_session_id, RecognitionResult, SpeechRecognizer};
pub use tts::{SpeechSynthesizer, SynthesisArtifact, UtteranceContent};
pub use worker::{WorkerPool, WorkerSlot};
