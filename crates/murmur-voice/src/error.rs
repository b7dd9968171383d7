use std::path::PathBuf;
use thiserror::Error;

/// Failure class of a [`VoiceError`], deciding retry and propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input. Fatal for the call, never retried.
    Validation,
    /// Disk headroom or I/O fault. Retried up to the stage's attempt cap.
    TransientResource,
    /// Recognition, synthesis, or language model backend failure.
    ModelInference,
    /// Explicit cancellation observed mid-stream. Not a failure.
    PipelineAbort,
    /// Worker pool or runtime failure.
    Internal,
}

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unsupported audio format: {0} (supported: .wav, .mp3, .flac, .m4a)")]
    UnsupportedFormat(String),

    #[error("insufficient disk headroom in {}: {available} bytes free, {required} required", .dir.display())]
    InsufficientHeadroom {
        dir: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("language model error: {0}")]
    Llm(String),

    #[error("audio codec error: {0}")]
    Codec(String),

    #[error("speech recognition produced no transcript")]
    EmptyTranscript,

    #[error("dialogue turn produced no reply")]
    NoReply,

    #[error("dialogue turn aborted")]
    Aborted,

    #[error("worker pool error: {0}")]
    Worker(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl VoiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::FileNotFound(_)
            | Self::UnsupportedFormat(_)
            | Self::Config(_) => ErrorKind::Validation,
            Self::InsufficientHeadroom { .. } | Self::Io(_) => ErrorKind::TransientResource,
            Self::Stt(_)
            | Self::Tts(_)
            | Self::Llm(_)
            | Self::Codec(_)
            | Self::EmptyTranscript
            | Self::NoReply => ErrorKind::ModelInference,
            Self::Aborted => ErrorKind::PipelineAbort,
            Self::Worker(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error is a resource-class fault worth another attempt.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientResource
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}
