//! Shared types for the murmur voice pipeline.
//!
//! This crate holds the data model that crosses crate boundaries: dialogue
//! messages, audio format tags, and the JSON bodies returned by the HTTP
//! surface. It deliberately has no runtime dependencies beyond `serde`, so
//! both the pipeline core and any client can depend on it cheaply.

pub mod audio;
pub mod dialogue;
pub mod query;

pub use audio::{AudioContainer, FrameFormat, ParseFormatError, RECOGNIZABLE_EXTENSIONS};
pub use dialogue::{Message, Role};
pub use query::{QueryStatus, TextChatResponse, VoiceChatResponse};
