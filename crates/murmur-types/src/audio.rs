//! Audio format tags.
//!
//! Two orthogonal notions live here: the *frame format* of an encoded chunk
//! stream (raw PCM or Opus packets) and the *container* of a whole audio
//! payload, identified by file extension.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Extensions accepted as recognition input, lowercase with the leading dot.
pub const RECOGNIZABLE_EXTENSIONS: &[&str] = &[".wav", ".mp3", ".flac", ".m4a"];

/// Encoding of a sequence of audio chunks.
///
/// Used both for incoming frame sequences (what the client recorded) and for
/// the target encoding of outgoing synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// 16 kHz mono Opus packets, 60 ms per packet.
    #[default]
    Opus,
    /// 16 kHz mono signed 16-bit little-endian PCM.
    Pcm,
}

impl FrameFormat {
    /// Returns the lowercase label for this format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Pcm => "pcm",
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a format or container label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized audio format: {0}")]
pub struct ParseFormatError(pub String);

impl FromStr for FrameFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opus" => Ok(Self::Opus),
            "pcm" => Ok(Self::Pcm),
            other => Err(ParseFormatError(other.to_string())),
        }
    }
}

/// Container format of a complete audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioContainer {
    /// RIFF/WAVE. The default output container.
    #[default]
    Wav,
    Mp3,
    Flac,
    M4a,
    /// Lightweight Opus frame container: `[type][reserved][len u16 BE][payload]`.
    P3,
}

impl AudioContainer {
    /// Returns the file extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => ".wav",
            Self::Mp3 => ".mp3",
            Self::Flac => ".flac",
            Self::M4a => ".m4a",
            Self::P3 => ".p3",
        }
    }

    /// Parses an extension, with or without the leading dot, ignoring case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "flac" => Some(Self::Flac),
            "m4a" => Some(Self::M4a),
            "p3" => Some(Self::P3),
            _ => None,
        }
    }

    /// Determines the container from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the recognition engine accepts this container as input.
    pub fn is_recognizable(self) -> bool {
        RECOGNIZABLE_EXTENSIONS.contains(&self.extension())
    }
}

impl fmt::Display for AudioContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().trim_start_matches('.'))
    }
}

impl FromStr for AudioContainer {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| ParseFormatError(s.to_string()))
    }
}
