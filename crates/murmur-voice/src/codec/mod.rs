//! Audio codec pipeline: turns an audio payload into ordered output chunks.
//!
//! [`encode`] decodes its source up front but produces output chunks
//! lazily through [`ChunkStream`]; a fresh call re-decodes from the start.
//! WAV payloads go through the generic decoder, `.p3` payloads through the
//! dedicated frame reader.

pub mod opus;
pub mod p3;
pub mod wav;

use crate::error::VoiceError;
use murmur_types::{AudioContainer, FrameFormat};
use opus::{OpusFrameDecoder, OpusFrameEncoder, OPUS_FRAME_SAMPLES};
use p3::P3Reader;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Samples per output chunk (60 ms at 16 kHz) for both encodings.
pub const FRAME_SAMPLES: usize = OPUS_FRAME_SAMPLES;

/// Receiving end of chunk delivery. Bounded, so a slow consumer holds back
/// the encoder instead of letting chunks pile up.
pub type ChunkSink = mpsc::Sender<Vec<u8>>;

/// Creates a bounded chunk channel.
pub fn chunk_channel(capacity: usize) -> (ChunkSink, mpsc::Receiver<Vec<u8>>) {
    mpsc::channel(capacity.max(1))
}

/// Audio to be encoded.
#[derive(Debug, Clone)]
pub enum AudioSource {
    Bytes {
        data: Vec<u8>,
        container: AudioContainer,
    },
    File(PathBuf),
}

impl AudioSource {
    fn container(&self) -> Result<AudioContainer, VoiceError> {
        match self {
            Self::Bytes { container, .. } => Ok(*container),
            Self::File(path) => AudioContainer::from_path(path).ok_or_else(|| {
                VoiceError::Codec(format!("cannot infer container of {}", path.display()))
            }),
        }
    }

    fn open(self) -> Result<Box<dyn Read + Send>, VoiceError> {
        match self {
            Self::Bytes { data, .. } => Ok(Box::new(Cursor::new(data))),
            Self::File(path) => {
                if !path.exists() {
                    return Err(VoiceError::FileNotFound(path));
                }
                Ok(Box::new(BufReader::new(File::open(&path)?)))
            }
        }
    }
}

enum Inner {
    Samples {
        samples: Vec<i16>,
        pos: usize,
        encoder: Option<OpusFrameEncoder>,
    },
    Packets {
        reader: P3Reader<Box<dyn Read + Send>>,
        decoder: Option<OpusFrameDecoder>,
    },
    Done,
}

/// Lazy, finite, ordered sequence of encoded chunks.
///
/// Yields at most one error, after which the stream ends.
pub struct ChunkStream {
    inner: Inner,
    target: FrameFormat,
}

impl ChunkStream {
    pub fn target(&self) -> FrameFormat {
        self.target
    }

    fn next_chunk(&mut self) -> Option<Result<Vec<u8>, VoiceError>> {
        match &mut self.inner {
            Inner::Samples {
                samples,
                pos,
                encoder,
            } => {
                if *pos >= samples.len() {
                    return None;
                }
                let end = (*pos + FRAME_SAMPLES).min(samples.len());
                let frame = &samples[*pos..end];
                *pos = end;
                Some(match encoder {
                    None => Ok(wav::samples_to_le_bytes(frame)),
                    Some(encoder) if frame.len() == FRAME_SAMPLES => encoder.encode(frame),
                    Some(encoder) => {
                        let mut padded = frame.to_vec();
                        padded.resize(FRAME_SAMPLES, 0);
                        encoder.encode(&padded)
                    }
                })
            }
            Inner::Packets { reader, decoder } => {
                let packet = reader.next()?;
                Some(packet.and_then(|packet| match decoder {
                    None => Ok(packet),
                    Some(decoder) => decoder
                        .decode(&packet)
                        .map(|pcm| wav::samples_to_le_bytes(&pcm)),
                }))
            }
            Inner::Done => None,
        }
    }
}

impl Iterator for ChunkStream {
    type Item = Result<Vec<u8>, VoiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next_chunk();
        match &item {
            None | Some(Err(_)) => self.inner = Inner::Done,
            Some(Ok(_)) => {}
        }
        item
    }
}

/// Prepares `source` for delivery in `target` encoding.
pub fn encode(source: AudioSource, target: FrameFormat) -> Result<ChunkStream, VoiceError> {
    let container = source.container()?;
    let inner = match container {
        AudioContainer::Wav => {
            let samples = wav::decode_wav(source.open()?)?;
            let encoder = match target {
                FrameFormat::Pcm => None,
                FrameFormat::Opus => Some(OpusFrameEncoder::new()?),
            };
            Inner::Samples {
                samples,
                pos: 0,
                encoder,
            }
        }
        AudioContainer::P3 => {
            let decoder = match target {
                FrameFormat::Opus => None,
                FrameFormat::Pcm => Some(OpusFrameDecoder::new()?),
            };
            Inner::Packets {
                reader: P3Reader::new(source.open()?),
                decoder,
            }
        }
        other => {
            return Err(VoiceError::Codec(format!(
                "no output decoder for {} audio",
                other
            )))
        }
    };
    Ok(ChunkStream { inner, target })
}

/// Drives `stream` into `sink` from a blocking context, in order.
///
/// Returns the number of chunks delivered. A consumer that hangs up ends
/// delivery early without error.
pub fn pump_blocking(stream: ChunkStream, sink: &ChunkSink) -> Result<usize, VoiceError> {
    let mut sent = 0;
    for chunk in stream {
        if sink.blocking_send(chunk?).is_err() {
            tracing::debug!(sent, "chunk consumer closed, stopping delivery");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}
