//! Opus frame encoding and decoding (16 kHz mono, 60 ms frames).
//!
//! Backed by libopus through `audiopus` when the `opus` feature is enabled.
//! Without it the same types exist but refuse to construct, so callers get
//! a validation error instead of a link failure.

use crate::error::VoiceError;

/// Samples per Opus frame: 60 ms at 16 kHz.
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Whether this build can encode and decode Opus.
pub fn opus_available() -> bool {
    cfg!(feature = "opus")
}

#[cfg(feature = "opus")]
mod imp {
    use super::OPUS_FRAME_SAMPLES;
    use crate::error::VoiceError;
    use audiopus::{
        coder::{Decoder, Encoder},
        packet::Packet,
        Application, Channels, MutSignals, SampleRate,
    };

    /// Largest packet libopus will produce for one frame.
    const MAX_PACKET_BYTES: usize = 4000;

    pub struct OpusFrameEncoder {
        encoder: Encoder,
    }

    impl OpusFrameEncoder {
        pub fn new() -> Result<Self, VoiceError> {
            let encoder = Encoder::new(SampleRate::Hz16000, Channels::Mono, Application::Voip)
                .map_err(|e| VoiceError::Codec(format!("failed to create Opus encoder: {}", e)))?;
            Ok(Self { encoder })
        }

        /// Encodes exactly one frame of [`OPUS_FRAME_SAMPLES`] samples.
        pub fn encode(&mut self, frame: &[i16]) -> Result<Vec<u8>, VoiceError> {
            if frame.len() != OPUS_FRAME_SAMPLES {
                return Err(VoiceError::Codec(format!(
                    "invalid Opus frame size: expected {}, got {}",
                    OPUS_FRAME_SAMPLES,
                    frame.len()
                )));
            }
            let mut output = vec![0u8; MAX_PACKET_BYTES];
            let len = self
                .encoder
                .encode(frame, &mut output)
                .map_err(|e| VoiceError::Codec(format!("Opus encode error: {}", e)))?;
            output.truncate(len);
            Ok(output)
        }
    }

    pub struct OpusFrameDecoder {
        decoder: Decoder,
    }

    impl OpusFrameDecoder {
        pub fn new() -> Result<Self, VoiceError> {
            let decoder = Decoder::new(SampleRate::Hz16000, Channels::Mono)
                .map_err(|e| VoiceError::Codec(format!("failed to create Opus decoder: {}", e)))?;
            Ok(Self { decoder })
        }

        pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, VoiceError> {
            // Packets may carry up to 120 ms.
            let mut output = vec![0i16; OPUS_FRAME_SAMPLES * 2];
            let packet = Packet::try_from(packet)
                .map_err(|e| VoiceError::Codec(format!("invalid Opus packet: {}", e)))?;
            let signals = MutSignals::try_from(&mut output[..])
                .map_err(|e| VoiceError::Codec(format!("signal buffer error: {}", e)))?;
            let decoded = self
                .decoder
                .decode(Some(packet), signals, false)
                .map_err(|e| VoiceError::Codec(format!("Opus decode error: {}", e)))?;
            output.truncate(decoded);
            Ok(output)
        }
    }
}

#[cfg(not(feature = "opus"))]
mod imp {
    use crate::error::VoiceError;

    fn unavailable() -> VoiceError {
        VoiceError::Validation(
            "Opus support is not compiled in; rebuild with the `opus` feature or use pcm"
                .to_string(),
        )
    }

    pub struct OpusFrameEncoder(());

    impl OpusFrameEncoder {
        pub fn new() -> Result<Self, VoiceError> {
            Err(unavailable())
        }

        pub fn encode(&mut self, _frame: &[i16]) -> Result<Vec<u8>, VoiceError> {
            Err(unavailable())
        }
    }

    pub struct OpusFrameDecoder(());

    impl OpusFrameDecoder {
        pub fn new() -> Result<Self, VoiceError> {
            Err(unavailable())
        }

        pub fn decode(&mut self, _packet: &[u8]) -> Result<Vec<i16>, VoiceError> {
            Err(unavailable())
        }
    }
}

pub use imp::{OpusFrameDecoder, OpusFrameEncoder};

/// Decodes a sequence of Opus packets into one contiguous s16 sample buffer.
///
/// Empty packets are ignored and undecodable packets are skipped with a
/// warning, so one corrupt frame does not discard a whole utterance.
pub fn decode_packets<I, P>(packets: I) -> Result<Vec<i16>, VoiceError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut decoder = OpusFrameDecoder::new()?;
    let mut pcm = Vec::new();
    for (index, packet) in packets.into_iter().enumerate() {
        let packet = packet.as_ref();
        if packet.is_empty() {
            continue;
        }
        match decoder.decode(packet) {
            Ok(samples) => pcm.extend_from_slice(&samples),
            Err(e) => tracing::warn!(packet = index, error = %e, "skipping undecodable Opus packet"),
        }
    }
    Ok(pcm)
}


#[cfg(all(test, feature = "opus"))]
mod tests {
    use super::*;

    #[test]
    fn encoded_frames_decode_back_to_frame_length() {
        let mut encoder = OpusFrameEncoder::new().unwrap();
        let frame: Vec<i16> = (0..OPUS_FRAME_SAMPLES)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let packet = encoder.encode(&frame).unwrap();
        assert!(!packet.is_empty());

        let pcm = decode_packets(vec![packet.clone(), Vec::new(), packet]).unwrap();
        assert_eq!(pcm.len(), OPUS_FRAME_SAMPLES * 2);
    }

    #[test]
    fn short_frame_is_rejected() {
        let mut encoder = OpusFrameEncoder::new().unwrap();
        assert!(encoder.encode(&[0; 10]).is_err());
    }
}
