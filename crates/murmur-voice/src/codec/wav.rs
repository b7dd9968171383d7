//! WAV encode/decode via `hound`, normalised to 16 kHz mono s16.

use crate::engine::PCM_SAMPLE_RATE;
use crate::error::VoiceError;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Cursor, Read};

fn pcm_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

pub(crate) fn from_hound(err: hound::Error) -> VoiceError {
    match err {
        hound::Error::IoError(e) => VoiceError::Io(e),
        other => VoiceError::Codec(format!("WAV error: {}", other)),
    }
}

fn le_samples(pcm: &[u8]) -> impl Iterator<Item = i16> + '_ {
    // A trailing odd byte cannot form a sample and is dropped.
    pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]]))
}

/// Wraps raw mono s16le PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
    if pcm.len() < 2 {
        return Err(VoiceError::Codec("PCM payload is empty".to_string()));
    }
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = WavWriter::new(&mut cursor, pcm_spec(sample_rate)).map_err(from_hound)?;
        for sample in le_samples(pcm) {
            writer.write_sample(sample).map_err(from_hound)?;
        }
        writer.finalize().map_err(from_hound)?;
    }
    Ok(cursor.into_inner())
}

/// Decodes a WAV stream to 16 kHz mono s16 samples.
pub fn decode_wav<R: Read>(reader: R) -> Result<Vec<i16>, VoiceError> {
    let mut reader = WavReader::new(reader).map_err(from_hound)?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(VoiceError::Codec("WAV declares zero channels".to_string()));
    }

    let interleaved: Vec<i16> = match spec.sample_format {
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| scale_int_sample(v, bits)))
                .collect::<Result<_, _>>()
                .map_err(from_hound)?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(from_hound)?,
    };

    let mono = downmix(&interleaved, spec.channels as usize);
    Ok(resample_linear(&mono, spec.sample_rate, PCM_SAMPLE_RATE))
}

fn scale_int_sample(value: i32, bits: u16) -> i16 {
    if bits <= 16 {
        (value << (16 - bits)) as i16
    } else {
        (value >> (bits - 16)) as i16
    }
}

fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

pub(crate) fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let a = samples[idx] as f64;
            let b = samples[next] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

pub(crate) fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
