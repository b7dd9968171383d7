//! Reader for the `.p3` Opus frame container.
//!
//! Each frame is a 4-byte header followed by one Opus packet:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | frame type |
//! | 1 | 1 | reserved |
//! | 2 | 2 | payload length, big-endian |
//! | 4 | n | Opus packet |

use crate::error::VoiceError;
use std::io::{ErrorKind, Read, Write};

pub const P3_HEADER_LEN: usize = 4;

/// Lazily yields the Opus packets of a `.p3` stream, one per frame.
///
/// Truncated input yields a single error and then ends.
pub struct P3Reader<R> {
    inner: R,
    frames_read: usize,
    done: bool,
}

impl<R: Read> P3Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            frames_read: 0,
            done: false,
        }
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Fills `buf` as far as the input allows, returning the bytes read.
    fn read_up_to(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
        let mut header = [0u8; P3_HEADER_LEN];
        let got = self.read_up_to(&mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < P3_HEADER_LEN {
            return Err(VoiceError::Codec(format!(
                "truncated p3 header at frame {}",
                self.frames_read
            )));
        }

        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut payload = vec![0u8; len];
        let got = self.read_up_to(&mut payload)?;
        if got < len {
            return Err(VoiceError::Codec(format!(
                "truncated p3 payload at frame {}: expected {} bytes, got {}",
                self.frames_read, len, got
            )));
        }
        self.frames_read += 1;
        Ok(Some(payload))
    }
}

impl<R: Read> Iterator for P3Reader<R> {
    type Item = Result<Vec<u8>, VoiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Appends one Opus packet as a `.p3` frame.
pub fn write_frame<W: Write>(out: &mut W, packet: &[u8]) -> Result<(), VoiceError> {
    let len = u16::try_from(packet.len()).map_err(|_| {
        VoiceError::Codec(format!("opus packet too large for p3: {} bytes", packet.len()))
    })?;
    out.write_all(&[0, 0])?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(packet)?;
    Ok(())
}
