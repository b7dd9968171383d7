use super::block_on_runtime;
use crate::codec::wav;
use crate::engine::{SynthesisEngine, SynthesisTarget};
use crate::error::VoiceError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for TTS process execution.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Sample rate of most piper voices.
pub const DEFAULT_PIPER_SAMPLE_RATE: u32 = 22_050;

/// Synthesis through a piper-compatible binary reading text on stdin.
///
/// In-memory synthesis reads raw s16le PCM from stdout and wraps it as WAV;
/// file synthesis lets piper write the WAV itself.
#[derive(Debug, Clone)]
pub struct PiperEngine {
    binary_path: PathBuf,
    model_path: PathBuf,
    sample_rate: u32,
    timeout: Duration,
}

impl PiperEngine {
    pub fn new(binary_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
            sample_rate: DEFAULT_PIPER_SAMPLE_RATE,
            timeout: TTS_TIMEOUT,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, text: &str, output_file: Option<PathBuf>) -> Result<Vec<u8>, VoiceError> {
        let mut command = Command::new(&self.binary_path);
        command.arg("--model").arg(&self.model_path);
        match &output_file {
            Some(path) => command.arg("--output_file").arg(path),
            None => command.arg("--output_raw"),
        };
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;

        // Write concurrently with reading to avoid deadlock if the output pipe fills up.
        let write = async move {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await
        };
        let wait = tokio::time::timeout(self.timeout, child.wait_with_output());
        let (written, output) = tokio::join!(write, wait);

        let output = output
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "TTS process timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for piper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("Piper failed: {}", stderr.trim())));
        }
        written.map_err(|e| VoiceError::Tts(format!("Failed to write to piper stdin: {}", e)))?;

        Ok(output.stdout)
    }
}

impl SynthesisEngine for PiperEngine {
    fn synthesize(&self, text: &str, target: SynthesisTarget<'_>) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Validation(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }
        if !self.model_path.exists() {
            return Err(VoiceError::Config(format!(
                "piper model not found: {}",
                self.model_path.display()
            )));
        }

        match target {
            SynthesisTarget::Memory => {
                let pcm = block_on_runtime(self.run(text, None))??;
                if pcm.is_empty() {
                    return Err(VoiceError::Tts("piper produced no audio".to_string()));
                }
                wav::pcm_to_wav(&pcm, self.sample_rate)
            }
            SynthesisTarget::File(path) => {
                block_on_runtime(self.run(text, Some(path.to_path_buf())))??;
                Ok(Vec::new())
            }
        }
    }
}
