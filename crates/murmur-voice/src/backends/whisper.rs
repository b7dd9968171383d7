use super::block_on_runtime;
use crate::codec::wav;
use crate::engine::{InferenceOptions, InputEncoding, RecognitionEngine, RecognitionInput};
use crate::error::VoiceError;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default timeout for one transcription.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Recognition through a whisper.cpp-compatible command-line binary.
///
/// Input is spooled to a temporary file that is removed on every exit path.
#[derive(Debug, Clone)]
pub struct WhisperCliEngine {
    binary_path: PathBuf,
    model_path: PathBuf,
    timeout: Duration,
}

impl WhisperCliEngine {
    pub fn new(binary_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
            timeout: STT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn transcribe(&self, audio_file: PathBuf, language: &str) -> Result<String, VoiceError> {
        let mut command = Command::new(&self.binary_path);
        // -nt: no timestamps, so stdout is just the transcript.
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(&audio_file)
            .arg("-l")
            .arg(language)
            .arg("-nt")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Stt(format!(
                    "STT process timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

impl RecognitionEngine for WhisperCliEngine {
    fn infer(
        &self,
        input: &RecognitionInput,
        options: &InferenceOptions,
    ) -> Result<String, VoiceError> {
        let (audio, suffix) = match input.encoding {
            InputEncoding::Pcm16 { sample_rate } => {
                (wav::pcm_to_wav(&input.audio, sample_rate)?, ".wav")
            }
            InputEncoding::Container(container) => (input.audio.clone(), container.extension()),
        };
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Validation(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let mut spool = tempfile::Builder::new()
            .prefix("murmur-stt-")
            .suffix(suffix)
            .tempfile()?;
        spool.write_all(&audio)?;
        spool.flush()?;

        block_on_runtime(self.transcribe(spool.path().to_path_buf(), &options.language))?
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use murmur_types::AudioContainer;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    async fn infer(engine: WhisperCliEngine, input: RecognitionInput) -> Result<String, VoiceError> {
        let engine = Arc::new(engine);
        tokio::task::spawn_blocking(move || engine.infer(&input, &InferenceOptions::default()))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn passes_model_file_and_language() {
        let temp = tempfile::tempdir().unwrap();
        // Echo back the args so the test can check them.
        let script = write_script(temp.path(), "whisper.sh", r#"echo "  $1 $2 $3 $5 $6 $7"; echo ' second line '"#);
        let engine = WhisperCliEngine::new(&script, "ggml-base.bin");

        let text = infer(engine, RecognitionInput::pcm(vec![0, 0, 1, 0]))
            .await
            .unwrap();
        assert!(text.starts_with("-m ggml-base.bin -f -l auto -nt"), "got {:?}", text);
        assert!(text.ends_with(" second line"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spool_file_is_removed_after_inference() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(temp.path(), "whisper.sh", r#"echo "$4""#);
        let engine = WhisperCliEngine::new(&script, "model");

        let spooled = infer(
            engine,
            RecognitionInput::container(b"ID3fake".to_vec(), AudioContainer::Mp3),
        )
        .await
        .unwrap();
        assert!(spooled.ends_with(".mp3"), "got {:?}", spooled);
        assert!(!Path::new(&spooled).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nonzero_exit_is_stt_error() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(temp.path(), "whisper.sh", "echo 'model missing' >&2; exit 3");
        let engine = WhisperCliEngine::new(&script, "model");
        let err = infer(engine, RecognitionInput::pcm(vec![0, 0]))
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Stt(ref msg) if msg.contains("model missing")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_binary_times_out() {
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(temp.path(), "whisper.sh", "sleep 5");
        let engine =
            WhisperCliEngine::new(&script, "model").with_timeout(Duration::from_millis(200));
        let err = infer(engine, RecognitionInput::pcm(vec![0, 0]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_input_is_rejected_before_spawn() {
        let engine = WhisperCliEngine::new("/nonexistent/whisper", "model");
        let input = RecognitionInput::container(
            vec![0; MAX_STT_INPUT_BYTES + 1],
            AudioContainer::Wav,
        );
        assert!(infer(engine, input).await.unwrap_err().is_validation());
    }
}
