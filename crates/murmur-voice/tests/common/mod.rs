#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use murmur_types::Message;
use murmur_voice::{
    FreeSpace, LanguageModel, RecognitionEngine, RecognitionInput, InferenceOptions,
    SynthesisEngine, SynthesisTarget, TextStream, VoiceError,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Recognition engine returning a fixed transcript, or failing.
pub struct MockRecognizer {
    reply: Result<String, String>,
    calls: AtomicU32,
    inputs: Mutex<Vec<RecognitionInput>>,
}

impl MockRecognizer {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicU32::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: AtomicU32::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<RecognitionInput> {
        self.inputs.lock().unwrap().last().cloned()
    }
}

impl RecognitionEngine for MockRecognizer {
    fn infer(
        &self,
        input: &RecognitionInput,
        _options: &InferenceOptions,
    ) -> Result<String, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.clone());
        self.reply.clone().map_err(VoiceError::Stt)
    }
}

/// Per-call behaviour of [`MockSynthesizer`].
#[derive(Debug, Clone)]
pub enum SynthStep {
    /// Produce this audio (memory) or write it to the target (file).
    Succeed(Vec<u8>),
    /// Write a partial file when asked for one, then fail.
    Fail,
    /// Report success without producing anything.
    Silent,
    /// Fail with a validation error.
    Reject,
}

/// Synthesis engine following a script; the last step repeats.
pub struct MockSynthesizer {
    steps: Vec<SynthStep>,
    calls: AtomicU32,
    texts: Mutex<Vec<String>>,
    targets: Mutex<Vec<Option<PathBuf>>>,
    finished_sessions: Mutex<Vec<String>>,
    fail_finish: bool,
}

impl MockSynthesizer {
    pub fn scripted(steps: Vec<SynthStep>) -> Arc<Self> {
        Self::build(steps, false)
    }

    pub fn always(step: SynthStep) -> Arc<Self> {
        Self::build(vec![step], false)
    }

    pub fn with_failing_finish(step: SynthStep) -> Arc<Self> {
        Self::build(vec![step], true)
    }

    fn build(steps: Vec<SynthStep>, fail_finish: bool) -> Arc<Self> {
        Arc::new(Self {
            steps,
            calls: AtomicU32::new(0),
            texts: Mutex::new(Vec::new()),
            targets: Mutex::new(Vec::new()),
            finished_sessions: Mutex::new(Vec::new()),
            fail_finish,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn file_targets(&self) -> Vec<PathBuf> {
        self.targets.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn finished_sessions(&self) -> Vec<String> {
        self.finished_sessions.lock().unwrap().clone()
    }
}

impl SynthesisEngine for MockSynthesizer {
    fn synthesize(&self, text: &str, target: SynthesisTarget<'_>) -> Result<Vec<u8>, VoiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.texts.lock().unwrap().push(text.to_string());
        let path = match target {
            SynthesisTarget::File(path) => Some(path.to_path_buf()),
            SynthesisTarget::Memory => None,
        };
        self.targets.lock().unwrap().push(path.clone());

        let step = self
            .steps
            .get(call)
            .or(self.steps.last())
            .cloned()
            .unwrap_or(SynthStep::Fail);
        match (step, path) {
            (SynthStep::Succeed(audio), None) => Ok(audio),
            (SynthStep::Succeed(audio), Some(path)) => {
                std::fs::write(path, audio)?;
                Ok(Vec::new())
            }
            (SynthStep::Fail, path) => {
                if let Some(path) = path {
                    std::fs::write(path, b"partial")?;
                }
                Err(VoiceError::Tts("engine crashed".to_string()))
            }
            (SynthStep::Silent, _) => Ok(Vec::new()),
            (SynthStep::Reject, _) => Err(VoiceError::Validation("unspeakable".to_string())),
        }
    }

    fn finish_session(&self, session_id: &str) -> Result<(), VoiceError> {
        self.finished_sessions
            .lock()
            .unwrap()
            .push(session_id.to_string());
        if self.fail_finish {
            return Err(VoiceError::Tts("session already released".to_string()));
        }
        Ok(())
    }
}

/// Language model streaming fixed fragments, recording what it was shown.
pub struct MockModel {
    fragments: Result<Vec<String>, String>,
    calls: AtomicU32,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl MockModel {
    pub fn replying(fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fragments: Ok(fragments.iter().map(|f| f.to_string()).collect()),
            calls: AtomicU32::new(0),
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fragments: Err(message.to_string()),
            calls: AtomicU32::new(0),
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn stream_response(
        &self,
        _session_id: &str,
        history: &[Message],
    ) -> Result<TextStream, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().unwrap().push(history.to_vec());
        match &self.fragments {
            Ok(fragments) => {
                let items: Vec<Result<String, VoiceError>> =
                    fragments.iter().cloned().map(Ok).collect();
                Ok(stream::iter(items).boxed())
            }
            Err(message) => Err(VoiceError::Llm(message.clone())),
        }
    }
}

/// Free-space probe reporting a fixed figure.
pub struct FixedFreeSpace(pub u64);

impl FreeSpace for FixedFreeSpace {
    fn available(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// A mono 16 kHz WAV file of `samples` samples.
pub fn wav_bytes(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            writer.write_sample((i % 64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Names of the entries in `dir`, sorted.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
