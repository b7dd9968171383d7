//! Server configuration loading from file and environment variables.

use murmur_voice::VoiceConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Voice pipeline settings.
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Speech recognition binary.
    #[serde(default)]
    pub whisper: WhisperConfig,

    /// Speech synthesis binary.
    #[serde(default)]
    pub piper: PiperConfig,

    /// Chat model endpoint.
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory uploaded audio is spooled to while a request runs.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Open sessions kept before the least recently used one is closed.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "murmur_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhisperConfig {
    #[serde(default = "default_whisper_binary")]
    pub binary: PathBuf,

    #[serde(default = "default_whisper_model")]
    pub model: PathBuf,

    #[serde(default = "default_whisper_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PiperConfig {
    #[serde(default = "default_piper_binary")]
    pub binary: PathBuf,

    #[serde(default = "default_piper_model")]
    pub model: PathBuf,

    /// Sample rate of the raw PCM the voice model emits.
    #[serde(default = "default_piper_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_piper_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API, up to and including `/v1`.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5000
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("tmp/uploads/")
}

fn default_max_sessions() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_whisper_binary() -> PathBuf {
    PathBuf::from("whisper-cli")
}

fn default_whisper_model() -> PathBuf {
    PathBuf::from("models/ggml-base.bin")
}

fn default_whisper_timeout_secs() -> u64 {
    120
}

fn default_piper_binary() -> PathBuf {
    PathBuf::from("piper")
}

fn default_piper_model() -> PathBuf {
    PathBuf::from("models/voice.onnx")
}

fn default_piper_sample_rate() -> u32 {
    22_050
}

fn default_piper_timeout_secs() -> u64 {
    60
}

fn default_llm_base_url() -> String {
    "http://127.0.0.1:8000/v1".to_string()
}

fn default_llm_model() -> String {
    "default".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upload_dir: default_upload_dir(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary: default_whisper_binary(),
            model: default_whisper_model(),
            timeout_secs: default_whisper_timeout_secs(),
        }
    }
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            binary: default_piper_binary(),
            model: default_piper_model(),
            sample_rate: default_piper_sample_rate(),
            timeout_secs: default_piper_timeout_secs(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl WhisperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PiperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `MURMUR_HOST` overrides `server.host`
/// - `MURMUR_PORT` overrides `server.port`
/// - `MURMUR_LOG_LEVEL` overrides `logging.level`
/// - `MURMUR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `MURMUR_OUTPUT_DIR` sets the recognizer `output_dir` to `<dir>/asr` and
///   the synthesizer `output_dir` to `<dir>/tts`
/// - `MURMUR_LLM_API_KEY` overrides `llm.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("MURMUR_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("MURMUR_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("MURMUR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("MURMUR_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(dir) = var("MURMUR_OUTPUT_DIR") {
        let root = PathBuf::from(dir);
        config.voice.recognizer.output_dir = root.join("asr");
        config.voice.synthesizer.output_dir = root.join("tts");
    }
    if let Some(key) = var("MURMUR_LLM_API_KEY") {
        config.llm.api_key = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.whisper.timeout(), Duration::from_secs(120));
        assert_eq!(config.piper.sample_rate, 22_050);
        assert_eq!(config.server.max_sessions, 256);
    }

    #[test]
    fn served_audio_dir_holds_no_inputs_by_default() {
        let config = Config::default();
        let served = &config.voice.synthesizer.output_dir;
        assert!(!config.server.upload_dir.starts_with(served));
        assert!(!config.voice.recognizer.output_dir.starts_with(served));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn nested_voice_sections_are_read() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [voice.synthesizer]
            delete_audio_file = false

            [voice.dialogue]
            system_prompt = "You are a helpful assistant."

            [llm]
            base_url = "https://api.example.com/v1"
            model = "qwen-plus"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(!config.voice.synthesizer.delete_audio_file);
        assert_eq!(
            config.voice.dialogue.system_prompt.as_deref(),
            Some("You are a helpful assistant.")
        );
        assert_eq!(config.llm.model, "qwen-plus");
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn environment_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("MURMUR_PORT", "9000"),
            ("MURMUR_HOST", "not-an-ip"),
            ("MURMUR_LOG_JSON", "1"),
            ("MURMUR_OUTPUT_DIR", "/srv/audio"),
            ("MURMUR_LLM_API_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();

        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, default_host(), "unparseable host is ignored");
        assert!(config.logging.json);
        assert_eq!(config.voice.recognizer.output_dir, PathBuf::from("/srv/audio/asr"));
        assert_eq!(config.voice.synthesizer.output_dir, PathBuf::from("/srv/audio/tts"));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
    }
}
