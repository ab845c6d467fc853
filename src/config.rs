use crate::defaults;
use crate::error::{Result as VoxResult, VoxError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub reply: ReplyConfig,
    pub tts: TtsConfig,
    pub playback: PlaybackConfig,
    pub pipeline: PipelineSection,
    pub bridge: BridgeConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub vad_threshold: f32,
    pub silence_duration_ms: u32,
    pub listen_timeout_ms: u64,
    pub phrase_limit_ms: u64,
    pub min_utterance_ms: u64,
    pub pre_speech_ms: u32,
    /// Background noise measured at capture start, in milliseconds. Zero skips it.
    pub ambient_calibration_ms: u32,
    /// Speech must be this many times louder than the noise floor. Zero disables noise tracking.
    pub ambient_ratio: f32,
    /// Raise the interrupt as soon as the VAD hears speech, before transcription.
    pub barge_in_on_speech_start: bool,
    /// Pick up utterances as WAV files from this directory instead of the microphone.
    pub inbox_dir: Option<PathBuf>,
}

/// Speech-to-text backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SttBackend {
    Http,
    Whisper,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    pub backend: SttBackend,
    pub endpoint: String,
    /// Model name (HTTP backend) or path to a ggml model file (whisper backend).
    pub model: String,
    pub language: String,
    pub api_key_env: Option<String>,
    /// Extra phrases to treat as hallucinations, on top of the built-in list.
    pub hallucinations: Vec<String>,
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key_env: String,
    pub system_prompt: String,
    pub max_turns: usize,
    pub keep_recent: usize,
}

/// Reply format configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplyConfig {
    /// Ask the model for a structured reply with an emotion preamble.
    pub emotion: bool,
    pub label: String,
    pub max_format_retries: u32,
    pub fallback: String,
    pub placeholder: String,
}

/// Text-to-speech backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TtsBackend {
    StyleBertVits2,
    Voicevox,
}

/// Text-to-speech configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub backend: TtsBackend,
    /// Server base URL; the backend's own default when unset.
    pub endpoint: Option<String>,
    pub speaker_id: u32,
    pub model_id: u32,
    pub style: String,
    pub style_weight: f32,
    pub language: String,
    pub keep_terminators: bool,
    pub readiness_interval_ms: u64,
    pub readiness_timeout_ms: u64,
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub device: Option<String>,
    pub gap_ms: u64,
}

/// Queue sizing and work directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    pub work_dir: PathBuf,
    pub queue_capacity: usize,
    pub notify_capacity: usize,
}

/// Notification bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub socket: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            vad_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            listen_timeout_ms: defaults::LISTEN_TIMEOUT_MS,
            phrase_limit_ms: defaults::PHRASE_LIMIT_MS,
            min_utterance_ms: defaults::MIN_UTTERANCE_MS,
            pre_speech_ms: defaults::PRE_SPEECH_MS,
            ambient_calibration_ms: defaults::AMBIENT_CALIBRATION_MS,
            ambient_ratio: defaults::AMBIENT_RATIO,
            barge_in_on_speech_start: false,
            inbox_dir: None,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: SttBackend::Http,
            endpoint: defaults::DEFAULT_STT_ENDPOINT.to_string(),
            model: defaults::DEFAULT_STT_MODEL.to_string(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            api_key_env: None,
            hallucinations: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_LLM_MODEL.to_string(),
            endpoint: defaults::GEMINI_ENDPOINT.to_string(),
            api_key_env: defaults::DEFAULT_API_KEY_ENV.to_string(),
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            max_turns: defaults::MAX_TURNS,
            keep_recent: defaults::KEEP_RECENT,
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            emotion: false,
            label: defaults::REPLY_LABEL.to_string(),
            max_format_retries: defaults::MAX_FORMAT_RETRIES,
            fallback: defaults::FALLBACK_REPLY.to_string(),
            placeholder: defaults::PLACEHOLDER_REPLY.to_string(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::StyleBertVits2,
            endpoint: None,
            speaker_id: 0,
            model_id: 4,
            style: "Neutral".to_string(),
            style_weight: 2.0,
            language: "JP".to_string(),
            keep_terminators: false,
            readiness_interval_ms: defaults::READINESS_INTERVAL_MS,
            readiness_timeout_ms: defaults::READINESS_TIMEOUT_MS,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            gap_ms: defaults::PLAYBACK_GAP_MS,
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(defaults::WORK_DIR),
            queue_capacity: defaults::QUEUE_CAPACITY,
            notify_capacity: defaults::NOTIFY_CAPACITY,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket: None,
        }
    }
}

impl TtsConfig {
    /// Server base URL, falling back to the selected backend's usual address.
    pub fn endpoint_or_default(&self) -> &str {
        match (&self.endpoint, self.backend) {
            (Some(url), _) => url,
            (None, TtsBackend::StyleBertVits2) => defaults::SBV2_ENDPOINT,
            (None, TtsBackend::Voicevox) => defaults::VOICEVOX_ENDPOINT,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLOOP_LANGUAGE → stt.language
    /// - VOXLOOP_AUDIO_DEVICE → audio.device
    /// - VOXLOOP_LLM_MODEL → llm.model
    /// - VOXLOOP_TTS_ENDPOINT → tts.endpoint
    /// - VOXLOOP_EMOTION → reply.emotion ("1"/"true" enables)
    /// - VOXLOOP_WORK_DIR → pipeline.work_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("VOXLOOP_LANGUAGE")
            && !language.is_empty()
        {
            self.stt.language = language;
        }

        if let Ok(device) = std::env::var("VOXLOOP_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(model) = std::env::var("VOXLOOP_LLM_MODEL")
            && !model.is_empty()
        {
            self.llm.model = model;
        }

        if let Ok(endpoint) = std::env::var("VOXLOOP_TTS_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.tts.endpoint = Some(endpoint);
        }

        if let Ok(emotion) = std::env::var("VOXLOOP_EMOTION")
            && !emotion.is_empty()
        {
            self.reply.emotion = matches!(emotion.as_str(), "1" | "true" | "yes" | "on");
        }

        if let Ok(dir) = std::env::var("VOXLOOP_WORK_DIR")
            && !dir.is_empty()
        {
            self.pipeline.work_dir = PathBuf::from(dir);
        }

        self
    }

    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> VoxResult<()> {
        if self.reply.emotion && self.reply.label.trim().is_empty() {
            return Err(VoxError::ConfigInvalidValue {
                key: "reply.label".to_string(),
                message: "must not be empty when emotion mode is enabled".to_string(),
            });
        }
        if !(self.audio.ambient_ratio >= 0.0 && self.audio.ambient_ratio.is_finite()) {
            return Err(VoxError::ConfigInvalidValue {
                key: "audio.ambient_ratio".to_string(),
                message: format!("must be a non-negative number, got {}", self.audio.ambient_ratio),
            });
        }
        if self.llm.keep_recent == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "llm.keep_recent".to_string(),
                message: "must keep at least the latest user turn".to_string(),
            });
        }
        if self.llm.keep_recent + 2 > self.llm.max_turns {
            return Err(VoxError::ConfigInvalidValue {
                key: "llm.keep_recent".to_string(),
                message: format!(
                    "{} recent turns plus the 2 template turns exceed llm.max_turns = {}",
                    self.llm.keep_recent, self.llm.max_turns
                ),
            });
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "pipeline.queue_capacity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.tts.readiness_interval_ms == 0 {
            return Err(VoxError::ConfigInvalidValue {
                key: "tts.readiness_interval_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxloop/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxloop")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: only called with ENV_LOCK held.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxloop_env() {
        for key in [
            "VOXLOOP_LANGUAGE",
            "VOXLOOP_AUDIO_DEVICE",
            "VOXLOOP_LLM_MODEL",
            "VOXLOOP_TTS_ENDPOINT",
            "VOXLOOP_EMOTION",
            "VOXLOOP_WORK_DIR",
        ] {
            remove_env(key);
        }
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.listen_timeout_ms, 1000);
        assert_eq!(config.audio.phrase_limit_ms, 5000);
        assert_eq!(config.audio.min_utterance_ms, 500);
        assert_eq!(config.stt.language, "ja");
        assert_eq!(config.llm.max_turns, 8);
        assert_eq!(config.llm.keep_recent, 6);
        assert_eq!(config.llm.api_key_env, "GOOGLE_AI_API_KEY");
        assert!(!config.reply.emotion);
        assert_eq!(config.reply.max_format_retries, 5);
        assert_eq!(config.tts.backend, TtsBackend::StyleBertVits2);
        assert_eq!(config.playback.gap_ms, 500);
        assert_eq!(config.pipeline.work_dir, PathBuf::from("Tmp"));
        assert!(config.bridge.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            device = "hw:0,0"
            min_utterance_ms = 700

            [stt]
            backend = "whisper"
            model = "/models/ggml-small.bin"

            [reply]
            emotion = true
            label = "REPLY:"

            [tts]
            backend = "voicevox"
            speaker_id = 3
            keep_terminators = true
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.min_utterance_ms, 700);
        assert_eq!(config.audio.phrase_limit_ms, 5000);
        assert_eq!(config.stt.backend, SttBackend::Whisper);
        assert!(config.reply.emotion);
        assert_eq!(config.reply.label, "REPLY:");
        assert_eq!(config.tts.backend, TtsBackend::Voicevox);
        assert_eq!(config.tts.speaker_id, 3);
        assert!(config.tts.keep_terminators);
        assert_eq!(config.tts.endpoint_or_default(), "http://127.0.0.1:50021");
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxloop_env();

        set_env("VOXLOOP_LANGUAGE", "en");
        set_env("VOXLOOP_EMOTION", "true");
        set_env("VOXLOOP_TTS_ENDPOINT", "http://tts:5000");
        set_env("VOXLOOP_LLM_MODEL", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.stt.language, "en");
        assert!(config.reply.emotion);
        assert_eq!(config.tts.endpoint_or_default(), "http://tts:5000");
        assert_eq!(config.llm.model, "gemini-1.5-flash-002");

        clear_voxloop_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[audio\ndevice = \"broken").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        assert!(path.ends_with("voxloop/config.toml"));
    }

    #[test]
    fn test_validate_rejects_empty_label_in_emotion_mode() {
        let mut config = Config::default();
        config.reply.emotion = true;
        config.reply.label = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(VoxError::ConfigInvalidValue { key, .. }) if key == "reply.label"
        ));
    }

    #[test]
    fn test_validate_rejects_keep_recent_beyond_ceiling() {
        let mut config = Config::default();
        config.llm.keep_recent = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_ambient_ratio() {
        let mut config = Config::default();
        config.audio.ambient_ratio = -1.0;
        assert!(config.validate().is_err());
        config.audio.ambient_ratio = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_keep_recent() {
        let mut config = Config::default();
        config.llm.keep_recent = 0;
        assert!(matches!(
            config.validate(),
            Err(VoxError::ConfigInvalidValue { key, .. }) if key == "llm.keep_recent"
        ));
    }
}
