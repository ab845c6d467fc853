//! Error types for voxloop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Backend errors
    #[error("Transcription model not found at {path}")]
    TranscriptionModelNotFound { path: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Language model error: {message}")]
    LanguageModel { message: String },

    #[error("Speech synthesis error: {message}")]
    Synthesis { message: String },

    #[error("Backend {backend} not ready after {waited_secs}s")]
    BackendNotReady { backend: String, waited_secs: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Bridge errors
    #[error("Bridge socket error: {message}")]
    BridgeSocket { message: String },

    #[error("Bridge protocol error: {message}")]
    BridgeProtocol { message: String },

    #[error("Bridge connection failed: {message}")]
    BridgeConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxError::ConfigInvalidValue {
            key: "reply.label".to_string(),
            message: "must not be empty".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for reply.label: must not be empty"
        );
    }

    #[test]
    fn test_backend_not_ready_display() {
        let error = VoxError::BackendNotReady {
            backend: "style-bert-vits2".to_string(),
            waited_secs: 60,
        };
        assert_eq!(
            error.to_string(),
            "Backend style-bert-vits2 not ready after 60s"
        );
    }

    #[test]
    fn test_synthesis_display() {
        let error = VoxError::Synthesis {
            message: "HTTP 500".to_string(),
        };
        assert_eq!(error.to_string(), "Speech synthesis error: HTTP 500");
    }

    #[test]
    fn test_bridge_protocol_display() {
        let error = VoxError::BridgeProtocol {
            message: "empty line".to_string(),
        };
        assert_eq!(error.to_string(), "Bridge protocol error: empty line");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxError = io_error.into();
        assert!(error.to_string().contains("file not found"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxError>();
        assert_sync::<VoxError>();
    }
}
