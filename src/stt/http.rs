//! OpenAI-compatible `/audio/transcriptions` client.
//!
//! Works with hosted APIs as well as local servers such as whisper.cpp's
//! `server` or faster-whisper-server.

use crate::defaults;
use crate::error::{Result, VoxError};
use crate::stt::transcriber::SpeechToText;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct HttpSpeechToText {
    client: reqwest::Client,
    runtime: Handle,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpSpeechToText {
    /// `api_key_env` names an environment variable holding a bearer token;
    /// local servers usually need none.
    pub fn new(endpoint: &str, model: &str, api_key_env: Option<&str>, runtime: Handle) -> Result<Self> {
        let api_key = match api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| VoxError::ConfigInvalidValue {
                key: "stt.api_key_env".to_string(),
                message: format!("environment variable {var} is not set"),
            })?),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            runtime,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/audio/transcriptions", self.endpoint)
    }

    async fn request(&self, audio: &Path, language: &str) -> Result<String> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "json");

        let mut request = self.client.post(self.url()).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VoxError::Transcription {
                message: format!("transcription API error {status}: {body}"),
            });
        }
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<String> {
    let response: TranscriptionResponse =
        serde_json::from_str(body).map_err(|e| VoxError::Transcription {
            message: format!("invalid response: {e}"),
        })?;
    Ok(response.text.trim().to_string())
}

impl SpeechToText for HttpSpeechToText {
    fn transcribe(&self, audio: &Path, language: &str) -> Result<String> {
        tracing::debug!(path = %audio.display(), model = %self.model, "sending audio for transcription");
        self.runtime.block_on(self.request(audio, language))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_trims() {
        assert_eq!(parse_response(r#"{"text":" こんにちは \n"}"#).unwrap(), "こんにちは");
    }

    #[test]
    fn test_parse_response_rejects_other_shapes() {
        assert!(parse_response(r#"{"error":"bad"}"#).is_err());
        assert!(parse_response("").is_err());
    }

    #[test]
    fn test_missing_api_key_env_is_config_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = HttpSpeechToText::new(
            "http://localhost:1/v1/",
            "whisper-1",
            Some("VOXLOOP_TEST_UNSET_STT_KEY"),
            runtime.handle().clone(),
        );
        assert!(matches!(result, Err(VoxError::ConfigInvalidValue { .. })));
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let stt = HttpSpeechToText::new("http://localhost:1/v1/", "whisper-1", None, runtime.handle().clone())
            .unwrap();
        assert_eq!(stt.url(), "http://localhost:1/v1/audio/transcriptions");
        assert_eq!(stt.model_name(), "whisper-1");
    }
}
