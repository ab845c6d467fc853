//! Style-Bert-VITS2 API server client (`server_fastapi.py`).

use crate::config::TtsConfig;
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::tts::SpeechSynthesizer;
use reqwest::Url;
use std::time::Duration;
use tokio::runtime::Handle;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Voice parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub speaker_id: u32,
    pub model_id: u32,
    pub style: String,
    pub style_weight: f32,
    pub language: String,
    pub length: f32,
    pub sdp_ratio: f32,
    pub noise: f32,
    pub noisew: f32,
    pub split_interval: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            speaker_id: 0,
            model_id: 4,
            style: "Neutral".to_string(),
            style_weight: 2.0,
            language: "JP".to_string(),
            length: 1.0,
            sdp_ratio: 0.2,
            noise: 0.6,
            noisew: 0.8,
            split_interval: 1.0,
        }
    }
}

impl From<&TtsConfig> for VoiceParams {
    fn from(config: &TtsConfig) -> Self {
        Self {
            speaker_id: config.speaker_id,
            model_id: config.model_id,
            style: config.style.clone(),
            style_weight: config.style_weight,
            language: config.language.clone(),
            ..Self::default()
        }
    }
}

impl VoiceParams {
    fn query(&self, text: &str) -> Vec<(&'static str, String)> {
        vec![
            ("text", text.to_string()),
            ("speaker_id", self.speaker_id.to_string()),
            ("model_id", self.model_id.to_string()),
            ("length", self.length.to_string()),
            ("sdp_ratio", self.sdp_ratio.to_string()),
            ("noise", self.noise.to_string()),
            ("noisew", self.noisew.to_string()),
            ("auto_split", "true".to_string()),
            ("split_interval", self.split_interval.to_string()),
            ("language", self.language.clone()),
            ("style", self.style.clone()),
            ("style_weight", self.style_weight.to_string()),
        ]
    }
}

pub struct StyleBertVits2 {
    client: reqwest::Client,
    runtime: Handle,
    endpoint: String,
    voice: VoiceParams,
}

impl StyleBertVits2 {
    pub fn new(endpoint: &str, voice: VoiceParams, runtime: Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            runtime,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            voice,
        })
    }

    fn voice_url(&self, text: &str) -> Result<Url> {
        Url::parse_with_params(&format!("{}/voice", self.endpoint), self.voice.query(text)).map_err(
            |e| VoxError::ConfigInvalidValue {
                key: "tts.endpoint".to_string(),
                message: e.to_string(),
            },
        )
    }

    async fn request(&self, sentence: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.voice_url(sentence)?)
            .header("accept", "audio/wav")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoxError::Synthesis {
                message: format!("Style-Bert-VITS2 error {status}: {body}"),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn ping(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/status", self.endpoint))
            .timeout(PROBE_TIMEOUT)
            .send();
        match request.await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Style-Bert-VITS2 not reachable: {e}");
                false
            }
        }
    }
}

impl SpeechSynthesizer for StyleBertVits2 {
    fn synthesize(&self, sentence: &str) -> Result<Vec<u8>> {
        self.runtime.block_on(self.request(sentence))
    }

    fn is_ready(&self) -> bool {
        self.runtime.block_on(self.ping())
    }

    fn name(&self) -> &str {
        "style-bert-vits2"
    }
}
