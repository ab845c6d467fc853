//! VOICEVOX engine client: `audio_query` followed by `synthesis`.

use crate::defaults;
use crate::error::{Result, VoxError};
use crate::tts::SpeechSynthesizer;
use reqwest::Url;
use std::time::Duration;
use tokio::runtime::Handle;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Voicevox {
    client: reqwest::Client,
    runtime: Handle,
    endpoint: String,
    speaker: u32,
}

impl Voicevox {
    pub fn new(endpoint: &str, speaker: u32, runtime: Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            runtime,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            speaker,
        })
    }

    fn url<'a, I>(&self, path: &str, params: I) -> Result<Url>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        Url::parse_with_params(&format!("{}/{}", self.endpoint, path), params).map_err(|e| {
            VoxError::ConfigInvalidValue {
                key: "tts.endpoint".to_string(),
                message: e.to_string(),
            }
        })
    }

    async fn request(&self, sentence: &str) -> Result<Vec<u8>> {
        let speaker = self.speaker.to_string();

        let query_url = self.url(
            "audio_query",
            [("text", sentence.to_string()), ("speaker", speaker.clone())],
        )?;
        let query = self.client.post(query_url).send().await?;
        let status = query.status();
        let body = query.text().await?;
        if !status.is_success() {
            return Err(VoxError::Synthesis {
                message: format!("VOICEVOX audio_query error {status}: {body}"),
            });
        }

        let synthesis_url = self.url("synthesis", [("speaker", speaker)])?;
        let response = self
            .client
            .post(synthesis_url)
            .header("content-type", "application/json")
            .header("accept", "audio/wav")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoxError::Synthesis {
                message: format!("VOICEVOX synthesis error {status}: {body}"),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn ping(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/version", self.endpoint))
            .timeout(PROBE_TIMEOUT)
            .send();
        match request.await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("VOICEVOX not reachable: {e}");
                false
            }
        }
    }
}

impl SpeechSynthesizer for Voicevox {
    fn synthesize(&self, sentence: &str) -> Result<Vec<u8>> {
        self.runtime.block_on(self.request(sentence))
    }

    fn is_ready(&self) -> bool {
        self.runtime.block_on(self.ping())
    }

    fn name(&self) -> &str {
        "voicevox"
    }
}
