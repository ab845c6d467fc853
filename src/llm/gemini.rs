//! Google Gemini `generateContent` client.

use crate::conversation::{Role, Turn};
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::llm::LanguageModel;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Handle;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Gemini has no system role in `contents`; the template's system prompt
/// goes out as a user turn, answered by the model's acknowledgement.
fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::System | Role::User => "user",
        Role::Assistant => "model",
    }
}

fn build_request(turns: &[Turn]) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: turns
            .iter()
            .map(|turn| Content {
                role: gemini_role(turn.role),
                parts: [Part {
                    text: &turn.content,
                }],
            })
            .collect(),
    }
}

fn parse_response(body: &str) -> Result<String> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| VoxError::LanguageModel {
            message: format!("invalid response: {e}"),
        })?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(VoxError::LanguageModel {
            message: "response contained no text".to_string(),
        });
    }
    Ok(text)
}

pub struct GeminiModel {
    client: reqwest::Client,
    runtime: Handle,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiModel {
    /// Creates a client; the API key is read from `api_key_env`.
    pub fn new(endpoint: &str, model: &str, api_key_env: &str, runtime: Handle) -> Result<Self> {
        let api_key = std::env::var(api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoxError::ConfigInvalidValue {
                key: "llm.api_key_env".to_string(),
                message: format!("environment variable {api_key_env} is not set"),
            })?;
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
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    async fn generate(&self, turns: &[Turn]) -> Result<String> {
        tracing::debug!(turns = turns.len(), model = %self.model, "sending conversation to Gemini");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(turns))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VoxError::LanguageModel {
                message: format!("Gemini API error {status}: {body}"),
            });
        }
        parse_response(&body)
    }
}

impl LanguageModel for GeminiModel {
    fn complete(&self, turns: &[Turn]) -> Result<String> {
        self.runtime.block_on(self.generate(turns))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_maps_roles() {
        let turns = vec![
            Turn::system("prompt"),
            Turn::assistant("了解しました。"),
            Turn::user("こんにちは"),
        ];
        let json = serde_json::to_value(build_request(&turns)).unwrap();
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "こんにちは");
    }

    #[test]
    fn test_parse_response_joins_parts() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"こんにちは。"},{"text":"元気です。"}]}}]}"#;
        assert_eq!(parse_response(body).unwrap(), "こんにちは。元気です。");
    }

    #[test]
    fn test_parse_response_without_candidates_fails() {
        assert!(parse_response(r#"{"candidates":[]}"#).is_err());
        assert!(parse_response(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).is_err());
        assert!(parse_response("not json").is_err());
    }
}
