//! Google Gemini Provider (generateContent)

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::{
    LlmProvider, LlmResponse, ProviderConfig, ResponseMetadata, ResponseTiming, TokenUsage,
    empty_content, http_client, send_json,
};
use crate::types::Result;

pub struct GeminiProvider {
    api_key: SecretString,
    provider_id: String,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("api_key", &"[REDACTED]")
            .field("provider_id", &self.provider_id)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig, api_key: SecretString) -> Result<Self> {
        Ok(Self {
            api_key,
            provider_id: config.provider_id.to_string(),
            api_base: config.api_base().to_string(),
            model: config.model_id.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        }
    }

    fn convert_response(
        &self,
        body: GenerateContentResponse,
        started: Instant,
    ) -> Result<LlmResponse> {
        let candidate = body.candidates.into_iter().next();
        let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
        let content: String = candidate
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(empty_content(&self.provider_id));
        }

        Ok(LlmResponse {
            content,
            usage: body
                .usage_metadata
                .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
                .unwrap_or_default(),
            timing: ResponseTiming::from_duration(started.elapsed()),
            metadata: ResponseMetadata {
                model: self.model.clone(),
                provider: self.provider_id.clone(),
                finish_reason,
            },
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        info!(provider = %self.provider_id, "Generating with {}", self.model);

        let started = Instant::now();
        let request = self.build_request(prompt);

        debug!(provider = %self.provider_id, "Sending generateContent request");
        let body: GenerateContentResponse = send_json(
            self.client
                .post(self.endpoint())
                .header("x-goog-api-key", self.api_key.expose_secret())
                .header("Content-Type", "application/json")
                .json(&request),
            &self.provider_id,
        )
        .await?;

        self.convert_response(body, started)
    }

    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::{ErrorCategory, ProviderRegistry};

    fn provider() -> GeminiProvider {
        let config = ProviderRegistry::builtin()
            .get_config("gemini-2-0-flash")
            .unwrap();
        GeminiProvider::new(&config, SecretString::from("g-test")).unwrap()
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            provider().endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_request_body() {
        let json = serde_json::to_value(provider().build_request("Debloat")).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Debloat");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 4000);
    }

    #[test]
    fn test_parse_response() {
        let body: GenerateContentResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "```python\n"}, {"text": "y = 2\n```"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 20, "candidatesTokenCount": 5, "totalTokenCount": 25}
            }"#,
        )
        .unwrap();
        let response = provider().convert_response(body, Instant::now()).unwrap();
        assert_eq!(response.content, "```python\ny = 2\n```");
        assert_eq!(response.usage, TokenUsage::new(20, 5));
        assert_eq!(response.metadata.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_blocked_prompt_is_parse_error() {
        let body: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        let err = provider().convert_response(body, Instant::now()).unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::ParseError));
    }
}
