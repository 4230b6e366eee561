//! Anthropic Messages API Provider

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

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic provider; the key travels in the `x-api-key` header
pub struct AnthropicProvider {
    api_key: SecretString,
    provider_id: String,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"[REDACTED]")
            .field("provider_id", &self.provider_id)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicProvider {
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
        format!("{}/v1/messages", self.api_base)
    }

    fn build_request(&self, prompt: &str) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }

    fn convert_response(&self, body: MessagesResponse, started: Instant) -> Result<LlmResponse> {
        // Text blocks are concatenated; other block types carry no code
        let content: String = body
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();

        if content.trim().is_empty() {
            return Err(empty_content(&self.provider_id));
        }

        Ok(LlmResponse {
            content,
            usage: body
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
                .unwrap_or_default(),
            timing: ResponseTiming::from_duration(started.elapsed()),
            metadata: ResponseMetadata {
                model: self.model.clone(),
                provider: self.provider_id.clone(),
                finish_reason: body.stop_reason,
            },
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        info!(
            provider = %self.provider_id,
            "Generating with {} (max_tokens: {})",
            self.model, self.max_tokens
        );

        let started = Instant::now();
        let request = self.build_request(prompt);

        debug!(provider = %self.provider_id, "Sending messages request");
        let body: MessagesResponse = send_json(
            self.client
                .post(self.endpoint())
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION)
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
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}
