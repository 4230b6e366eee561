//! OpenAI API Provider
//!
//! LLM provider using the Chat Completions API. DeepSeek speaks the same
//! wire format and is served by this transport with its own base URL.

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

/// OpenAI-compatible provider with secure API key handling
pub struct OpenAiProvider {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    provider_id: String,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("provider_id", &self.provider_id)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
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
        format!("{}/chat/completions", self.api_base)
    }

    fn build_request(&self, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        }
    }

    fn convert_response(&self, body: ChatCompletionResponse, started: Instant) -> Result<LlmResponse> {
        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let choice = body.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| empty_content(&self.provider_id))?;

        Ok(LlmResponse {
            content,
            usage,
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
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        info!(
            provider = %self.provider_id,
            "Generating with {} (temperature: {})",
            self.model, self.temperature
        );

        let started = Instant::now();
        let request = self.build_request(prompt);

        debug!(provider = %self.provider_id, "Sending chat completion request");
        let body: ChatCompletionResponse = send_json(
            self.client
                .post(self.endpoint())
                .header(
                    "Authorization",
                    format!("Bearer {}", self.api_key.expose_secret()),
                )
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
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::{ErrorCategory, ProviderRegistry};

    fn provider(id: &str) -> OpenAiProvider {
        let config = ProviderRegistry::builtin().get_config(id).unwrap();
        OpenAiProvider::new(&config, SecretString::from("sk-test")).unwrap()
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            provider("gpt-4o").endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            provider("deepseek-r1").endpoint(),
            "https://api.deepseek.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body() {
        let request = provider("deepseek-r1").build_request("Debloat");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "deepseek-code-r1");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Debloat");
        assert_eq!(json["max_tokens"], 4000);
        assert!((json["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_parse_response() {
        let body: ChatCompletionResponse = serde_json::from_str(
            r#"{
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "```python\nx = 1\n```"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
            }"#,
        )
        .unwrap();
        let response = provider("gpt-4o").convert_response(body, Instant::now()).unwrap();
        assert_eq!(response.content, "```python\nx = 1\n```");
        assert_eq!(response.usage, TokenUsage::new(12, 7));
        assert_eq!(response.metadata.provider, "gpt-4o");
        assert_eq!(response.metadata.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let body: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [], "usage": null}"#).unwrap();
        let err = provider("gpt-4o").convert_response(body, Instant::now()).unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::ParseError));
    }
}
