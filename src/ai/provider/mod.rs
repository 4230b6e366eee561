//! LLM Provider Abstraction
//!
//! Defines the LlmProvider trait shared by every transport.
//! All providers return `LlmResponse` with token usage metrics.
//!
//! ## Modules
//!
//! - `registry`: Provider table looked up by provider id
//! - `anthropic`, `openai`, `gemini`: HTTP transports, one per wire shape

mod anthropic;
mod gemini;
mod openai;
mod registry;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use registry::{ProviderAvailability, ProviderConfig, ProviderKind, ProviderRegistry};

// Re-export error types from centralized location
pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::constants::llm::CONNECTION_TIMEOUT_SECS;
use crate::types::{DebloatError, Result};

// =============================================================================
// LLM Response with Usage Metrics
// =============================================================================

/// Complete LLM response including content and usage metrics
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Generated text
    pub content: String,
    /// Token usage metrics
    pub usage: TokenUsage,
    /// Response timing
    pub timing: ResponseTiming,
    /// Provider and model info
    pub metadata: ResponseMetadata,
}

impl LlmResponse {
    /// Create response with content only (usage unknown)
    pub fn content_only(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            timing: ResponseTiming::default(),
            metadata: ResponseMetadata::default(),
        }
    }
}

/// Token usage metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens (prompt)
    pub input_tokens: u32,
    /// Output tokens (response)
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used (input + output)
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Response timing metrics
#[derive(Debug, Clone, Default)]
pub struct ResponseTiming {
    /// Total response time in milliseconds (wall clock)
    pub total_ms: u64,
}

impl ResponseTiming {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            total_ms: duration.as_millis() as u64,
        }
    }
}

/// Response metadata
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    /// Model used
    pub model: String,
    /// Provider id
    pub provider: String,
    /// Why generation stopped, when the provider says
    pub finish_reason: Option<String>,
}

/// Shared LLM provider type for concurrent access across pipeline stages.
pub type SharedProvider = Arc<dyn LlmProvider + Send + Sync>;

// =============================================================================
// LLM Provider Trait
// =============================================================================

/// One transport binding: turns a prompt into the model's raw text
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one request; no retries happen at this level
    async fn generate(&self, prompt: &str) -> Result<LlmResponse>;

    /// Provider id for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Create the transport matching `config.kind`
pub fn create_provider(config: &ProviderConfig, api_key: SecretString) -> Result<SharedProvider> {
    match config.kind {
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicProvider::new(config, api_key)?)),
        ProviderKind::OpenAi | ProviderKind::DeepSeek => {
            Ok(Arc::new(OpenAiProvider::new(config, api_key)?))
        }
        ProviderKind::Gemini => Ok(Arc::new(GeminiProvider::new(config, api_key)?)),
    }
}

// =============================================================================
// HTTP Helpers
// =============================================================================

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS))
        .build()
        .map_err(|e| DebloatError::LlmApi(format!("Failed to create HTTP client: {}", e)))
}

/// Send a prepared request and decode a JSON body, classifying every failure
async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| ErrorClassifier::classify_reqwest(&e, provider))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("{} API error ({}): {}", provider, status, body);
        return Err(ErrorClassifier::classify_http_status(status.as_u16(), &message, provider).into());
    }

    let body = response
        .text()
        .await
        .map_err(|e| ErrorClassifier::classify_reqwest(&e, provider))?;
    debug!(provider, bytes = body.len(), "Received response body");

    parse_body(&body, provider)
}

fn parse_body<T: DeserializeOwned>(body: &str, provider: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        LlmError::with_provider(
            ErrorCategory::ParseError,
            format!("Failed to parse {} response: {}", provider, e),
            provider,
        )
        .into()
    })
}

fn empty_content(provider: &str) -> DebloatError {
    LlmError::with_provider(
        ErrorCategory::ParseError,
        format!("No content in {} response", provider),
        provider,
    )
    .into()
}
