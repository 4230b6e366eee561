//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/debloater/) and project (.debloater/) level configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ai::provider::ProviderKind;
use crate::constants::{batch, llm, metrics, retry};
use crate::types::{DebloatError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// LLM provider settings
    pub llm: LlmConfig,

    /// Retry and backoff settings shared by every provider
    pub retry: RetryConfig,

    /// Batch driver settings
    pub batch: BatchConfig,

    /// Metrics store settings
    pub metrics: MetricsConfig,

    /// Prompt templates
    pub prompts: PromptsConfig,

    /// Per-provider overrides and additional providers, keyed by provider id
    pub providers: BTreeMap<String, ProviderOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            metrics: MetricsConfig::default(),
            prompts: PromptsConfig::default(),
            providers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `DebloatError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.llm.timeout_secs == 0 {
            return Err(DebloatError::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(DebloatError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.backoff_factor < 1.0 {
            return Err(DebloatError::Config(format!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            )));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(DebloatError::Config(format!(
                "retry.max_delay_ms ({}) must not be smaller than retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }

        if self.batch.concurrency == 0 {
            return Err(DebloatError::Config(
                "batch.concurrency must be greater than 0".to_string(),
            ));
        }

        for (id, entry) in &self.providers {
            if let Some(temperature) = entry.temperature
                && !(0.0..=2.0).contains(&temperature)
            {
                return Err(DebloatError::Config(format!(
                    "providers.{}.temperature must be between 0.0 and 2.0, got {}",
                    id, temperature
                )));
            }
            if entry.max_tokens == Some(0) {
                return Err(DebloatError::Config(format!(
                    "providers.{}.max_tokens must be greater than 0",
                    id
                )));
            }
            if let Some(base) = &entry.api_base
                && let Err(e) = url::Url::parse(base)
            {
                return Err(DebloatError::Config(format!(
                    "providers.{}.api_base '{}' is not a valid URL: {}",
                    id, base, e
                )));
            }
            if entry.max_attempts == Some(0) {
                return Err(DebloatError::Config(format!(
                    "providers.{}.max_attempts must be at least 1",
                    id
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used when the CLI does not name one
    pub default_provider: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: llm::DEFAULT_PROVIDER.to_string(),
            timeout_secs: llm::DEFAULT_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per invocation, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay after every retry
    pub backoff_factor: f32,

    /// Upper bound for a single delay
    pub max_delay_ms: u64,

    /// Randomize delays to spread out concurrent retries
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            backoff_factor: retry::BACKOFF_FACTOR,
            max_delay_ms: retry::MAX_DELAY_MS,
            jitter: false,
        }
    }
}

// =============================================================================
// Batch Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Minimum spacing between two dispatches
    pub pacing_ms: u64,

    /// Files processed in parallel
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            pacing_ms: batch::PACING_MS,
            concurrency: batch::CONCURRENCY,
        }
    }
}

// =============================================================================
// Metrics Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics database path (relative to the working directory)
    pub path: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(metrics::DEFAULT_PATH),
        }
    }
}

// =============================================================================
// Prompt Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Template id used when none is given
    pub default: String,

    /// Additional templates; an entry named like a built-in replaces it
    pub templates: BTreeMap<String, String>,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            default: "1".to_string(),
            templates: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Provider Overrides
// =============================================================================

/// Provider entry from configuration.
///
/// For a built-in id every field is optional and overrides the built-in value.
/// A new id must at least name `kind`, `credential_env_key` and `model_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub kind: Option<ProviderKind>,
    pub credential_env_key: Option<String>,
    pub model_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub api_base: Option<String>,
    pub max_attempts: Option<u32>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.llm.default_provider, "claude-3-7-sonnet");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.batch.pacing_ms, 2000);
        assert_eq!(config.batch.concurrency, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_provider_temperature() {
        let mut config = Config::default();
        config.providers.insert(
            "gpt-4o".to_string(),
            ProviderOverride {
                temperature: Some(3.5),
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("providers.gpt-4o.temperature"));
    }

    #[test]
    fn test_validate_rejects_relative_api_base() {
        let mut config = Config::default();
        config.providers.insert(
            "deepseek-r1".to_string(),
            ProviderOverride {
                api_base: Some("api.deepseek.com/v1".to_string()),
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("providers.deepseek-r1.api_base"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.batch.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_overrides() {
        let toml_text = r#"
            [retry]
            max_attempts = 5

            [providers.local-llama]
            kind = "openai"
            credential_env_key = "LLAMA_KEY"
            model_id = "llama-3"
            api_base = "http://localhost:8080/v1"
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 2000);
        let entry = &config.providers["local-llama"];
        assert_eq!(entry.kind, Some(ProviderKind::OpenAi));
        assert_eq!(entry.model_id.as_deref(), Some("llama-3"));
    }
}
