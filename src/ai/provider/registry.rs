//! Provider Registry
//!
//! Immutable per-provider settings looked up by provider id. The whole table
//! can be swapped by [`ProviderRegistry::reload`]; readers hold a snapshot and
//! never observe a half-updated table.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::{Config, ProviderOverride};
use crate::constants::llm;
use crate::types::{DebloatError, ProviderId, Result};

/// Wire protocol family of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    /// OpenAI-compatible chat completions on DeepSeek's endpoint
    DeepSeek,
}

impl ProviderKind {
    pub fn default_api_base(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::DeepSeek => "https://api.deepseek.com/v1",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
            Self::DeepSeek => write!(f, "deepseek"),
        }
    }
}

/// Settings for one provider
///
/// Holds the *name* of the credential variable, never the credential itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: ProviderId,
    pub kind: ProviderKind,
    /// Environment variable holding the API key
    pub credential_env_key: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Endpoint override; the kind's default when unset
    pub api_base: Option<String>,
    pub timeout_secs: u64,
    /// Attempt limit overriding the shared retry policy
    pub max_attempts: Option<u32>,
}

impl ProviderConfig {
    fn builtin(
        id: &str,
        kind: ProviderKind,
        credential_env_key: &str,
        model_id: &str,
    ) -> Self {
        Self {
            provider_id: ProviderId::from(id),
            kind,
            credential_env_key: credential_env_key.to_string(),
            model_id: model_id.to_string(),
            max_tokens: llm::DEFAULT_MAX_TOKENS,
            temperature: llm::DEFAULT_TEMPERATURE,
            api_base: None,
            timeout_secs: llm::DEFAULT_TIMEOUT_SECS,
            max_attempts: None,
        }
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_base())
            .trim_end_matches('/')
    }

    /// Read the API key from the environment; empty values count as unset
    pub fn credential(&self) -> Option<SecretString> {
        std::env::var(&self.credential_env_key)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from)
    }

    pub fn is_enabled(&self) -> bool {
        self.credential().is_some()
    }

    fn apply(&mut self, entry: &ProviderOverride) {
        if let Some(kind) = entry.kind {
            self.kind = kind;
        }
        if let Some(key) = &entry.credential_env_key {
            self.credential_env_key = key.clone();
        }
        if let Some(model) = &entry.model_id {
            self.model_id = model.clone();
        }
        if let Some(max_tokens) = entry.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(temperature) = entry.temperature {
            self.temperature = temperature;
        }
        if let Some(base) = &entry.api_base {
            self.api_base = Some(base.clone());
        }
        if let Some(attempts) = entry.max_attempts {
            self.max_attempts = Some(attempts);
        }
    }

    fn from_entry(id: &str, entry: &ProviderOverride) -> Result<Self> {
        let missing = |field: &str| {
            DebloatError::Config(format!(
                "providers.{} is not a built-in provider and needs '{}'",
                id, field
            ))
        };
        let kind = entry.kind.ok_or_else(|| missing("kind"))?;
        let credential_env_key = entry
            .credential_env_key
            .as_deref()
            .ok_or_else(|| missing("credential_env_key"))?;
        let model_id = entry.model_id.as_deref().ok_or_else(|| missing("model_id"))?;

        let mut config = Self::builtin(id, kind, credential_env_key, model_id);
        config.apply(entry);
        Ok(config)
    }
}

/// Whether a provider's credential is present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAvailability {
    pub provider_id: ProviderId,
    pub credential_env_key: String,
    pub model_id: String,
    pub enabled: bool,
}

type ProviderTable = BTreeMap<ProviderId, ProviderConfig>;

/// Provider table shared by the dispatcher and the CLI
#[derive(Debug)]
pub struct ProviderRegistry {
    table: RwLock<Arc<ProviderTable>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    /// The four providers shipped with the tool
    pub fn builtin() -> Self {
        Self::from_configs(Self::builtin_configs())
    }

    fn builtin_configs() -> Vec<ProviderConfig> {
        vec![
            ProviderConfig::builtin(
                "claude-3-7-sonnet",
                ProviderKind::Anthropic,
                "ANTHROPIC_API_KEY",
                "claude-3-7-sonnet-20250219",
            ),
            ProviderConfig::builtin(
                "gemini-2-0-flash",
                ProviderKind::Gemini,
                "GOOGLE_API_KEY",
                "gemini-1.5-flash",
            ),
            ProviderConfig::builtin("gpt-4o", ProviderKind::OpenAi, "OPENAI_API_KEY", "gpt-4o"),
            ProviderConfig::builtin(
                "deepseek-r1",
                ProviderKind::DeepSeek,
                "DEEPSEEK_API_KEY",
                "deepseek-code-r1",
            ),
        ]
    }

    /// Build a registry from an explicit list, e.g. a mock table in tests
    pub fn from_configs(configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            table: RwLock::new(Arc::new(Self::to_table(configs))),
        }
    }

    /// Built-ins overridden or extended by the `[providers]` config section
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut table = Self::to_table(Self::builtin_configs());

        for (id, entry) in &config.providers {
            match table.get_mut(id.as_str()) {
                Some(existing) => {
                    debug!(provider = %id, "Applying provider override");
                    existing.apply(entry);
                }
                None => {
                    debug!(provider = %id, "Registering provider from config");
                    table.insert(ProviderId::from(id.as_str()), ProviderConfig::from_entry(id, entry)?);
                }
            }
        }

        for provider in table.values_mut() {
            provider.timeout_secs = config.llm.timeout_secs;
        }

        Ok(Self {
            table: RwLock::new(Arc::new(table)),
        })
    }

    fn to_table(configs: impl IntoIterator<Item = ProviderConfig>) -> ProviderTable {
        configs
            .into_iter()
            .map(|c| (c.provider_id.clone(), c))
            .collect()
    }

    fn snapshot(&self) -> Arc<ProviderTable> {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Look up a provider, failing with `UnknownProvider` for unregistered ids
    pub fn get_config(&self, provider_id: &str) -> Result<ProviderConfig> {
        let table = self.snapshot();
        table.get(provider_id).cloned().ok_or_else(|| {
            let ids: Vec<&str> = table.keys().map(ProviderId::as_str).collect();
            DebloatError::unknown_provider(provider_id, &ids)
        })
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.snapshot().contains_key(provider_id)
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<ProviderId> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn configs(&self) -> Vec<ProviderConfig> {
        self.snapshot().values().cloned().collect()
    }

    /// Replace the whole table in one step
    pub fn reload(&self, configs: impl IntoIterator<Item = ProviderConfig>) {
        let table = Arc::new(Self::to_table(configs));
        let count = table.len();
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        *guard = table;
        info!(providers = count, "Provider registry reloaded");
    }

    pub fn availability(&self) -> Vec<ProviderAvailability> {
        self.snapshot()
            .values()
            .map(|c| ProviderAvailability {
                provider_id: c.provider_id.clone(),
                credential_env_key: c.credential_env_key.clone(),
                model_id: c.model_id.clone(),
                enabled: c.is_enabled(),
            })
            .collect()
    }

    /// Log which providers have credentials; missing ones are not an error
    pub fn log_availability(&self) {
        let availability = self.availability();
        let enabled: Vec<&str> = availability
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.provider_id.as_str())
            .collect();

        for a in availability.iter().filter(|a| !a.enabled) {
            debug!(
                provider = %a.provider_id,
                env_key = %a.credential_env_key,
                "Provider disabled: credential not set"
            );
        }

        if enabled.is_empty() {
            warn!("No API keys found. Set a provider key (e.g. ANTHROPIC_API_KEY) in the environment or .env");
        } else {
            info!("Available providers: {}", enabled.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let registry = ProviderRegistry::builtin();
        let ids: Vec<String> = registry.ids().into_iter().map(|i| i.into_inner()).collect();
        assert_eq!(
            ids,
            vec!["claude-3-7-sonnet", "deepseek-r1", "gemini-2-0-flash", "gpt-4o"]
        );

        let claude = registry.get_config("claude-3-7-sonnet").unwrap();
        assert_eq!(claude.kind, ProviderKind::Anthropic);
        assert_eq!(claude.credential_env_key, "ANTHROPIC_API_KEY");
        assert_eq!(claude.model_id, "claude-3-7-sonnet-20250219");
        assert_eq!(claude.max_tokens, 4000);
        assert!((claude.temperature - 0.1).abs() < f32::EPSILON);

        let deepseek = registry.get_config("deepseek-r1").unwrap();
        assert_eq!(deepseek.api_base(), "https://api.deepseek.com/v1");
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::builtin();
        let err = registry.get_config("llama-9000").unwrap_err();
        assert!(matches!(err, DebloatError::UnknownProvider { .. }));
        assert!(err.to_string().contains("gpt-4o"));
    }

    #[test]
    fn test_config_overrides_and_extends() {
        let mut config = Config::default();
        config.llm.timeout_secs = 42;
        config.providers.insert(
            "deepseek-r1".to_string(),
            ProviderOverride {
                model_id: Some("deepseek-coder".to_string()),
                max_attempts: Some(1),
                ..Default::default()
            },
        );
        config.providers.insert(
            "local".to_string(),
            ProviderOverride {
                kind: Some(ProviderKind::OpenAi),
                credential_env_key: Some("LOCAL_KEY".to_string()),
                model_id: Some("llama-3".to_string()),
                api_base: Some("http://localhost:8080/v1/".to_string()),
                ..Default::default()
            },
        );

        let registry = ProviderRegistry::from_config(&config).unwrap();
        let deepseek = registry.get_config("deepseek-r1").unwrap();
        assert_eq!(deepseek.model_id, "deepseek-coder");
        assert_eq!(deepseek.max_attempts, Some(1));
        assert_eq!(deepseek.kind, ProviderKind::DeepSeek);
        assert_eq!(deepseek.timeout_secs, 42);

        let local = registry.get_config("local").unwrap();
        assert_eq!(local.api_base(), "http://localhost:8080/v1");
        assert_eq!(local.max_tokens, 4000);
    }

    #[test]
    fn test_incomplete_new_provider_is_rejected() {
        let mut config = Config::default();
        config.providers.insert(
            "half".to_string(),
            ProviderOverride {
                kind: Some(ProviderKind::Gemini),
                ..Default::default()
            },
        );
        let err = ProviderRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("credential_env_key"));
    }

    #[test]
    fn test_reload_replaces_whole_table() {
        let registry = ProviderRegistry::builtin();
        let before = registry.snapshot();

        registry.reload(vec![ProviderConfig::builtin(
            "only",
            ProviderKind::OpenAi,
            "ONLY_KEY",
            "m",
        )]);

        assert_eq!(before.len(), 4);
        assert_eq!(registry.ids(), vec![ProviderId::from("only")]);
        assert!(!registry.contains("gpt-4o"));
    }

    #[test]
    fn test_availability_follows_environment() {
        let registry = ProviderRegistry::from_configs(vec![
            ProviderConfig::builtin(
                "set",
                ProviderKind::OpenAi,
                "DEBLOATER_TEST_REGISTRY_KEY_SET",
                "m",
            ),
            ProviderConfig::builtin(
                "unset",
                ProviderKind::OpenAi,
                "DEBLOATER_TEST_REGISTRY_KEY_UNSET",
                "m",
            ),
        ]);
        // SAFETY: the variable names are unique to this test
        unsafe {
            std::env::set_var("DEBLOATER_TEST_REGISTRY_KEY_SET", "sk-test");
        }
        let availability = registry.availability();
        assert!(availability[0].enabled);
        assert!(!availability[1].enabled);
    }
}
