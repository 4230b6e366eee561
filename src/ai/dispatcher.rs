//! Invocation Dispatcher
//!
//! Routes an [`OptimizationRequest`] to the provider's transport, applies the
//! retry policy, and extracts code from the response.
//!
//! Configuration problems (unknown id, missing credential) are returned as
//! errors before any transport is called. Transport failures never escape:
//! they degrade to the original source with `succeeded = false`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info};

use super::extract::{ExtractionKind, extract_code_for};
use super::provider::{
    LlmResponse, ProviderConfig, ProviderRegistry, SharedProvider, TokenUsage, create_provider,
};
use super::retry::{InvocationState, RetryOutcome, RetryPolicy};
use crate::analyzer::Language;
use crate::types::{DebloatError, ProviderId, Result};

/// One call to optimize a piece of code
#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub provider_id: ProviderId,
    /// Full prompt, instructions and fenced code included
    pub prompt_text: String,
    /// Returned unchanged when the invocation fails
    pub source_code: String,
}

impl OptimizationRequest {
    pub fn new(
        provider_id: impl Into<ProviderId>,
        prompt_text: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            prompt_text: prompt_text.into(),
            source_code: source_code.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Code to persist; the original source when `succeeded` is false
    pub extracted_code: String,
    /// Model output as received; empty when no response arrived
    pub raw_response: String,
    pub succeeded: bool,
    /// Terminal state: `Success` or `Failed`
    pub state: InvocationState,
    /// Every state visited during the invocation
    pub history: Vec<InvocationState>,
    pub attempts: u32,
    pub total_backoff: Duration,
    /// How the code was found; `None` when no response arrived
    pub extraction: Option<ExtractionKind>,
    pub usage: Option<TokenUsage>,
    /// Last transport error, for reporting
    pub error: Option<String>,
}

impl OptimizationResult {
    pub fn is_degraded(&self) -> bool {
        self.extraction == Some(ExtractionKind::Raw)
    }
}

/// A transport plus the config it was built from; `None` for transports
/// bound explicitly, which survive registry reloads
struct Binding {
    built_from: Option<ProviderConfig>,
    transport: SharedProvider,
}

impl Binding {
    fn serves(&self, config: &ProviderConfig) -> bool {
        self.built_from.as_ref().is_none_or(|built| built == config)
    }
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    policy: RetryPolicy,
    transports: RwLock<HashMap<ProviderId, Binding>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("transports", &transports.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher with no prebuilt transports; they are created per call
    /// from the credential environment
    pub fn new(registry: Arc<ProviderRegistry>, policy: RetryPolicy) -> Self {
        Self {
            registry,
            policy,
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Build transports up front for every provider whose credential is set
    pub fn from_registry(registry: Arc<ProviderRegistry>, policy: RetryPolicy) -> Result<Self> {
        let mut transports = HashMap::new();
        for config in registry.configs() {
            if let Some(key) = config.credential() {
                let transport = create_provider(&config, key)?;
                transports.insert(
                    config.provider_id.clone(),
                    Binding {
                        built_from: Some(config),
                        transport,
                    },
                );
            }
        }
        debug!(transports = transports.len(), "Dispatcher ready");
        Ok(Self {
            registry,
            policy,
            transports: RwLock::new(transports),
        })
    }

    /// Bind a transport to a provider id, replacing any existing binding
    pub fn with_transport(self, provider_id: impl Into<ProviderId>, transport: SharedProvider) -> Self {
        self.transports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                provider_id.into(),
                Binding {
                    built_from: None,
                    transport,
                },
            );
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn bound(&self, config: &ProviderConfig) -> Option<SharedProvider> {
        let transports = self.transports.read().unwrap_or_else(|e| e.into_inner());
        transports
            .get(&config.provider_id)
            .filter(|binding| binding.serves(config))
            .map(|binding| Arc::clone(&binding.transport))
    }

    fn disabled(config: &ProviderConfig) -> DebloatError {
        DebloatError::ProviderDisabled {
            provider_id: config.provider_id.to_string(),
            env_key: config.credential_env_key.clone(),
        }
    }

    /// Transport for the current config; a cached one built from an older
    /// config is rebuilt
    fn transport(&self, config: &ProviderConfig) -> Result<SharedProvider> {
        if let Some(transport) = self.bound(config) {
            return Ok(transport);
        }
        let key = config.credential().ok_or_else(|| Self::disabled(config))?;
        let transport = create_provider(config, key)?;
        debug!(provider = %config.provider_id, model = %config.model_id, "Built transport");
        self.transports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                config.provider_id.clone(),
                Binding {
                    built_from: Some(config.clone()),
                    transport: Arc::clone(&transport),
                },
            );
        Ok(transport)
    }

    /// Fail unless `provider_id` is registered and can be dispatched to
    pub fn ensure_available(&self, provider_id: &str) -> Result<ProviderConfig> {
        let config = self.registry.get_config(provider_id)?;
        if self.bound(&config).is_none() && !config.is_enabled() {
            return Err(Self::disabled(&config));
        }
        Ok(config)
    }

    /// Send a prompt and return the raw response with retry bookkeeping
    pub async fn invoke(&self, provider_id: &str, prompt: &str) -> Result<RetryOutcome<LlmResponse>> {
        let config = self.registry.get_config(provider_id)?;
        let transport = self.transport(&config)?;
        let policy = self.policy.for_provider(&config);

        let outcome = policy
            .run(provider_id, |attempt| {
                let transport = Arc::clone(&transport);
                async move {
                    debug!(provider = provider_id, attempt, "Invoking provider");
                    transport.generate(prompt).await
                }
            })
            .await;

        Ok(outcome)
    }

    /// Optimize code; only configuration errors are returned as `Err`
    pub async fn optimize(
        &self,
        request: &OptimizationRequest,
        language: Language,
    ) -> Result<OptimizationResult> {
        let provider_id = request.provider_id.as_str();
        let outcome = self.invoke(provider_id, &request.prompt_text).await?;
        let state = outcome.state();

        match outcome.result {
            Ok(response) => {
                let extraction = extract_code_for(&response.content, language);
                info!(
                    provider = provider_id,
                    attempts = outcome.attempts,
                    tokens = response.usage.total(),
                    elapsed_ms = response.timing.total_ms,
                    "Optimization succeeded"
                );
                Ok(OptimizationResult {
                    extracted_code: extraction.code,
                    raw_response: response.content,
                    succeeded: true,
                    state,
                    history: outcome.history,
                    attempts: outcome.attempts,
                    total_backoff: outcome.total_backoff,
                    extraction: Some(extraction.kind),
                    usage: Some(response.usage),
                    error: None,
                })
            }
            Err(e) => {
                error!(
                    provider = provider_id,
                    attempts = outcome.attempts,
                    "Optimization failed, keeping original code: {}",
                    e
                );
                Ok(OptimizationResult {
                    extracted_code: request.source_code.clone(),
                    raw_response: String::new(),
                    succeeded: false,
                    state,
                    history: outcome.history,
                    attempts: outcome.attempts,
                    total_backoff: outcome.total_backoff,
                    extraction: None,
                    usage: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }
}
