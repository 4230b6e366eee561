//! CLI Common Utilities
//!
//! Shared initialization for command handlers: configuration, the provider
//! registry, prompt templates and the metrics store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ai::{Dispatcher, PromptTemplates, ProviderRegistry, RetryPolicy};
use crate::config::{Config, ConfigLoader};
use crate::pipeline::{FilePipeline, PromptChoice};
use crate::storage::{MetricsStore, SharedMetricsStore};
use crate::types::{ProviderId, Result};

/// Label stored in metrics rows for `--custom-prompt` runs
pub const CUSTOM_PROMPT_LABEL: &str = "custom";

/// Command execution context
///
/// Created via `CommandContext::load()`; commands that only print
/// configuration use `ConfigLoader` directly.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub prompts: PromptTemplates,
}

impl CommandContext {
    /// Load configuration and build the provider registry.
    ///
    /// Providers without a credential are logged, not rejected.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = ConfigLoader::load(explicit)?;
        let registry = Arc::new(ProviderRegistry::from_config(&config)?);
        registry.log_availability();
        let prompts = PromptTemplates::from_config(&config.prompts)?;

        Ok(Self {
            config,
            registry,
            prompts,
        })
    }

    /// CLI value, else `llm.default_provider`
    pub fn provider_id(&self, provider: Option<&str>) -> ProviderId {
        ProviderId::from(provider.unwrap_or(&self.config.llm.default_provider))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.retry)
    }

    pub fn dispatcher(&self) -> Result<Arc<Dispatcher>> {
        Ok(Arc::new(Dispatcher::from_registry(
            Arc::clone(&self.registry),
            self.retry_policy(),
        )?))
    }

    /// CLI value, else `metrics.path`
    pub fn metrics_path(&self, path: Option<&Path>) -> PathBuf {
        path.map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.metrics.path.clone())
    }

    pub fn open_metrics(&self, path: Option<&Path>) -> Result<SharedMetricsStore> {
        Ok(Arc::new(MetricsStore::open(self.metrics_path(path))?))
    }

    /// Custom text wins over a template id, which wins over the default
    pub fn prompt_choice(&self, id: Option<&str>, custom: Option<&str>) -> Result<PromptChoice> {
        let template = self.prompts.select(id, custom)?;
        let label = match (custom, id) {
            (Some(_), _) => CUSTOM_PROMPT_LABEL,
            (None, Some(id)) => id,
            (None, None) => self.prompts.default_id(),
        };
        Ok(PromptChoice::new(label, template))
    }

    /// Fail early for unknown ids, before any file is touched
    pub fn check_provider(&self, provider_id: &ProviderId) -> Result<()> {
        self.registry.get_config(provider_id.as_str()).map(|_| ())
    }

    pub fn pipeline(
        &self,
        provider_id: ProviderId,
        metrics: Option<&Path>,
        prompt: PromptChoice,
    ) -> Result<FilePipeline> {
        self.check_provider(&provider_id)?;
        Ok(FilePipeline::new(
            self.dispatcher()?,
            self.open_metrics(metrics)?,
            provider_id,
            prompt,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CommandContext {
        let config = Config::default();
        CommandContext {
            registry: Arc::new(ProviderRegistry::from_config(&config).unwrap()),
            prompts: PromptTemplates::from_config(&config.prompts).unwrap(),
            config,
        }
    }

    #[test]
    fn test_prompt_choice_labels() {
        let ctx = context();
        assert_eq!(ctx.prompt_choice(None, None).unwrap().label, "1");
        assert_eq!(ctx.prompt_choice(Some("2"), None).unwrap().label, "2");

        let custom = ctx.prompt_choice(Some("2"), Some("Make it short")).unwrap();
        assert_eq!(custom.label, CUSTOM_PROMPT_LABEL);
        assert_eq!(custom.template, "Make it short");

        assert!(ctx.prompt_choice(Some("9"), None).is_err());
    }

    #[test]
    fn test_provider_defaults_to_config() {
        let ctx = context();
        assert_eq!(ctx.provider_id(None).as_str(), "claude-3-7-sonnet");
        assert_eq!(ctx.provider_id(Some("gpt-4o")).as_str(), "gpt-4o");
        assert!(ctx.check_provider(&ProviderId::from("gpt-5")).is_err());
    }

    #[test]
    fn test_metrics_path_override() {
        let ctx = context();
        assert_eq!(ctx.metrics_path(None), PathBuf::from("debloat_results.db"));
        assert_eq!(
            ctx.metrics_path(Some(Path::new("/tmp/m.db"))),
            PathBuf::from("/tmp/m.db")
        );
    }
}
