//! Providers Command
//!
//! List registered providers and whether their credential is set.

use std::path::Path;

use crate::ai::ProviderRegistry;
use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

pub fn run(config: Option<&Path>, format: &str) -> Result<()> {
    let config = ConfigLoader::load(config)?;
    let registry = ProviderRegistry::from_config(&config)?;
    let availability = registry.availability();

    if format == "json" {
        let list: Vec<_> = registry
            .configs()
            .into_iter()
            .zip(&availability)
            .map(|(c, a)| {
                serde_json::json!({
                    "provider_id": c.provider_id,
                    "kind": c.kind,
                    "model_id": c.model_id,
                    "api_base": c.api_base(),
                    "credential_env_key": c.credential_env_key,
                    "enabled": a.enabled,
                    "default": c.provider_id.as_str() == config.llm.default_provider,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    let output = Output::new();
    output.header("Providers");
    let rows: Vec<Vec<String>> = availability
        .iter()
        .map(|a| {
            let marker = if a.provider_id.as_str() == config.llm.default_provider {
                "*"
            } else {
                ""
            };
            vec![
                format!("{}{}", a.provider_id, marker),
                a.model_id.clone(),
                a.credential_env_key.clone(),
                if a.enabled { "enabled" } else { "no credential" }.to_string(),
            ]
        })
        .collect();
    output.table(&["Provider", "Model", "Credential", "Status"], &rows);

    if availability.iter().all(|a| !a.enabled) {
        output.warning("No API keys found. Set a provider key in the environment or .env");
    }
    Ok(())
}
