//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/debloater/config.toml)
//! 3. Project config (.debloater/config.toml)
//! 4. Explicit `--config` file
//! 5. Environment variables (DEBLOATER_* prefix, `__` separates sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{DebloatError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → explicit file → env vars
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        if let Some(path) = explicit
            && !path.exists()
        {
            return Err(DebloatError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let config: Config = Self::figment(explicit)
            .extract()
            .map_err(|e| DebloatError::Config(format!("Configuration error: {}", e)))?;

        // Validate configuration after loading
        config.validate()?;

        Ok(config)
    }

    /// Build the layered Figment without extracting it
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        if let Some(path) = explicit {
            debug!("Loading config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        // DEBLOATER_RETRY__MAX_ATTEMPTS -> retry.max_attempts
        figment.merge(Env::prefixed("DEBLOATER_").split("__").lowercase(true))
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/debloater/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("debloater"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    /// Get project data directory
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".debloater")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path(explicit: Option<&Path>) {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:   {} {}", exists, global.display());
        } else {
            println!("  Global:   (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project:  {} {}", exists, project.display());

        if let Some(path) = explicit {
            let exists = if path.exists() { "✓" } else { "✗" };
            println!("  Explicit: {} {}", exists, path.display());
        }
    }

    /// Render the effective configuration
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| DebloatError::Config(e.to_string()))
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize global configuration
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            DebloatError::Config("Cannot determine global config directory".to_string())
        })?;
        Self::write_default(&global_dir, force)
    }

    /// Initialize project configuration
    pub fn init_project(force: bool) -> Result<PathBuf> {
        Self::write_default(&Self::project_dir(), force)
    }

    fn write_default(dir: &Path, force: bool) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let config_path = dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_config_content())?;
            info!("Created config: {}", config_path.display());
        } else {
            info!("Config exists: {}", config_path.display());
        }

        Ok(config_path)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Generate default config content (TOML)
    fn default_config_content() -> String {
        r#"# Debloater Configuration
# Project settings in .debloater/config.toml override the global file.

version = "1.0"

[llm]
default_provider = "claude-3-7-sonnet"
timeout_secs = 300

# Applied to every provider unless providers.<id>.max_attempts says otherwise
[retry]
max_attempts = 3
base_delay_ms = 2000
backoff_factor = 2.0
max_delay_ms = 60000
jitter = false

[batch]
pacing_ms = 2000
concurrency = 1

[metrics]
path = "debloat_results.db"

[prompts]
default = "1"

# [prompts.templates]
# terse = "Remove dead code from this file."

# [providers.deepseek-r1]
# model_id = "deepseek-coder"
# max_attempts = 1
"#
        .to_string()
    }
}
