//! Config Command
//!
//! Manage debloater configuration.
//!
//! Usage:
//!   debloater config show [-f json]
//!   debloater config path
//!   debloater config init [-g] [--force]

use std::path::Path;

use crate::config::ConfigLoader;
use crate::types::Result;

/// Show the effective configuration (merged from all sources)
pub fn show(config: Option<&Path>, format: &str) -> Result<()> {
    let loaded = ConfigLoader::load(config)?;
    println!("{}", ConfigLoader::render(&loaded, format == "json")?);
    Ok(())
}

/// Show configuration paths
pub fn path(config: Option<&Path>) -> Result<()> {
    ConfigLoader::show_path(config);
    Ok(())
}

/// Initialize global configuration
pub fn init_global(force: bool) -> Result<()> {
    let config_path = ConfigLoader::init_global(force)?;
    println!("✓ Initialized global configuration");
    println!("  Config:    {}", config_path.display());
    Ok(())
}

/// Initialize project configuration
pub fn init_project(force: bool) -> Result<()> {
    let config_path = ConfigLoader::init_project(force)?;
    println!("✓ Initialized project configuration");
    println!("  Directory: {}", ConfigLoader::project_dir().display());
    println!("  Config:    {}", config_path.display());
    Ok(())
}
