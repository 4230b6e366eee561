//! Optimize Command
//!
//! Debloat a single file.
//!
//! Usage:
//!   debloater optimize <FILE> --provider <ID> [--metrics PATH]
//!                      [--prompt ID | --custom-prompt TEXT] [--export-path PATH]

use std::path::{Path, PathBuf};

use tokio::runtime::Runtime;
use tracing::{error, info};

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::pipeline::{FileJob, normalize_path};
use crate::types::{DebloatError, Result};

#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    pub file: PathBuf,
    pub provider: Option<String>,
    pub metrics: Option<PathBuf>,
    pub prompt: Option<String>,
    pub custom_prompt: Option<String>,
    pub export_path: Option<PathBuf>,
}

/// Returns whether the provider produced new code; `Ok(false)` means the
/// original was kept.
pub fn run(config: Option<&Path>, options: OptimizeOptions) -> Result<bool> {
    let ctx = CommandContext::load(config)?;
    let provider_id = ctx.provider_id(options.provider.as_deref());

    let source = normalize_path(&options.file)?;
    if !source.is_file() {
        return Err(DebloatError::Config(format!(
            "Code file not found: {}",
            source.display()
        )));
    }

    let prompt = ctx.prompt_choice(options.prompt.as_deref(), options.custom_prompt.as_deref())?;
    info!("Using prompt: {}", prompt.label);

    let pipeline = ctx.pipeline(provider_id, options.metrics.as_deref(), prompt)?;
    let job = match options.export_path {
        Some(export) => FileJob::export(source, normalize_path(export)?),
        None => FileJob::in_place(source),
    };

    let rt = Runtime::new()?;
    let outcome = rt.block_on(pipeline.process(&job))?;

    let output = Output::new();
    if outcome.succeeded() {
        output.success(&format!(
            "{}: {} → {} lines ({:.2}% reduction)",
            outcome.record.file_name,
            outcome.record.loc_before,
            outcome.record.loc_after,
            outcome.record.reduction_percent
        ));
        if let Some(path) = &outcome.written_to {
            output.field("Written to", path.display());
        }
        if let Some(backup) = &outcome.backup {
            output.field("Backup", backup.display());
        }
        if outcome.result.is_degraded() {
            output.warning("Response had no code block; the whole reply was used");
        }
        info!("Debloat completed successfully");
    } else {
        output.error(&format!(
            "{}: provider failed after {} attempt(s); original code kept",
            outcome.record.file_name, outcome.result.attempts
        ));
        if let Some(reason) = &outcome.result.error {
            output.field("Reason", reason);
        }
        error!("Debloat failed");
    }
    output.field("Metrics", ctx.metrics_path(options.metrics.as_deref()).display());

    Ok(outcome.succeeded())
}
