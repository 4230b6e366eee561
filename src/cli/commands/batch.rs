//! Batch Command
//!
//! Usage:
//!   debloater batch process --csv PATH [--provider ID] [--metrics PATH]
//!                           [--export-dir DIR] [--concurrency N] [--pacing-ms MS] [--prompt ID]
//!   debloater batch template [--output PATH]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::pipeline::{BatchDriver, BatchOptions, normalize_path, read_batch_csv, write_batch_template};
use crate::types::Result;

#[derive(Debug, Clone, Default)]
pub struct BatchProcessOptions {
    pub csv: PathBuf,
    pub provider: Option<String>,
    pub metrics: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub pacing_ms: Option<u64>,
    pub prompt: Option<String>,
}

/// Process every file listed in the CSV; per-file failures do not stop the run
pub fn process(config: Option<&Path>, options: BatchProcessOptions) -> Result<()> {
    let ctx = CommandContext::load(config)?;
    let provider_id = ctx.provider_id(options.provider.as_deref());
    ctx.check_provider(&provider_id)?;

    let entries = read_batch_csv(&options.csv)?;
    let output = Output::new();
    if entries.is_empty() {
        output.warning(&format!("No files listed in {}", options.csv.display()));
        return Ok(());
    }

    let mut batch_options = BatchOptions::from_config(&ctx.config.batch)
        .with_export_dir(options.export_dir.map(normalize_path).transpose()?);
    if let Some(concurrency) = options.concurrency {
        batch_options.concurrency = concurrency.max(1);
    }
    if let Some(pacing_ms) = options.pacing_ms {
        batch_options.pacing = Duration::from_millis(pacing_ms);
    }

    let prompt = ctx.prompt_choice(options.prompt.as_deref(), None)?;
    let pipeline = ctx.pipeline(provider_id.clone(), options.metrics.as_deref(), prompt)?;
    let driver = BatchDriver::new(Arc::new(pipeline), batch_options);

    output.header(&format!(
        "Debloating {} file(s) with {}",
        entries.len(),
        provider_id
    ));

    let rt = Runtime::new()?;
    let summary = rt.block_on(driver.run(&entries))?;

    output.section("Batch Summary");
    output.field("Processed", summary.processed);
    output.field("Succeeded", summary.succeeded);
    output.field("Failed", summary.failed);
    output.field("Skipped", summary.skipped);
    output.field("Metrics", ctx.metrics_path(options.metrics.as_deref()).display());

    if summary.failed > 0 || summary.skipped > 0 {
        output.warning("Some files were not optimized; see the log for details");
    } else {
        output.success("All files processed");
    }
    Ok(())
}

pub fn template(output_path: Option<PathBuf>) -> Result<()> {
    let path = output_path.unwrap_or_else(|| PathBuf::from(crate::constants::batch::TEMPLATE_PATH));
    write_batch_template(&path)?;
    Output::new().success(&format!("CSV template created at {}", path.display()));
    Ok(())
}
