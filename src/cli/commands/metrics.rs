//! Metrics Command
//!
//! Usage:
//!   debloater metrics summary [--metrics PATH] [--output CSV] [--format text|json]
//!   debloater metrics export --output CSV [--metrics PATH]

use std::path::{Path, PathBuf};

use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::storage::MetricsStore;
use crate::types::Result;

fn open(config: Option<&Path>, metrics: Option<PathBuf>) -> Result<MetricsStore> {
    let path = match metrics {
        Some(path) => path,
        None => ConfigLoader::load(config)?.metrics.path,
    };
    MetricsStore::open(path)
}

/// Print per-provider averages and optionally write them as CSV
pub fn summary(
    config: Option<&Path>,
    metrics: Option<PathBuf>,
    output_csv: Option<PathBuf>,
    format: &str,
) -> Result<()> {
    let store = open(config, metrics)?;
    let summary = store.summary()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let output = Output::new();
        output.header(&format!("Metrics: {}", store.path().display()));
        if summary.is_empty() {
            output.info("No runs recorded yet");
        } else {
            let rows: Vec<Vec<String>> = summary
                .iter()
                .map(|s| {
                    vec![
                        s.provider_id.clone(),
                        s.files.to_string(),
                        s.loc_before.to_string(),
                        s.loc_after.to_string(),
                        format!("{:.2}", s.mean_reduction),
                    ]
                })
                .collect();
            output.table(
                &["Provider/Model", "Files", "LOC Before", "LOC After", "Mean Reduction (%)"],
                &rows,
            );
        }
    }

    if let Some(path) = output_csv {
        store.write_summary_csv(&path)?;
        Output::new().success(&format!("Summary written to {}", path.display()));
    }
    Ok(())
}

/// Dump every recorded run to CSV
pub fn export(config: Option<&Path>, metrics: Option<PathBuf>, output_csv: &Path) -> Result<()> {
    let store = open(config, metrics)?;
    let rows = store.export_csv(output_csv)?;
    Output::new().success(&format!(
        "Exported {} row(s) to {}",
        rows,
        output_csv.display()
    ));
    Ok(())
}
