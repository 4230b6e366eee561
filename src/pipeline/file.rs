//! Single-file pipeline: read → prompt → dispatch → persist → record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::ai::prompt::build_prompt_for;
use crate::ai::{Dispatcher, OptimizationRequest, OptimizationResult};
use crate::analyzer::{Language, count_lines};
use crate::storage::{MetricsRecord, SharedMetricsStore};
use crate::types::{DebloatError, ProviderId, Result};

/// Make a path absolute against the current directory
pub fn normalize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(std::path::absolute(path.as_ref())?)
}

/// `<file>.bak` next to the original
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Prompt chosen for a run; `label` is what the metrics row stores
#[derive(Debug, Clone)]
pub struct PromptChoice {
    pub label: String,
    pub template: String,
}

impl PromptChoice {
    pub fn new(label: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            template: template.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileJob {
    pub source: PathBuf,
    /// Write here instead of overwriting `source`
    pub export_path: Option<PathBuf>,
}

impl FileJob {
    pub fn in_place(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            export_path: None,
        }
    }

    pub fn export(source: impl Into<PathBuf>, export_path: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            export_path: Some(export_path.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub source: PathBuf,
    /// Where code was written; `None` when an in-place run kept the original
    pub written_to: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub record: MetricsRecord,
    pub result: OptimizationResult,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.succeeded
    }
}

pub struct FilePipeline {
    dispatcher: Arc<Dispatcher>,
    metrics: SharedMetricsStore,
    provider_id: ProviderId,
    prompt: PromptChoice,
}

impl FilePipeline {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        metrics: SharedMetricsStore,
        provider_id: impl Into<ProviderId>,
        prompt: PromptChoice,
    ) -> Self {
        Self {
            dispatcher,
            metrics,
            provider_id: provider_id.into(),
            prompt,
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Process one file. Provider failures are reported through
    /// `FileOutcome::succeeded`; configuration and persistence failures are
    /// returned as errors.
    pub async fn process(&self, job: &FileJob) -> Result<FileOutcome> {
        let source = normalize_path(&job.source)?;
        info!(file = %source.display(), provider = %self.provider_id, "Starting debloat");

        let original = std::fs::read_to_string(&source)?;
        let loc_before = count_lines(&original);
        // Extraction looks for the same tag the prompt fenced the code with
        let language = Language::from_path(&source).prompt_language();
        info!(file = %source.display(), "Original code has {} lines", loc_before);

        let request = OptimizationRequest::new(
            self.provider_id.clone(),
            build_prompt_for(&self.prompt.template, &original, language),
            original.clone(),
        );
        let result = self.dispatcher.optimize(&request, language).await?;
        let loc_after = count_lines(&result.extracted_code);
        info!(file = %source.display(), "Optimized code has {} lines", loc_after);

        let (written_to, backup) = match &job.export_path {
            Some(export) => {
                let export = normalize_path(export)?;
                write_export(&export, &result.extracted_code)?;
                (Some(export), None)
            }
            None if result.succeeded => {
                let backup = write_with_backup(&source, &result.extracted_code)?;
                (Some(source.clone()), Some(backup))
            }
            None => {
                warn!(file = %source.display(), "Provider failed; original file left untouched");
                (None, None)
            }
        };
        if let Some(path) = &written_to {
            info!(file = %source.display(), "Optimized code saved to {}", path.display());
        }

        if result.extracted_code == original {
            warn!(file = %source.display(), "Model did not make any changes to the code");
        } else if loc_after == loc_before {
            warn!(file = %source.display(), "Model made changes but did not reduce line count");
        }

        let record = MetricsRecord::new(&source, self.provider_id.as_str(), loc_before, loc_after)
            .with_prompt(self.prompt.label.clone())
            .with_succeeded(result.succeeded);
        self.metrics.record(&record).inspect_err(|e| {
            error!(file = %source.display(), "Failed to record metrics: {}", e);
        })?;
        info!(
            file = %record.file_name,
            reduction = record.reduction_percent,
            "Results recorded in {}",
            self.metrics.path().display()
        );

        Ok(FileOutcome {
            source,
            written_to,
            backup,
            record,
            result,
        })
    }
}

fn write_export(path: &Path, code: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| DebloatError::persistence(parent, e.to_string()))?;
    }
    std::fs::write(path, code).map_err(|e| DebloatError::persistence(path, e.to_string()))
}

/// Overwrite `path` after copying it to `<path>.bak`; the backup is copied
/// back when the write fails.
fn write_with_backup(path: &Path, code: &str) -> Result<PathBuf> {
    replace_with_backup(path, code, |p, c| std::fs::write(p, c))
}

fn replace_with_backup<W>(path: &Path, code: &str, write: W) -> Result<PathBuf>
where
    W: FnOnce(&Path, &str) -> std::io::Result<()>,
{
    let backup = backup_path(path);
    std::fs::copy(path, &backup).map_err(|e| DebloatError::persistence(&backup, e.to_string()))?;

    if let Err(e) = write(path, code) {
        error!(file = %path.display(), "Failed to save code: {}", e);
        match std::fs::copy(&backup, path) {
            Ok(_) => info!(file = %path.display(), "Restored original file from backup"),
            Err(restore) => error!(file = %path.display(), "Failed to restore from backup: {}", restore),
        }
        return Err(DebloatError::persistence(path, e.to_string()));
    }

    Ok(backup)
}
