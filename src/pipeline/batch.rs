//! Batch Driver
//!
//! Runs the file pipeline over a CSV list of files. Per-file failures are
//! logged and counted; the batch always runs to the end. A shared pacer keeps
//! every dispatch start at least `pacing` after the previous start and the
//! previous completion, at any concurrency.

use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info};

use super::file::{FileJob, FilePipeline, normalize_path};
use crate::config::BatchConfig;
use crate::constants::batch::CODE_FILE_COLUMN;
use crate::types::{DebloatError, Result};

/// One row of the batch input table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub code_file: PathBuf,
}

/// Read the `code_file` column; blank cells are skipped.
pub fn read_batch_csv(path: impl AsRef<Path>) -> Result<Vec<BatchEntry>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;

    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == CODE_FILE_COLUMN)
        .ok_or_else(|| DebloatError::MissingColumn {
            column: CODE_FILE_COLUMN.to_string(),
            path: path.to_path_buf(),
        })?;

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(cell) = record.get(column).map(str::trim).filter(|c| !c.is_empty()) {
            entries.push(BatchEntry {
                code_file: normalize_path(cell)?,
            });
        }
    }
    Ok(entries)
}

/// Header plus two example rows
pub fn write_batch_template(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([CODE_FILE_COLUMN])?;
    writer.write_record(["path/to/code1.py"])?;
    writer.write_record(["path/to/code2.py"])?;
    writer
        .flush()
        .map_err(|e| DebloatError::persistence(path, e.to_string()))?;
    info!("CSV template created at {}", path.display());
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Minimum gap before a dispatch, counted from the previous one
    pub pacing: Duration,
    /// Files in flight at once
    pub concurrency: usize,
    /// Export each result to `<dir>/<file name>` instead of in place
    pub export_dir: Option<PathBuf>,
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            pacing: Duration::from_millis(config.pacing_ms),
            concurrency: config.concurrency.max(1),
            export_dir: None,
        }
    }

    pub fn with_export_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.export_dir = dir;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Entries that reached the pipeline
    pub processed: usize,
    pub succeeded: usize,
    /// Provider fallbacks plus pipeline errors
    pub failed: usize,
    /// Entries whose file does not exist
    pub skipped: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.processed + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Keeps `interval` between dispatches. `last` is the latest start or
/// completion seen.
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        loop {
            let mut last = self.last.lock().await;
            let ready = (*last).map(|previous| previous + self.interval);
            match ready {
                Some(ready) if ready > Instant::now() => {
                    drop(last);
                    // A completion may have moved `last` while sleeping
                    tokio::time::sleep_until(ready).await;
                }
                _ => {
                    *last = Some(Instant::now());
                    return;
                }
            }
        }
    }

    async fn finished(&self) {
        let now = Instant::now();
        let mut last = self.last.lock().await;
        *last = Some((*last).map_or(now, |previous| previous.max(now)));
    }
}

pub struct BatchDriver {
    pipeline: Arc<FilePipeline>,
    options: BatchOptions,
    pacer: Pacer,
}

impl BatchDriver {
    pub fn new(pipeline: Arc<FilePipeline>, options: BatchOptions) -> Self {
        let pacer = Pacer::new(options.pacing);
        Self {
            pipeline,
            options,
            pacer,
        }
    }

    fn job_for(&self, entry: &BatchEntry) -> FileJob {
        match (&self.options.export_dir, entry.code_file.file_name()) {
            (Some(dir), Some(name)) => FileJob::export(&entry.code_file, dir.join(name)),
            _ => FileJob::in_place(&entry.code_file),
        }
    }

    async fn run_one(&self, entry: &BatchEntry) -> ItemStatus {
        let file = &entry.code_file;
        if !file.is_file() {
            error!(file = %file.display(), "Code file not found");
            return ItemStatus::Skipped;
        }

        self.pacer.wait().await;
        info!(file = %file.display(), "Processing");
        let processed = self.pipeline.process(&self.job_for(entry)).await;
        self.pacer.finished().await;
        match processed {
            Ok(outcome) if outcome.succeeded() => ItemStatus::Succeeded,
            Ok(_) => ItemStatus::Failed,
            Err(e) => {
                error!(file = %file.display(), "Error processing file: {}", e);
                ItemStatus::Failed
            }
        }
    }

    /// Process every entry. Fails up front only when the provider is not
    /// registered or has no credential.
    pub async fn run(&self, entries: &[BatchEntry]) -> Result<BatchSummary> {
        let provider = self.pipeline.provider_id();
        self.pipeline.dispatcher().ensure_available(provider.as_str())?;

        info!(
            files = entries.len(),
            provider = %provider,
            concurrency = self.options.concurrency,
            "Starting batch"
        );

        let statuses: Vec<ItemStatus> = futures::stream::iter(entries)
            .map(|entry| self.run_one(entry))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        for status in statuses {
            match status {
                ItemStatus::Succeeded => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                }
                ItemStatus::Failed => {
                    summary.processed += 1;
                    summary.failed += 1;
                }
                ItemStatus::Skipped => summary.skipped += 1,
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Batch finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::dispatcher::mock::MockProvider;
    use crate::ai::{Dispatcher, ProviderRegistry, RetryPolicy, SharedProvider};
    use crate::pipeline::file::PromptChoice;
    use crate::storage::MetricsStore;
    use tempfile::TempDir;

    fn driver(dir: &TempDir, provider: &str, transport: SharedProvider, options: BatchOptions) -> BatchDriver {
        let dispatcher = Dispatcher::new(
            Arc::new(ProviderRegistry::builtin()),
            RetryPolicy::single_attempt(),
        )
        .with_transport("deepseek-r1", transport);
        let metrics = Arc::new(MetricsStore::open(dir.path().join("metrics.db")).unwrap());
        let pipeline = FilePipeline::new(
            Arc::new(dispatcher),
            metrics,
            provider,
            PromptChoice::new("1", "Debloat"),
        );
        BatchDriver::new(Arc::new(pipeline), options)
    }

    fn write_files(dir: &TempDir, names: &[&str]) -> Vec<BatchEntry> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, "a = 1\nb = 2\nprint(a + b)\n").unwrap();
                BatchEntry { code_file: path }
            })
            .collect()
    }

    #[test]
    fn test_read_batch_csv() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("batch.csv");
        std::fs::write(&csv_path, "label,code_file\nfirst,/abs/one.py\nsecond,\nthird,rel/two.py\n").unwrap();

        let entries = read_batch_csv(&csv_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].code_file, PathBuf::from("/abs/one.py"));
        assert!(entries[1].code_file.is_absolute());
        assert!(entries[1].code_file.ends_with("rel/two.py"));
    }

    #[test]
    fn test_missing_column() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("batch.csv");
        std::fs::write(&csv_path, "file\nx.py\n").unwrap();

        let err = read_batch_csv(&csv_path).unwrap_err();
        assert!(matches!(err, DebloatError::MissingColumn { .. }));
        assert!(err.to_string().contains("code_file"));
    }

    #[test]
    fn test_template_roundtrips_through_reader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template.csv");
        write_batch_template(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("code_file\n"));
        let entries = read_batch_csv(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].code_file.ends_with("path/to/code1.py"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_continues_past_missing_and_failed() {
        let dir = TempDir::new().unwrap();
        let mut entries = write_files(&dir, &["a.py", "b.py", "c.py"]);
        entries.insert(1, BatchEntry { code_file: dir.path().join("missing.py") });

        // First dispatch fails, the rest succeed
        let mock = Arc::new(MockProvider::failing_then("deepseek-r1", 1, "```python\nprint(3)\n```"));
        let options = BatchOptions {
            pacing: Duration::from_secs(2),
            concurrency: 1,
            export_dir: None,
        };
        let driver = driver(&dir, "deepseek-r1", Arc::clone(&mock) as SharedProvider, options);

        let started = Instant::now();
        let summary = driver.run(&entries).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                processed: 3,
                succeeded: 2,
                failed: 1,
                skipped: 1,
            }
        );
        assert_eq!(mock.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(std::fs::read_to_string(dir.path().join("c.py")).unwrap(), "print(3)");
    }

    #[tokio::test]
    async fn test_export_dir() {
        let dir = TempDir::new().unwrap();
        let entries = write_files(&dir, &["only.py"]);
        let export_dir = dir.path().join("optimized");

        let mock = Arc::new(MockProvider::replying("deepseek-r1", "```\nprint(3)\n```"));
        let options = BatchOptions {
            pacing: Duration::ZERO,
            concurrency: 1,
            export_dir: None,
        }
        .with_export_dir(Some(export_dir.clone()));
        let summary = driver(&dir, "deepseek-r1", mock, options)
            .run(&entries)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            std::fs::read_to_string(export_dir.join("only.py")).unwrap(),
            "print(3)"
        );
        assert!(std::fs::read_to_string(dir.path().join("only.py")).unwrap().contains("a = 1"));
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_whole_batch() {
        let dir = TempDir::new().unwrap();
        let entries = write_files(&dir, &["a.py"]);
        let mock = Arc::new(MockProvider::replying("deepseek-r1", "x"));
        let driver = driver(&dir, "nope", Arc::clone(&mock) as SharedProvider, BatchOptions::default());

        let err = driver.run(&entries).await.unwrap_err();
        assert!(matches!(err, DebloatError::UnknownProvider { .. }));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_counts_from_completion() {
        let dir = TempDir::new().unwrap();
        let entries = write_files(&dir, &["a.py", "b.py", "c.py"]);
        let mock = Arc::new(
            MockProvider::replying("deepseek-r1", "```\nprint(3)\n```")
                .with_latency(Duration::from_secs(3)),
        );
        let options = BatchOptions {
            pacing: Duration::from_secs(2),
            concurrency: 1,
            export_dir: None,
        };

        let summary = driver(&dir, "deepseek-r1", Arc::clone(&mock) as SharedProvider, options)
            .run(&entries)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 3);

        // 3s call plus 2s gap before the next dispatch
        let starts = mock.call_starts();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_slow_calls_still_gapped() {
        let dir = TempDir::new().unwrap();
        let entries = write_files(&dir, &["a.py", "b.py"]);
        let mock = Arc::new(
            MockProvider::replying("deepseek-r1", "```\nprint(3)\n```")
                .with_latency(Duration::from_secs(3)),
        );
        let options = BatchOptions {
            pacing: Duration::from_secs(1),
            concurrency: 2,
            export_dir: None,
        };

        driver(&dir, "deepseek-r1", Arc::clone(&mock) as SharedProvider, options)
            .run(&entries)
            .await
            .unwrap();

        let starts = mock.call_starts();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_whole_batch() {
        let dir = TempDir::new().unwrap();
        let entries = write_files(&dir, &["a.py", "b.py"]);

        let configs = ProviderRegistry::builtin().configs().into_iter().map(|mut c| {
            c.credential_env_key = "DEBLOATER_TEST_UNSET_BATCH_KEY".to_string();
            c
        });
        let dispatcher = Dispatcher::new(
            Arc::new(ProviderRegistry::from_configs(configs)),
            RetryPolicy::single_attempt(),
        );
        let metrics = Arc::new(MetricsStore::open(dir.path().join("metrics.db")).unwrap());
        let pipeline = FilePipeline::new(
            Arc::new(dispatcher),
            Arc::clone(&metrics),
            "gemini-2-0-flash",
            PromptChoice::new("1", "Debloat"),
        );
        let driver = BatchDriver::new(Arc::new(pipeline), BatchOptions::default());

        let err = driver.run(&entries).await.unwrap_err();
        assert!(matches!(err, DebloatError::ProviderDisabled { .. }));
        assert_eq!(metrics.count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_batch_keeps_pacing() {
        let dir = TempDir::new().unwrap();
        let entries = write_files(&dir, &["a.py", "b.py", "c.py", "d.py"]);
        let mock = Arc::new(MockProvider::replying("deepseek-r1", "```\nprint(3)\n```"));
        let options = BatchOptions {
            pacing: Duration::from_millis(500),
            concurrency: 4,
            export_dir: None,
        };

        let started = Instant::now();
        let summary = driver(&dir, "deepseek-r1", Arc::clone(&mock) as SharedProvider, options)
            .run(&entries)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 4);
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }
}
