//! Metrics Store
//!
//! Append-only SQLite table of per-run LOC metrics:
//! - Connection pooling via r2d2
//! - Version-tracked schema in `PRAGMA user_version`
//! - One writer at a time (in-process mutex + IMMEDIATE transaction)
//!
//! An incompatible existing file is rejected with `MetricsSchema`; rows are
//! never dropped to make a file fit.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::metrics::{EXPORT_HEADERS, OVERALL_LABEL, SCHEMA_VERSION};
use crate::types::{DebloatError, Result, ResultExt};

/// Shared store handle for async contexts.
pub type SharedMetricsStore = Arc<MetricsStore>;

const TABLE: &str = "debloat_metrics";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS debloat_metrics (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp         TEXT    NOT NULL,
    file_name         TEXT    NOT NULL,
    provider_id       TEXT    NOT NULL,
    loc_before        INTEGER NOT NULL,
    loc_after         INTEGER NOT NULL,
    reduction_percent REAL    NOT NULL,
    prompt            TEXT,
    succeeded         INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_debloat_metrics_provider ON debloat_metrics(provider_id);
"#;

/// Columns every readable version has
const REQUIRED_COLUMNS: [&str; 6] = [
    "timestamp",
    "file_name",
    "provider_id",
    "loc_before",
    "loc_after",
    "reduction_percent",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const POOL_SIZE: u32 = 4;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

struct Migration {
    version: i32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Add prompt and succeeded columns",
    up: "ALTER TABLE debloat_metrics ADD COLUMN prompt TEXT;
         ALTER TABLE debloat_metrics ADD COLUMN succeeded INTEGER NOT NULL DEFAULT 1;
         CREATE INDEX IF NOT EXISTS idx_debloat_metrics_provider ON debloat_metrics(provider_id);",
}];

/// Percentage of lines removed; negative when the code grew, 0 for an empty
/// original.
pub fn loc_reduction_percentage(loc_before: usize, loc_after: usize) -> f64 {
    if loc_before == 0 {
        return 0.0;
    }
    (loc_before as f64 - loc_after as f64) / loc_before as f64 * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One row of the metrics table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Local time, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    /// Base name of the processed file
    pub file_name: String,
    pub provider_id: String,
    pub loc_before: usize,
    pub loc_after: usize,
    /// Rounded to 2 decimals
    pub reduction_percent: f64,
    /// Prompt text or template id used for the run
    pub prompt: Option<String>,
    /// False when the provider call failed and the original code was kept
    pub succeeded: bool,
}

impl MetricsRecord {
    pub fn new(
        file_path: impl AsRef<Path>,
        provider_id: impl Into<String>,
        loc_before: usize,
        loc_after: usize,
    ) -> Self {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            file_name,
            provider_id: provider_id.into(),
            loc_before,
            loc_after,
            reduction_percent: round2(loc_reduction_percentage(loc_before, loc_after)),
            prompt: None,
            succeeded: true,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_succeeded(mut self, succeeded: bool) -> Self {
        self.succeeded = succeeded;
        self
    }
}

/// Aggregate over one provider, or over all rows for the OVERALL line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub provider_id: String,
    pub files: usize,
    pub loc_before: usize,
    pub loc_after: usize,
    /// Mean of the per-file reductions, rounded to 2 decimals
    pub mean_reduction: f64,
}

type SummaryRow = (String, i64, i64, i64, f64);

pub struct MetricsStore {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for MetricsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsStore")
            .field("path", &self.path)
            .finish()
    }
}

impl MetricsStore {
    /// Open or create the store, migrating older schemas in place.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DebloatError::persistence(parent, e.to_string()))?;
        }

        {
            let mut conn = Connection::open(&path)
                .map_err(|e| DebloatError::metrics_schema(&path, e.to_string()))?;
            Self::prepare_schema(&mut conn, &path)?;
        }

        let manager = SqliteConnectionManager::file(&path).with_init(Self::configure_connection);
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS))
            .build(manager)
            .map_err(|e| DebloatError::Storage(format!("Failed to create connection pool: {}", e)))?;

        debug!(path = %path.display(), "Metrics store opened");
        Ok(Self {
            path,
            pool,
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            DebloatError::Storage(format!("Failed to acquire metrics connection: {}", e))
        })
    }

    fn table_columns(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", TABLE))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(columns)
    }

    /// Check the existing table against the known versions and migrate it.
    fn prepare_schema(conn: &mut Connection, path: &Path) -> Result<()> {
        let schema_err = |message: String| DebloatError::metrics_schema(path, message);

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| schema_err(e.to_string()))?;
        let columns = Self::table_columns(conn).map_err(|e| schema_err(e.to_string()))?;

        if version > SCHEMA_VERSION {
            return Err(schema_err(format!(
                "schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        if columns.is_empty() {
            if version != 0 {
                return Err(schema_err(format!(
                    "schema version {} but no {} table",
                    version, TABLE
                )));
            }
            conn.execute_batch(SCHEMA)
                .with_context("Failed to create metrics table")?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set metrics schema version")?;
            info!(path = %path.display(), "Created metrics table");
            return Ok(());
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !columns.contains(*c))
            .collect();
        if !missing.is_empty() {
            return Err(schema_err(format!(
                "table {} is missing columns: {}",
                TABLE,
                missing.join(", ")
            )));
        }

        // Unversioned tables are dated by their columns
        let current = match version {
            0 if columns.contains("succeeded") => SCHEMA_VERSION,
            0 => 1,
            v => v,
        };
        if current == SCHEMA_VERSION && version == SCHEMA_VERSION {
            return Ok(());
        }

        let tx = conn
            .transaction()
            .with_context("Failed to start migration")?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            tx.execute_batch(migration.up).with_context_fn(|| {
                format!(
                    "Failed to apply migration {}: {}",
                    migration.version, migration.description
                )
            })?;
            info!(
                "Applied metrics migration {}: {}",
                migration.version, migration.description
            );
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)
            .with_context("Failed to update metrics schema version")?;
        tx.commit().with_context("Failed to commit migration")?;
        Ok(())
    }

    /// Append one row.
    pub fn record(&self, record: &MetricsRecord) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let persist_err = |e: rusqlite::Error| DebloatError::persistence(&self.path, e.to_string());

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(persist_err)?;
        tx.execute(
            "INSERT INTO debloat_metrics
             (timestamp, file_name, provider_id, loc_before, loc_after, reduction_percent, prompt, succeeded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.timestamp,
                record.file_name,
                record.provider_id,
                record.loc_before as i64,
                record.loc_after as i64,
                round2(record.reduction_percent),
                record.prompt,
                record.succeeded,
            ],
        )
        .map_err(persist_err)?;
        tx.commit().map_err(persist_err)?;

        debug!(
            file = %record.file_name,
            provider = %record.provider_id,
            reduction = record.reduction_percent,
            "Metrics recorded"
        );
        Ok(())
    }

    /// All rows in insertion order
    pub fn entries(&self) -> Result<Vec<MetricsRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, file_name, provider_id, loc_before, loc_after,
                    reduction_percent, prompt, succeeded
             FROM debloat_metrics ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MetricsRecord {
                    timestamp: row.get(0)?,
                    file_name: row.get(1)?,
                    provider_id: row.get(2)?,
                    loc_before: row.get::<_, i64>(3)?.max(0) as usize,
                    loc_after: row.get::<_, i64>(4)?.max(0) as usize,
                    reduction_percent: row.get(5)?,
                    prompt: row.get(6)?,
                    succeeded: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM debloat_metrics", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Per-provider rows sorted by id, then an OVERALL row. Empty when no
    /// runs are recorded.
    pub fn summary(&self) -> Result<Vec<ProviderSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT provider_id, COUNT(*), SUM(loc_before), SUM(loc_after), AVG(reduction_percent)
             FROM debloat_metrics GROUP BY provider_id ORDER BY provider_id",
        )?;
        let rows: Vec<SummaryRow> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let overall: SummaryRow = conn.query_row(
            "SELECT ?1, COUNT(*), SUM(loc_before), SUM(loc_after), AVG(reduction_percent)
             FROM debloat_metrics",
            params![OVERALL_LABEL],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

        Ok(rows
            .into_iter()
            .chain(std::iter::once(overall))
            .map(|(provider_id, files, before, after, mean)| ProviderSummary {
                provider_id,
                files: files as usize,
                loc_before: before.max(0) as usize,
                loc_after: after.max(0) as usize,
                mean_reduction: round2(mean),
            })
            .collect())
    }

    /// Write every row as CSV with the fixed export headers.
    pub fn export_csv(&self, output: impl AsRef<Path>) -> Result<usize> {
        let output = output.as_ref();
        let entries = self.entries()?;

        let mut writer = csv::Writer::from_path(output)?;
        writer.write_record(EXPORT_HEADERS)?;
        for e in &entries {
            writer.write_record([
                e.timestamp.clone(),
                e.file_name.clone(),
                e.provider_id.clone(),
                e.loc_before.to_string(),
                e.loc_after.to_string(),
                format!("{:.2}", e.reduction_percent),
            ])?;
        }
        writer
            .flush()
            .map_err(|e| DebloatError::persistence(output, e.to_string()))?;

        info!(rows = entries.len(), path = %output.display(), "Metrics exported");
        Ok(entries.len())
    }

    pub fn write_summary_csv(&self, output: impl AsRef<Path>) -> Result<usize> {
        let output = output.as_ref();
        let summary = self.summary()?;

        let mut writer = csv::Writer::from_path(output)?;
        writer.write_record([
            "Provider/Model",
            "Files",
            "LOC Before",
            "LOC After",
            "Mean LOC Reduction (%)",
        ])?;
        for s in &summary {
            writer.write_record([
                s.provider_id.clone(),
                s.files.to_string(),
                s.loc_before.to_string(),
                s.loc_after.to_string(),
                format!("{:.2}", s.mean_reduction),
            ])?;
        }
        writer
            .flush()
            .map_err(|e| DebloatError::persistence(output, e.to_string()))?;
        Ok(summary.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MetricsStore {
        MetricsStore::open(dir.path().join("metrics.db")).expect("Failed to open metrics store")
    }

    #[test]
    fn test_reduction_percentage() {
        assert!((loc_reduction_percentage(100, 60) - 40.0).abs() < f64::EPSILON);
        assert_eq!(loc_reduction_percentage(0, 10), 0.0);
        assert!((loc_reduction_percentage(50, 75) + 50.0).abs() < f64::EPSILON);
        assert_eq!(loc_reduction_percentage(7, 7), 0.0);
    }

    #[test]
    fn test_record_uses_base_name_and_rounds() {
        let record = MetricsRecord::new("/tmp/project/bloated.py", "gpt-4o", 3, 2);
        assert_eq!(record.file_name, "bloated.py");
        assert!((record.reduction_percent - 33.33).abs() < 1e-9);
        assert_eq!(record.timestamp.len(), "2025-01-01 00:00:00".len());
        assert!(record.succeeded);
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.summary().unwrap().is_empty());

        let conn = Connection::open(store.path()).unwrap();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_record_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let record = MetricsRecord::new("bloated.py", "claude-3-7-sonnet", 100, 60)
            .with_prompt("1");
        store.record(&record).unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries, vec![record]);
        assert!((entries[0].reduction_percent - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicates_are_retained() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let record = MetricsRecord::new("same.py", "gpt-4o", 10, 5);
        store.record(&record).unwrap();
        store.record(&record).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = TempDir::new().unwrap();
        store(&dir)
            .record(&MetricsRecord::new("a.py", "gpt-4o", 10, 5))
            .unwrap();
        assert_eq!(store(&dir).count().unwrap(), 1);
    }

    #[test]
    fn test_summary_per_provider_and_overall() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.record(&MetricsRecord::new("a.py", "gpt-4o", 100, 50)).unwrap();
        store.record(&MetricsRecord::new("b.py", "gpt-4o", 100, 80)).unwrap();
        store
            .record(&MetricsRecord::new("a.py", "deepseek-r1", 10, 15))
            .unwrap();

        let summary = store.summary().unwrap();
        let ids: Vec<&str> = summary.iter().map(|s| s.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["deepseek-r1", "gpt-4o", OVERALL_LABEL]);

        assert_eq!(summary[0].mean_reduction, -50.0);
        assert_eq!(summary[1].files, 2);
        assert_eq!(summary[1].mean_reduction, 35.0);
        assert_eq!(summary[2].files, 3);
        assert_eq!(summary[2].loc_before, 210);
        assert_eq!(summary[2].loc_after, 145);
        assert_eq!(summary[2].mean_reduction, 6.67);
    }

    #[test]
    fn test_export_csv_headers() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .record(&MetricsRecord::new("x.py", "gemini-2-0-flash", 3, 1))
            .unwrap();

        let out = dir.path().join("export.csv");
        assert_eq!(store.export_csv(&out).unwrap(), 1);

        let text = std::fs::read_to_string(&out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Timestamp,File Name,Provider/Model,LOC Before,LOC After,LOC Reduction (%)"
        );
        assert!(lines.next().unwrap().ends_with("x.py,gemini-2-0-flash,3,1,66.67"));
    }

    #[test]
    fn test_summary_csv() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.record(&MetricsRecord::new("x.py", "gpt-4o", 4, 3)).unwrap();

        let out = dir.path().join("summary.csv");
        assert_eq!(store.write_summary_csv(&out).unwrap(), 2);
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("gpt-4o,1,4,3,25.00"));
        assert!(text.contains("OVERALL,1,4,3,25.00"));
    }

    #[test]
    fn test_non_database_file_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        std::fs::write(&path, "Timestamp,File Name\nnot a database at all, really\n").unwrap();

        let err = MetricsStore::open(&path).unwrap_err();
        assert!(matches!(err, DebloatError::MetricsSchema { .. }));
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("Timestamp"));
    }

    #[test]
    fn test_missing_columns_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE debloat_metrics (id INTEGER PRIMARY KEY, timestamp TEXT, file_name TEXT);
                 INSERT INTO debloat_metrics (timestamp, file_name) VALUES ('t', 'keep.py');",
            )
            .unwrap();
        }

        let err = MetricsStore::open(&path).unwrap_err();
        assert!(matches!(err, DebloatError::MetricsSchema { .. }));
        assert!(err.to_string().contains("provider_id"));

        let conn = Connection::open(&path).unwrap();
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM debloat_metrics", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }
        let err = MetricsStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn test_v1_table_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE debloat_metrics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL, file_name TEXT NOT NULL, provider_id TEXT NOT NULL,
                    loc_before INTEGER NOT NULL, loc_after INTEGER NOT NULL,
                    reduction_percent REAL NOT NULL);
                 INSERT INTO debloat_metrics
                    (timestamp, file_name, provider_id, loc_before, loc_after, reduction_percent)
                    VALUES ('2025-03-01 10:00:00', 'old.py', 'gpt-4o', 10, 8, 20.0);
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let store = MetricsStore::open(&path).unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "old.py");
        assert!(entries[0].succeeded);
        assert_eq!(entries[0].prompt, None);

        store.record(&MetricsRecord::new("new.py", "gpt-4o", 2, 1)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .record(&MetricsRecord::new(format!("f{}.py", i), "gpt-4o", 10, i))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.count().unwrap(), 8);
    }
}
