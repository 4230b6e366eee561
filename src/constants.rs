//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// LLM invocation constants
pub mod llm {
    /// Provider used when neither the CLI nor the config names one
    pub const DEFAULT_PROVIDER: &str = "claude-3-7-sonnet";

    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Completion budget shared by the built-in providers
    pub const DEFAULT_MAX_TOKENS: u32 = 4000;

    /// Sampling temperature shared by the built-in providers
    pub const DEFAULT_TEMPERATURE: f32 = 0.1;
}

/// Retry policy constants
pub mod retry {
    /// Total attempts, including the first one
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Delay before the first retry (milliseconds)
    pub const BASE_DELAY_MS: u64 = 2000;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;

    /// Maximum delay between retries (milliseconds)
    pub const MAX_DELAY_MS: u64 = 60_000;
}

/// Batch driver constants
pub mod batch {
    /// Pause between two dispatches (milliseconds)
    pub const PACING_MS: u64 = 2000;

    /// Files processed in parallel
    pub const CONCURRENCY: usize = 1;

    /// Required column in the batch input table
    pub const CODE_FILE_COLUMN: &str = "code_file";

    /// Default output for `batch template`
    pub const TEMPLATE_PATH: &str = "batch_template.csv";
}

/// Metrics store constants
pub mod metrics {
    /// Default metrics database path
    pub const DEFAULT_PATH: &str = "debloat_results.db";

    /// Current schema version (`PRAGMA user_version`)
    pub const SCHEMA_VERSION: i32 = 2;

    /// Headers of the exported metrics table
    pub const EXPORT_HEADERS: [&str; 6] = [
        "Timestamp",
        "File Name",
        "Provider/Model",
        "LOC Before",
        "LOC After",
        "LOC Reduction (%)",
    ];

    /// Provider label of the aggregate summary row
    pub const OVERALL_LABEL: &str = "OVERALL";
}
