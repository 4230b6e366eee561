//! Unified Error Type System
//!
//! Centralized error types for the whole crate, with classification of
//! transport failures for retry decisions.
//!
//! ## Error Kinds
//!
//! - **Configuration**: unknown provider, disabled provider, bad input table
//! - **Transport**: provider call failed (retried, then degraded to fallback)
//! - **Persistence**: code or metrics could not be written
//!
//! ## Transport Categories
//!
//! - **Transient**: Temporary issues that may resolve (retry)
//! - **RateLimit**: API rate limiting (wait and retry)
//! - **TokenLimit**: Context too large (do not retry)
//! - **Auth**: Authentication failures (fail fast)
//! - **Network**: Connectivity issues (retry with backoff)
//! - **Unavailable**: Provider unavailable (retry)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Transport error categories used for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited - wait then retry
    RateLimit,
    /// Context/token limit exceeded - the same prompt will fail again
    TokenLimit,
    /// Authentication failed - fail fast, don't retry
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Provider unavailable - retry with backoff
    Unavailable,
    /// Invalid request - don't retry, fix request
    BadRequest,
    /// Response body could not be parsed
    ParseError,
    /// Temporary server issues - retry
    Transient,
    /// Unknown error - conservative retry
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Check if a failed call in this category is worth repeating
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth | Self::BadRequest | Self::TokenLimit)
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// Transport error with category, provider context, and retry hint
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Error category for retry decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
    /// Suggested wait time before retry (if the provider sent one)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
            retry_after: None,
        }
    }

    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps provider failures onto [`ErrorCategory`]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            return LlmError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30));
        }

        if lower.contains("token")
            && (lower.contains("limit") || lower.contains("exceed") || lower.contains("maximum"))
            || lower.contains("context length")
            || lower.contains("too large")
        {
            return LlmError::with_provider(ErrorCategory::TokenLimit, message, provider);
        }

        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("permission denied")
        {
            return LlmError::with_provider(ErrorCategory::Auth, message, provider);
        }

        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("unreachable")
        {
            return LlmError::with_provider(ErrorCategory::Network, message, provider);
        }

        if lower.contains("503")
            || lower.contains("502")
            || lower.contains("service unavailable")
            || lower.contains("server error")
            || lower.contains("overloaded")
        {
            return LlmError::with_provider(ErrorCategory::Unavailable, message, provider);
        }

        if lower.contains("400") || lower.contains("bad request") {
            return LlmError::with_provider(ErrorCategory::BadRequest, message, provider);
        }

        if lower.contains("parse") || lower.contains("json") || lower.contains("decode") {
            return LlmError::with_provider(ErrorCategory::ParseError, message, provider);
        }

        if lower.contains("retry") || lower.contains("temporary") {
            return LlmError::with_provider(ErrorCategory::Transient, message, provider);
        }

        LlmError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        match status {
            429 => LlmError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30)),
            401 | 403 => LlmError::with_provider(ErrorCategory::Auth, message, provider),
            400 | 422 => LlmError::with_provider(ErrorCategory::BadRequest, message, provider),
            413 => LlmError::with_provider(ErrorCategory::TokenLimit, message, provider),
            408 => LlmError::with_provider(ErrorCategory::Network, message, provider),
            500 | 502 | 503 | 504 | 529 => {
                LlmError::with_provider(ErrorCategory::Transient, message, provider)
            }
            404 => LlmError::with_provider(ErrorCategory::Unavailable, message, provider),
            _ => LlmError::with_provider(ErrorCategory::Unknown, message, provider),
        }
    }

    /// Classify a reqwest transport failure
    pub fn classify_reqwest(err: &reqwest::Error, provider: &str) -> LlmError {
        if err.is_timeout() || err.is_connect() {
            return LlmError::with_provider(
                ErrorCategory::Network,
                format!("{} request failed: {}", provider, err),
                provider,
            );
        }
        if err.is_decode() {
            return LlmError::with_provider(
                ErrorCategory::ParseError,
                format!("Failed to decode {} response: {}", provider, err),
                provider,
            );
        }
        Self::classify(&err.to_string(), provider)
    }
}

// =============================================================================
// Application Error
// =============================================================================

/// Coarse error taxonomy surfaced to callers and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Persistence,
}

#[derive(Debug, Error)]
pub enum DebloatError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    /// Structured LLM error with category and retry hints
    #[error("LLM error: {0}")]
    Llm(LlmError),

    #[error("LLM API error: {0}")]
    LlmApi(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown provider '{provider_id}'. Registered: {registered}")]
    UnknownProvider {
        provider_id: String,
        registered: String,
    },

    #[error("Provider '{provider_id}' is disabled: set {env_key} to enable it")]
    ProviderDisabled {
        provider_id: String,
        env_key: String,
    },

    #[error("{path}: missing required column '{column}'")]
    MissingColumn { column: String, path: PathBuf },

    // -------------------------------------------------------------------------
    // Persistence Errors
    // -------------------------------------------------------------------------
    #[error("Failed to persist {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    #[error("Metrics store {path} is incompatible: {message}")]
    MetricsSchema { path: PathBuf, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LlmError> for DebloatError {
    fn from(err: LlmError) -> Self {
        DebloatError::Llm(err)
    }
}

pub type Result<T> = std::result::Result<T, DebloatError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl DebloatError {
    /// Create an unknown-provider error listing the registered ids
    pub fn unknown_provider<S: AsRef<str>>(provider_id: impl Into<String>, registered: &[S]) -> Self {
        Self::UnknownProvider {
            provider_id: provider_id.into(),
            registered: registered
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn metrics_schema(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MetricsSchema {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::UnknownProvider { .. }
            | Self::ProviderDisabled { .. }
            | Self::MissingColumn { .. } => ErrorKind::Configuration,
            Self::Llm(_) | Self::LlmApi(_) | Self::Json(_) => ErrorKind::Transport,
            Self::Io(_)
            | Self::Database(_)
            | Self::Csv(_)
            | Self::Persistence { .. }
            | Self::MetricsSchema { .. }
            | Self::Storage(_) => ErrorKind::Persistence,
        }
    }

    /// Category used by the retry policy; non-transport errors are never retried
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Llm(e) => Some(e.category),
            Self::LlmApi(msg) => Some(ErrorClassifier::classify(msg, "unknown").category),
            Self::Json(_) => Some(ErrorCategory::ParseError),
            _ => None,
        }
    }

    /// Wait the provider asked for, if it sent one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Llm(e) => e.retry_after,
            _ => None,
        }
    }

    /// Check if this error can be retried against the same provider
    pub fn is_recoverable(&self) -> bool {
        self.category().is_some_and(|c| c.is_retryable())
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| DebloatError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| DebloatError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
