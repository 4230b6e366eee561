//! debloater - LLM-driven source debloating
//!
//! Sends a source file to one of several LLM providers with a "debloat this
//! code" instruction, writes back the rewritten code and records how many
//! lines were removed.
//!
//! ## Core Features
//!
//! - **Provider Registry**: Anthropic, OpenAI, Gemini and DeepSeek behind one trait
//! - **Unified Retry**: exponential backoff for every provider
//! - **Code Extraction**: fenced-block parsing with degraded fallbacks
//! - **Metrics Store**: append-only SQLite table with CSV export
//! - **Batch Driver**: CSV-driven runs with pacing between dispatches
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use debloater::{Dispatcher, MetricsStore, ProviderRegistry, RetryPolicy};
//! use debloater::pipeline::{FileJob, FilePipeline, PromptChoice};
//!
//! let registry = Arc::new(ProviderRegistry::builtin());
//! let dispatcher = Dispatcher::from_registry(registry, RetryPolicy::default())?;
//! let metrics = Arc::new(MetricsStore::open("debloat_results.db")?);
//! let pipeline = FilePipeline::new(
//!     Arc::new(dispatcher),
//!     metrics,
//!     "claude-3-7-sonnet",
//!     PromptChoice::new("2", "Debloat this file while maintaining functional correctness"),
//! );
//! let outcome = pipeline.process(&FileJob::in_place("bloated.py")).await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: providers, prompts, retry, dispatch and extraction
//! - [`analyzer`]: language detection and line counting
//! - [`storage`]: SQLite metrics store
//! - [`pipeline`]: single-file and batch drivers
//! - [`config`]: layered configuration

pub mod ai;
pub mod analyzer;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::{DebloatError, ErrorCategory, ErrorKind, ProviderId, Result, ResultExt};

// Storage
pub use storage::{MetricsRecord, MetricsStore, SharedMetricsStore, loc_reduction_percentage};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    Dispatcher, Extraction, ExtractionKind, InvocationState, LlmProvider, LlmResponse,
    OptimizationRequest, OptimizationResult, ProviderConfig, ProviderRegistry, RetryPolicy,
    build_prompt, extract_code,
};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{BatchDriver, BatchSummary, FilePipeline};

pub use analyzer::{Language, count_lines};
