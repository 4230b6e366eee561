//! Debloat pipelines
//!
//! - `file`: one file from read to metrics row
//! - `batch`: a CSV list of files with pacing between dispatches

pub mod batch;
pub mod file;

pub use batch::{
    BatchDriver, BatchEntry, BatchOptions, BatchSummary, read_batch_csv, write_batch_template,
};
pub use file::{FileJob, FileOutcome, FilePipeline, PromptChoice, backup_path, normalize_path};
