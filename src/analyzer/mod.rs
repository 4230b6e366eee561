//! Source Analysis
//!
//! Language detection and line counting for the files being debloated.

pub mod language;

pub use language::{Language, count_lines};
