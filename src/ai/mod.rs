//! AI Integration Layer
//!
//! Provider registry, prompt assembly, retrying dispatch and code extraction.

pub mod dispatcher;
pub mod extract;
pub mod prompt;
pub mod provider;
pub mod retry;

pub use dispatcher::{Dispatcher, OptimizationRequest, OptimizationResult};
pub use extract::{Extraction, ExtractionKind, extract_code, extract_code_for};
pub use prompt::{PromptBuilder, PromptSection, PromptTemplates, build_prompt, build_prompt_for};
pub use provider::{
    ErrorCategory, ErrorClassifier, LlmError, LlmProvider, LlmResponse, ProviderAvailability,
    ProviderConfig, ProviderKind, ProviderRegistry, ResponseMetadata, ResponseTiming,
    SharedProvider, TokenUsage, create_provider,
};
pub use retry::{InvocationState, RetryOutcome, RetryPolicy};
