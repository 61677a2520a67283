//! # analyst-core
//!
//! Deterministic building blocks for LLM-assisted security analysis.
//!
//! This crate turns a free-text security narrative into a model prompt and
//! turns the model's raw reply back into a validated, typed result:
//! - What do we ask the model?
//! - Did it answer in the shape we asked for?
//! - Are its numbers in range?
//!
//! ## Key Guarantees
//!
//! 1. **No network calls**: model invocation lives in `analyst-runtime`
//! 2. **Strict output contract**: a result's `type` always equals the requested format
//! 3. **Whole-result rejection**: one malformed finding rejects the response
//! 4. **Stable ids**: findings are numbered `F-001`, `F-002`, ... in order
//!
//! ## Example
//!
//! ```rust,ignore
//! use analyst_core::{AnalysisRequest, OutputFormat, PromptBuilder, parse_response};
//!
//! let request = AnalysisRequest::new("Badge 4411 used at two gates within 1 minute", OutputFormat::RiskAssessment);
//! let prompt = PromptBuilder::default().build(&request)?;
//! // ... send prompt to a model ...
//! let result = parse_response(&raw_reply, request.output_format())?;
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

pub mod prompt;
pub mod response;
pub mod types;

// Re-export main types at crate root
pub use prompt::{Prompt, PromptBuilder, PromptError, SystemPrompt};
pub use response::{parse_response, validate_result, ParseError, SchemaError};
pub use types::{
    AlignmentVerdict, AnalysisRequest, AnalysisResult, EntityMap, Finding, OutputFormat, Rating,
    Severity,
};

/// Build the prompt for a request with the compiled-in system prompt.
///
/// Convenience for callers that never customize the system prompt.
pub fn build_prompt(request: &AnalysisRequest) -> Result<Prompt, PromptError> {
    PromptBuilder::default().build(request)
}
