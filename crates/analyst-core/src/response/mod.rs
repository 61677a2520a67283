//! Model response handling.
//!
//! Raw model text is parsed into JSON, validated against a per-format JSON
//! Schema, then normalized into a typed [`crate::AnalysisResult`].

mod parser;
mod schema;

pub use parser::{extract_json_object, finding_id, parse_response, renumber_findings, ParseError};
pub use schema::{is_valid_result, validate_result, SchemaError};
