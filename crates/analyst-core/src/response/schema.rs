//! JSON Schema validation for model output.
//!
//! Each output format has its own schema under `schemas/`, embedded at
//! compile time and compiled once per process. Validation is pure: no I/O,
//! no shared mutable state beyond the write-once compiled schemas.

use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::{AnalysisResult, OutputFormat};

/// Embedded schemas (loaded at compile time).
const RISK_ASSESSMENT_SCHEMA_JSON: &str =
    include_str!("../../schemas/risk_assessment.schema.json");
const SUMMARY_SCHEMA_JSON: &str = include_str!("../../schemas/summary.schema.json");
const POLICY_ALIGNMENT_SCHEMA_JSON: &str =
    include_str!("../../schemas/policy_alignment.schema.json");

/// Compiled validators (initialized once, reused).
static RISK_ASSESSMENT_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
static SUMMARY_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
static POLICY_ALIGNMENT_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),

    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Missing \"type\" discriminant")]
    MissingDiscriminant,

    #[error("Unknown result type: {0}")]
    UnknownDiscriminant(String),

    #[error("Result type mismatch: expected {expected}, found {found}")]
    FormatMismatch {
        expected: OutputFormat,
        found: OutputFormat,
    },

    #[error("Schema validation failed: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Failed to decode result: {0}")]
    Decode(String),
}

fn compile(source: &str) -> Result<jsonschema::Validator, String> {
    let schema_value: Value = match serde_json::from_str(source) {
        Ok(v) => v,
        Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
    };

    match jsonschema::options().build(&schema_value) {
        Ok(v) => Ok(v),
        Err(e) => Err(format!("Failed to compile schema: {}", e)),
    }
}

/// Get or initialize the compiled validator for a format.
fn get_validator(format: OutputFormat) -> Result<&'static jsonschema::Validator, SchemaError> {
    let (cell, source) = match format {
        OutputFormat::RiskAssessment => (&RISK_ASSESSMENT_SCHEMA, RISK_ASSESSMENT_SCHEMA_JSON),
        OutputFormat::Summary => (&SUMMARY_SCHEMA, SUMMARY_SCHEMA_JSON),
        OutputFormat::PolicyAlignment => (&POLICY_ALIGNMENT_SCHEMA, POLICY_ALIGNMENT_SCHEMA_JSON),
    };

    match cell.get_or_init(|| compile(source)) {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a decoded candidate against the schema for `format`.
///
/// Steps, in order:
/// 1. The candidate is an object with a known `type` discriminant
/// 2. The discriminant equals `format`
/// 3. Every schema error is collected (ranges, enums, required fields)
/// 4. The candidate decodes into the typed result
///
/// Unrecognized fields inside a finding are dropped by the typed decode.
/// A single invalid finding rejects the whole result.
pub fn validate_result(candidate: &Value, format: OutputFormat) -> Result<AnalysisResult, SchemaError> {
    let object = candidate.as_object().ok_or(SchemaError::NotAnObject)?;

    let discriminant = match object.get("type") {
        Some(Value::String(s)) => s,
        _ => return Err(SchemaError::MissingDiscriminant),
    };

    let found: OutputFormat = discriminant
        .parse()
        .map_err(|_| SchemaError::UnknownDiscriminant(discriminant.clone()))?;

    if found != format {
        return Err(SchemaError::FormatMismatch {
            expected: format,
            found,
        });
    }

    let validator = get_validator(format)?;

    let errors: Vec<String> = validator
        .iter_errors(candidate)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if !errors.is_empty() {
        return Err(SchemaError::Invalid(errors));
    }

    let result: AnalysisResult =
        serde_json::from_value(candidate.clone()).map_err(|e| SchemaError::Decode(e.to_string()))?;

    debug_assert_eq!(result.output_format(), format);

    Ok(result)
}

/// Check whether a candidate is valid for `format`.
///
/// Use `validate_result` for detailed error messages.
pub fn is_valid_result(candidate: &Value, format: OutputFormat) -> bool {
    validate_result(candidate, format).is_ok()
}
