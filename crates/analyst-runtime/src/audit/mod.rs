//! Audit trail of model invocations.
//!
//! Every analysis that reaches the model leaves exactly one record: the
//! model used, a short input preview, the full raw reply and how parsing
//! went. Records are append-only and ids increase strictly.

use std::fmt;
use std::str::FromStr;

use analyst_core::OutputFormat;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryAuditStore;
pub use sqlite::SqliteAuditStore;

/// Errors from an audit store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuditError {
    #[error("Audit store unavailable")]
    Unavailable,

    #[error("Audit storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        AuditError::Storage(e.to_string())
    }
}

/// How the raw model output was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    /// Parsed and validated
    Success,
    /// JSON found but wrong shape or out-of-range values
    SchemaInvalid,
    /// No JSON object in the reply
    Unparsable,
    /// The model never produced a reply
    ModelError,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Success => "success",
            ParseStatus::SchemaInvalid => "schema_invalid",
            ParseStatus::Unparsable => "unparsable",
            ParseStatus::ModelError => "model_error",
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ParseStatus::Success),
            "schema_invalid" => Ok(ParseStatus::SchemaInvalid),
            "unparsable" => Ok(ParseStatus::Unparsable),
            "model_error" => Ok(ParseStatus::ModelError),
            other => Err(format!("unknown parse status: {}", other)),
        }
    }
}

/// A record to be appended. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRecord {
    pub model: String,
    pub output_format: OutputFormat,
    pub input_preview: String,
    pub raw_output: String,
    pub parse_status: ParseStatus,
    pub prompt_chars: usize,
    pub error_detail: Option<String>,
}

/// A stored audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub output_format: OutputFormat,
    pub input_preview: String,
    pub raw_output: String,
    pub parse_status: ParseStatus,
    pub prompt_chars: usize,
    pub error_detail: Option<String>,
}

impl AuditRecord {
    pub(crate) fn from_new(id: i64, created_at: DateTime<Utc>, record: NewAuditRecord) -> Self {
        Self {
            id,
            created_at,
            model: record.model,
            output_format: record.output_format,
            input_preview: record.input_preview,
            raw_output: record.raw_output,
            parse_status: record.parse_status,
            prompt_chars: record.prompt_chars,
            error_detail: record.error_detail,
        }
    }

    /// Listing projection of this record.
    pub fn summary(&self) -> AuditSummary {
        AuditSummary {
            id: self.id,
            created_at: self.created_at,
            model: self.model.clone(),
            output_format: self.output_format,
            input_preview: self.input_preview.clone(),
        }
    }
}

/// Listing projection of an audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub output_format: OutputFormat,
    pub input_preview: String,
}

/// Append-only audit storage.
///
/// Implementations must be safe to call from many tasks at once and must
/// hand out unique, strictly increasing ids.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record and return its id.
    async fn record(&self, record: NewAuditRecord) -> Result<i64, AuditError>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditSummary>, AuditError>;

    /// A single record by id.
    async fn get(&self, id: i64) -> Result<Option<AuditRecord>, AuditError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), AuditError>;
}

#[cfg(test)]
pub(crate) fn sample_record(preview: &str, status: ParseStatus) -> NewAuditRecord {
    NewAuditRecord {
        model: "gpt-3.5-turbo".to_string(),
        output_format: OutputFormat::RiskAssessment,
        input_preview: preview.to_string(),
        raw_output: "{\"type\": \"risk_assessment\"}".to_string(),
        parse_status: status,
        prompt_chars: 1234,
        error_detail: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_strings() {
        for status in [
            ParseStatus::Success,
            ParseStatus::SchemaInvalid,
            ParseStatus::Unparsable,
            ParseStatus::ModelError,
        ] {
            assert_eq!(status.as_str().parse::<ParseStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
        assert!("crashed".parse::<ParseStatus>().is_err());
    }

    #[test]
    fn test_summary_projection() {
        let record = AuditRecord::from_new(7, Utc::now(), sample_record("Gate 4", ParseStatus::Success));
        let summary = record.summary();
        assert_eq!(summary.id, 7);
        assert_eq!(summary.input_preview, "Gate 4");
        assert_eq!(summary.output_format, OutputFormat::RiskAssessment);
    }
}
