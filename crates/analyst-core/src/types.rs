//! Core types for security narrative analysis.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// The result shape a caller asks the model to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Findings with severity, scores and recommendations
    RiskAssessment,

    /// Narrative text only
    Summary,

    /// Alignment verdict against stated policy
    PolicyAlignment,
}

impl OutputFormat {
    /// All recognized formats, in declaration order.
    pub const ALL: [OutputFormat; 3] = [
        OutputFormat::RiskAssessment,
        OutputFormat::Summary,
        OutputFormat::PolicyAlignment,
    ];

    /// The wire name used as the `type` discriminant.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::RiskAssessment => "risk_assessment",
            OutputFormat::Summary => "summary",
            OutputFormat::PolicyAlignment => "policy_alignment",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown output format '{}': expected one of risk_assessment, summary, policy_alignment",
                    s
                )
            })
    }
}

/// Input kinds assumed when the caller does not name any.
pub const DEFAULT_INPUT_KINDS: [&str; 3] = ["logs", "access_records", "policy_text"];

/// A request to analyze a security narrative.
///
/// Built once by the caller and never mutated afterwards: fields are only
/// set through the consuming builder methods and read through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Free-text narrative (logs, visitor events, policy statements)
    input_text: String,

    /// Requested result shape
    #[serde(default = "default_format")]
    output_format: OutputFormat,

    /// Model override; falls back to the configured model
    #[serde(default)]
    model: Option<String>,

    /// ISO-8601 range or descriptive window the narrative covers
    #[serde(default)]
    time_window: Option<String>,

    /// Kinds of input contained in the narrative (e.g. "logs")
    #[serde(default)]
    inputs: Vec<String>,
}

fn default_format() -> OutputFormat {
    OutputFormat::RiskAssessment
}

impl AnalysisRequest {
    /// Create a request for the given narrative and format.
    pub fn new(input_text: impl Into<String>, output_format: OutputFormat) -> Self {
        Self {
            input_text: input_text.into(),
            output_format,
            model: None,
            time_window: None,
            inputs: Vec::new(),
        }
    }

    /// Request a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Bound the analysis to a time window.
    pub fn with_time_window(mut self, window: impl Into<String>) -> Self {
        self.time_window = Some(window.into());
        self
    }

    /// Declare the kinds of input contained in the narrative.
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Free-text narrative.
    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    /// Requested result shape.
    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    /// Model override, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Time window the narrative covers, if given.
    pub fn time_window(&self) -> Option<&str> {
        self.time_window.as_deref()
    }

    /// Declared input kinds; empty when the caller named none.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Whether the narrative is empty after trimming.
    pub fn is_blank(&self) -> bool {
        self.input_text.trim().is_empty()
    }

    /// First `max_chars` characters of the narrative.
    pub fn preview(&self, max_chars: usize) -> String {
        self.input_text.chars().take(max_chars).collect()
    }
}

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Three-level rating used for likelihood and impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rating {
    Low,
    Medium,
    High,
}

/// Entity names grouped by category (e.g. "users", "locations").
pub type EntityMap = BTreeMap<String, BTreeSet<String>>;

/// One discrete risk observation within a risk assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Sequential identifier (`F-001`, `F-002`, ...)
    #[serde(default, deserialize_with = "string_or_empty")]
    pub id: String,

    /// Short headline
    pub title: String,

    /// Severity bucket
    pub severity: Severity,

    /// Risk score (0.0 - 1.0)
    pub risk_score: f64,

    /// How likely the risk is to materialize
    pub likelihood: Rating,

    /// How damaging it would be
    pub impact: Rating,

    /// Model confidence in the finding (0.0 - 1.0)
    pub confidence: f64,

    /// Recommended action
    pub recommendation: String,

    /// Entities referenced by the finding
    #[serde(default)]
    pub entities: EntityMap,
}

/// Models number findings however they like (`1`, `null`, `{"n": 1}`);
/// anything but a string decodes as empty and is renumbered later.
fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => Ok(id),
        _ => Ok(String::new()),
    }
}

impl Finding {
    /// Entities in a category, if any were reported.
    pub fn entities_in(&self, category: &str) -> Option<&BTreeSet<String>> {
        self.entities.get(category)
    }
}

/// Verdict of a policy alignment check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentVerdict {
    Aligned,
    PartiallyAligned,
    NotAligned,
}

/// A validated analysis result.
///
/// The `type` discriminant always equals the format the caller requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    RiskAssessment {
        summary: String,
        findings: Vec<Finding>,
    },
    Summary {
        narrative: String,
    },
    PolicyAlignment {
        verdict: AlignmentVerdict,
        rationale: String,
    },
}

impl AnalysisResult {
    /// The format this result satisfies.
    pub fn output_format(&self) -> OutputFormat {
        match self {
            AnalysisResult::RiskAssessment { .. } => OutputFormat::RiskAssessment,
            AnalysisResult::Summary { .. } => OutputFormat::Summary,
            AnalysisResult::PolicyAlignment { .. } => OutputFormat::PolicyAlignment,
        }
    }

    /// Findings, empty for formats without them.
    pub fn findings(&self) -> &[Finding] {
        match self {
            AnalysisResult::RiskAssessment { findings, .. } => findings,
            _ => &[],
        }
    }

    /// Wrap the result in the `{"data": ...}` envelope callers return.
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({ "data": self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_round_trip_names() {
        for format in OutputFormat::ALL {
            assert_eq!(format.as_str().parse::<OutputFormat>().unwrap(), format);
        }
        assert!("markdown".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_request_builder() {
        let request = AnalysisRequest::new("Badge reuse at Gate 2", OutputFormat::Summary)
            .with_model("gpt-4o-mini")
            .with_time_window("2025-01-01/2025-01-02")
            .with_inputs(["logs"]);

        assert_eq!(request.model(), Some("gpt-4o-mini"));
        assert_eq!(request.inputs(), ["logs".to_string()]);
        assert_eq!(request.time_window(), Some("2025-01-01/2025-01-02"));
        assert!(!request.is_blank());
    }

    #[test]
    fn test_blank_request() {
        assert!(AnalysisRequest::new("  \n\t ", OutputFormat::Summary).is_blank());
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let request = AnalysisRequest::new("é".repeat(100), OutputFormat::Summary);
        let preview = request.preview(60);
        assert_eq!(preview.chars().count(), 60);
    }

    #[test]
    fn test_result_serializes_with_type_tag() {
        let result = AnalysisResult::PolicyAlignment {
            verdict: AlignmentVerdict::PartiallyAligned,
            rationale: "Escort policy followed, logging incomplete".to_string(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "policy_alignment");
        assert_eq!(value["verdict"], "partially_aligned");
        assert_eq!(result.output_format(), OutputFormat::PolicyAlignment);
    }

    #[test]
    fn test_envelope() {
        let result = AnalysisResult::Summary {
            narrative: "Quiet night".to_string(),
        };
        let envelope = result.to_envelope();
        assert_eq!(envelope["data"]["type"], "summary");
        assert_eq!(envelope["data"]["narrative"], "Quiet night");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: AnalysisRequest =
            serde_json::from_str(r#"{"input_text": "Door forced at 02:14"}"#).unwrap();
        assert_eq!(request.output_format(), OutputFormat::RiskAssessment);
        assert!(request.inputs().is_empty());
    }
}
