//! Response parsing from raw model text.
//!
//! The model is an untrusted text source. It may wrap its JSON in prose or
//! code fences, miscase enum values, or number findings however it likes.
//! Parsing tolerates the formatting noise, then validates strictly:
//! any shape or range problem fails the whole response.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::schema::{validate_result, SchemaError};
use crate::types::{AnalysisResult, Finding, OutputFormat};

lazy_static! {
    /// Fenced code block, optionally tagged `json`.
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").unwrap();
}

/// Errors that can occur when parsing model output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Model output is not parsable JSON: {reason}")]
    Unparsable { reason: String },

    #[error("Model output failed schema validation: {0}")]
    SchemaInvalid(#[from] SchemaError),
}

/// Parse raw model text into a validated result of the expected format.
///
/// On success the result's type equals `expected`, finding ids are
/// `F-001`, `F-002`, ... in order, and scores are rounded to two decimals.
pub fn parse_response(raw: &str, expected: OutputFormat) -> Result<AnalysisResult, ParseError> {
    let mut candidate = extract_json_object(raw)?;
    normalize_enum_casing(&mut candidate);

    let mut result = validate_result(&candidate, expected)?;

    if let AnalysisResult::RiskAssessment { findings, .. } = &mut result {
        let repaired = renumber_findings(findings);
        if repaired > 0 {
            tracing::debug!(repaired, total = findings.len(), "Renumbered finding ids");
        }
        for finding in findings.iter_mut() {
            finding.risk_score = round_score(finding.risk_score);
            finding.confidence = round_score(finding.confidence);
        }
    }

    Ok(result)
}

/// Locate the first complete JSON object in raw text.
///
/// Text is searched in document order: prose up to a fenced code block, the
/// block's body, the prose after it, and so on. The earliest complete object
/// wins whether or not it sits in a fence. A candidate that is cut off
/// mid-object stops the search of its region: an inner object of a
/// truncated response is never mistaken for the answer.
pub fn extract_json_object(raw: &str) -> Result<Value, ParseError> {
    let mut last_error: Option<String> = None;

    for region in regions(raw) {
        match first_object(region) {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => {
                last_error.get_or_insert(e);
            }
        }
    }

    Err(ParseError::Unparsable {
        reason: last_error.unwrap_or_else(|| "no JSON object found".to_string()),
    })
}

/// Split raw text into prose and fenced-body regions, in order.
fn regions(raw: &str) -> Vec<&str> {
    let mut regions = Vec::new();
    let mut cursor = 0;

    for caps in FENCED_BLOCK.captures_iter(raw) {
        let (Some(block), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        regions.push(&raw[cursor..block.start()]);
        regions.push(body.as_str());
        cursor = block.end();
    }

    regions.push(&raw[cursor..]);
    regions
}

fn first_object(region: &str) -> Result<Option<Value>, String> {
    let mut first_error = None;

    for (start, _) in region.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&region[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => return Ok(Some(value)),
            Some(Ok(_)) | None => {}
            Some(Err(e)) if e.is_eof() => {
                return Err(first_error.unwrap_or_else(|| format!("truncated JSON: {}", e)));
            }
            Some(Err(e)) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Canonicalize enum spelling the model commonly gets wrong (`high`, `HIGH`,
/// `Partially Aligned`). Unknown values are left for the validator to reject.
fn normalize_enum_casing(candidate: &mut Value) {
    if let Some(findings) = candidate.get_mut("findings").and_then(Value::as_array_mut) {
        for finding in findings.iter_mut() {
            for field in ["severity", "likelihood", "impact"] {
                if let Some(Value::String(s)) = finding.get_mut(field) {
                    if let Some(canonical) = canonical_level(s) {
                        *s = canonical.to_string();
                    }
                }
            }
        }
    }

    if let Some(Value::String(verdict)) = candidate.get_mut("verdict") {
        *verdict = verdict
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");
    }
}

fn canonical_level(value: &str) -> Option<&'static str> {
    match value.trim().to_lowercase().as_str() {
        "low" => Some("Low"),
        "medium" => Some("Medium"),
        "high" => Some("High"),
        "critical" => Some("Critical"),
        _ => None,
    }
}

/// Identifier for the finding at `index` (zero-based).
pub fn finding_id(index: usize) -> String {
    format!("F-{:03}", index + 1)
}

/// Assign sequential ids in order of appearance.
///
/// Returns how many ids changed.
pub fn renumber_findings(findings: &mut [Finding]) -> usize {
    let mut repaired = 0;
    for (index, finding) in findings.iter_mut().enumerate() {
        let id = finding_id(index);
        if finding.id != id {
            finding.id = id;
            repaired += 1;
        }
    }
    repaired
}

fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn finding_json(id: Value) -> Value {
        json!({
            "id": id,
            "title": "Clearance mismatch",
            "severity": "High",
            "risk_score": 0.7,
            "likelihood": "Medium",
            "impact": "High",
            "confidence": 0.9,
            "recommendation": "Escalate to site security",
            "entities": { "users": ["visitor"], "locations": ["Gate 4"] }
        })
    }

    fn assessment(findings: Vec<Value>) -> String {
        json!({
            "type": "risk_assessment",
            "summary": "Denied entry",
            "findings": findings
        })
        .to_string()
    }

    #[test]
    fn test_parse_plain_json() {
        let raw = assessment(vec![finding_json(json!("F-001"))]);
        let result = parse_response(&raw, OutputFormat::RiskAssessment).unwrap();
        assert_eq!(result.output_format(), OutputFormat::RiskAssessment);
        assert_eq!(result.findings()[0].id, "F-001");
    }

    #[test]
    fn test_parse_with_prose_and_fence() {
        let body = assessment(vec![finding_json(json!("F-001"))]);
        let raw = format!(
            "Here is the analysis you asked for {{as requested}}:\n```json\n{}\n```\nLet me know.",
            body
        );
        let result = parse_response(&raw, OutputFormat::RiskAssessment).unwrap();
        assert_eq!(result.findings().len(), 1);
    }

    #[test]
    fn test_parse_with_leading_prose_braces() {
        let body = json!({ "type": "summary", "narrative": "Door held open." }).to_string();
        let raw = format!("Note {{not json}} then {}", body);
        let result = parse_response(&raw, OutputFormat::Summary).unwrap();
        assert_eq!(
            result,
            AnalysisResult::Summary {
                narrative: "Door held open.".to_string()
            }
        );
    }

    #[test]
    fn test_no_json_is_unparsable() {
        let result = parse_response("I cannot help with that.", OutputFormat::Summary);
        assert!(matches!(result, Err(ParseError::Unparsable { .. })));
    }

    #[test]
    fn test_truncated_json_is_unparsable() {
        let full = assessment(vec![finding_json(json!("F-001"))]);
        let truncated = &full[..full.len() - 10];
        let result = parse_response(truncated, OutputFormat::RiskAssessment);
        assert!(matches!(result, Err(ParseError::Unparsable { .. })));
    }

    #[test]
    fn test_mismatched_type_is_schema_invalid() {
        let raw = json!({ "type": "summary", "narrative": "x" }).to_string();
        let result = parse_response(&raw, OutputFormat::PolicyAlignment);
        assert!(matches!(
            result,
            Err(ParseError::SchemaInvalid(SchemaError::FormatMismatch { .. }))
        ));
    }

    #[test]
    fn test_missing_and_duplicate_ids_renumbered() {
        let raw = assessment(vec![
            finding_json(json!("F-007")),
            finding_json(Value::Null),
            finding_json(json!("F-007")),
        ]);
        let result = parse_response(&raw, OutputFormat::RiskAssessment).unwrap();
        let ids: Vec<&str> = result.findings().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["F-001", "F-002", "F-003"]);
    }

    #[test]
    fn test_non_string_ids_renumbered() {
        let raw = assessment(vec![
            finding_json(json!(1)),
            finding_json(json!(2.5)),
            finding_json(json!({ "n": 1 })),
            finding_json(json!(["F-9"])),
        ]);
        let result = parse_response(&raw, OutputFormat::RiskAssessment).unwrap();
        let ids: Vec<&str> = result.findings().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["F-001", "F-002", "F-003", "F-004"]);
    }

    #[test]
    fn test_missing_id_field_renumbered() {
        let mut f = finding_json(Value::Null);
        f.as_object_mut().unwrap().remove("id");
        let result = parse_response(&assessment(vec![f]), OutputFormat::RiskAssessment).unwrap();
        assert_eq!(result.findings()[0].id, "F-001");
    }

    #[test]
    fn test_earliest_object_wins_over_later_fence() {
        let raw = "Example: {\"type\":\"summary\",\"narrative\":\"example\"} then the answer:\n```json\n{\"type\":\"summary\",\"narrative\":\"real\"}\n```";
        let result = parse_response(raw, OutputFormat::Summary).unwrap();
        assert_eq!(
            result,
            AnalysisResult::Summary {
                narrative: "example".to_string()
            }
        );
    }

    #[test]
    fn test_fence_wins_over_later_prose_object() {
        let raw = "```json\n{\"type\":\"summary\",\"narrative\":\"fenced\"}\n```\nAlso: {\"type\":\"summary\",\"narrative\":\"after\"}";
        let result = parse_response(raw, OutputFormat::Summary).unwrap();
        assert_eq!(
            result,
            AnalysisResult::Summary {
                narrative: "fenced".to_string()
            }
        );
    }

    #[test]
    fn test_enum_casing_normalized() {
        let mut f = finding_json(json!("F-001"));
        f["severity"] = json!("critical");
        f["likelihood"] = json!("HIGH");
        let raw = assessment(vec![f]);
        let result = parse_response(&raw, OutputFormat::RiskAssessment).unwrap();
        assert_eq!(result.findings()[0].severity, crate::types::Severity::Critical);

        let raw = json!({
            "type": "policy_alignment",
            "verdict": "Partially Aligned",
            "rationale": "Escort present, sign-in skipped"
        })
        .to_string();
        assert!(parse_response(&raw, OutputFormat::PolicyAlignment).is_ok());
    }

    #[test]
    fn test_scores_rounded() {
        let mut f = finding_json(json!("F-001"));
        f["risk_score"] = json!(0.456);
        f["confidence"] = json!(1);
        let result = parse_response(&assessment(vec![f]), OutputFormat::RiskAssessment).unwrap();
        assert_eq!(result.findings()[0].risk_score, 0.46);
        assert_eq!(result.findings()[0].confidence, 1.0);
    }

    #[test]
    fn test_out_of_range_not_clamped() {
        let mut f = finding_json(json!("F-001"));
        f["risk_score"] = json!(7);
        let result = parse_response(&assessment(vec![f]), OutputFormat::RiskAssessment);
        assert!(matches!(
            result,
            Err(ParseError::SchemaInvalid(SchemaError::Invalid(_)))
        ));
    }

    #[test]
    fn test_finding_id_format() {
        assert_eq!(finding_id(0), "F-001");
        assert_eq!(finding_id(41), "F-042");
    }

    /// Ids as models actually send them.
    fn raw_id() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            "[A-Z]-[0-9]{1,4}".prop_map(Value::String),
            any::<i64>().prop_map(|n| json!(n)),
            (-1.0e6f64..1.0e6).prop_map(|x| json!(x)),
            any::<u8>().prop_map(|n| json!({ "n": n })),
        ]
    }

    proptest! {
        #[test]
        fn prop_ids_sequential_whatever_the_model_sent(
            ids in proptest::collection::vec(raw_id(), 0..12)
        ) {
            let findings = ids.iter().cloned().map(finding_json).collect();
            let result = parse_response(&assessment(findings), OutputFormat::RiskAssessment).unwrap();

            let seen: HashSet<&str> = result.findings().iter().map(|f| f.id.as_str()).collect();
            prop_assert_eq!(seen.len(), ids.len());
            for (index, finding) in result.findings().iter().enumerate() {
                prop_assert_eq!(&finding.id, &finding_id(index));
            }
        }

        #[test]
        fn prop_scores_outside_unit_interval_rejected(
            score in prop_oneof![-1000.0f64..-0.0001, 1.0001f64..1000.0]
        ) {
            let mut f = finding_json(json!("F-001"));
            f["confidence"] = json!(score);
            let result = parse_response(&assessment(vec![f]), OutputFormat::RiskAssessment);
            prop_assert!(matches!(result, Err(ParseError::SchemaInvalid(_))));
        }

        #[test]
        fn prop_scores_inside_unit_interval_stay_inside(score in 0.0f64..=1.0) {
            let mut f = finding_json(json!("F-001"));
            f["risk_score"] = json!(score);
            let result = parse_response(&assessment(vec![f]), OutputFormat::RiskAssessment).unwrap();
            let rounded = result.findings()[0].risk_score;
            prop_assert!((0.0..=1.0).contains(&rounded));
        }

        #[test]
        fn prop_result_type_matches_request_or_fails(
            produced in 0usize..3,
            requested in 0usize..3,
            prefix in "[a-zA-Z .,:]{0,40}",
        ) {
            let bodies = [
                assessment(vec![finding_json(json!("F-001"))]),
                json!({ "type": "summary", "narrative": "n" }).to_string(),
                json!({ "type": "policy_alignment", "verdict": "aligned", "rationale": "r" }).to_string(),
            ];
            let expected = OutputFormat::ALL[requested];
            let raw = format!("{}{}", prefix, bodies[produced]);

            match parse_response(&raw, expected) {
                Ok(result) => {
                    prop_assert_eq!(result.output_format(), expected);
                    prop_assert_eq!(produced, requested);
                }
                Err(ParseError::SchemaInvalid(_)) => prop_assert_ne!(produced, requested),
                Err(e) => prop_assert!(false, "unexpected error {:?}", e),
            }
        }
    }
}
