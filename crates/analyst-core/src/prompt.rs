//! Prompt construction for security analysis.
//!
//! A prompt has two parts:
//! 1. The system prompt, a fixed versioned asset loaded once per process
//! 2. The user instruction, built from the request (format, context, narrative)
//!
//! The model is never trusted to honor these instructions. Every response
//! is validated by [`crate::response::validate_result`] afterwards.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{AnalysisRequest, OutputFormat, DEFAULT_INPUT_KINDS};

/// Version label of the compiled-in system prompt.
pub const BUILTIN_PROMPT_VERSION: &str = "2025-10-builtin";

/// Compiled-in system prompt.
///
/// Describes the three result shapes the validator accepts. Keep it in sync
/// with the JSON Schemas under `schemas/`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"
You are a Security Analyst Assistant.

You read free-text security narratives (access logs, visitor events, badge
records, policy statements) and produce a structured assessment.
You do not invent events that are not in the narrative.
You do not speculate about people beyond what the narrative states.

## Output Rules
1. Respond with exactly ONE JSON object and nothing else
2. The "type" field MUST equal the requested output format
3. All scores are numbers between 0.0 and 1.0
4. Severity and risk_score move together: Low < 0.25 <= Medium < 0.5 <= High < 0.8 <= Critical

## Output Format: risk_assessment
{
  "type": "risk_assessment",
  "summary": "one paragraph overview",
  "findings": [
    {
      "id": "F-001",
      "title": "short headline",
      "severity": "Low" | "Medium" | "High" | "Critical",
      "risk_score": 0.0-1.0,
      "likelihood": "Low" | "Medium" | "High",
      "impact": "Low" | "Medium" | "High",
      "confidence": 0.0-1.0,
      "recommendation": "concrete next step",
      "entities": {
        "users": ["names or badge ids"],
        "locations": ["gates, doors, rooms"],
        "clearances": ["clearance levels"]
      }
    }
  ]
}

## Output Format: summary
{
  "type": "summary",
  "narrative": "concise account of what happened"
}

## Output Format: policy_alignment
{
  "type": "policy_alignment",
  "verdict": "aligned" | "partially_aligned" | "not_aligned",
  "rationale": "which policy statements were met or broken, and why"
}

## Reminder
Finding ids are sequential: F-001, F-002, F-003.
If the narrative is ambiguous, say so in the summary and lower confidence.
"#;

/// Errors from prompt loading and construction.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Input text is empty")]
    EmptyInput,

    #[error("Failed to read system prompt: {0}")]
    Io(#[from] std::io::Error),

    #[error("System prompt at {0} is empty")]
    EmptyPrompt(String),
}

/// The immutable system prompt for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    text: String,
    version: String,
}

impl SystemPrompt {
    /// Create a system prompt from text and a version label.
    pub fn new(text: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            version: version.into(),
        }
    }

    /// The compiled-in prompt.
    pub fn builtin() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT.trim(), BUILTIN_PROMPT_VERSION)
    }

    /// Load an operator-supplied prompt from disk.
    ///
    /// The file name is used as the version label.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Err(PromptError::EmptyPrompt(path.display().to_string()));
        }

        let version = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self::new(text.trim(), version))
    }

    /// Prompt text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Version label.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A fully built two-part prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Fixed system instruction
    pub system: String,

    /// Request-specific instruction and narrative
    pub user: String,
}

impl Prompt {
    /// Total characters across both parts.
    pub fn char_count(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

/// Builds prompts from requests. Pure and reentrant.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: Arc<SystemPrompt>,
}

impl PromptBuilder {
    /// Create a builder around a loaded system prompt.
    pub fn new(system: Arc<SystemPrompt>) -> Self {
        Self { system }
    }

    /// The system prompt this builder uses.
    pub fn system_prompt(&self) -> &SystemPrompt {
        &self.system
    }

    /// Build the prompt for a request.
    ///
    /// Fails with [`PromptError::EmptyInput`] when the narrative is blank.
    pub fn build(&self, request: &AnalysisRequest) -> Result<Prompt, PromptError> {
        if request.is_blank() {
            return Err(PromptError::EmptyInput);
        }

        Ok(Prompt {
            system: self.system.text().to_string(),
            user: user_instruction(request),
        })
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(Arc::new(SystemPrompt::builtin()))
    }
}

/// Format-specific steering appended to the user instruction.
pub fn format_instruction(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::RiskAssessment => {
            "List every distinct risk as a finding. Populate entities with the users, locations and clearances involved."
        }
        OutputFormat::Summary => "Summarize the events factually. Do not rate risk.",
        OutputFormat::PolicyAlignment => {
            "Compare the events against the stated policy and give a verdict with its rationale."
        }
    }
}

fn user_instruction(request: &AnalysisRequest) -> String {
    let time_window = request.time_window().unwrap_or("Not specified");
    let inputs = if request.inputs().is_empty() {
        DEFAULT_INPUT_KINDS.join(", ")
    } else {
        request.inputs().join(", ")
    };

    format!(
        "Produce a {format} JSON object strictly following the system output format. \
         The \"type\" field must be \"{format}\".\n\
         {steering}\n\
         Context time_window: {time_window}. Inputs: {inputs}.\n\
         Analyze the following content:\n\n{text}",
        format = request.output_format(),
        steering = format_instruction(request.output_format()),
        time_window = time_window,
        inputs = inputs,
        text = request.input_text().trim(),
    )
}
