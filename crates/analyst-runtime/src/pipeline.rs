//! The analysis pipeline.
//!
//! One call runs the whole flow for a request:
//! - Build the prompt (blank input fails here, before any network call)
//! - Resolve the model against the allow-list
//! - Invoke the model with timeout and retry
//! - Parse and validate the reply
//! - Append exactly one audit record, whatever the outcome
//!
//! Audit failures are logged and never fail the call.

use std::sync::Arc;
use std::time::Duration;

use analyst_core::{
    parse_response, AnalysisRequest, AnalysisResult, ParseError, PromptBuilder, PromptError,
    SchemaError, SystemPrompt,
};
use serde::Serialize;
use thiserror::Error;

use crate::audit::{AuditStore, MemoryAuditStore, NewAuditRecord, ParseStatus, SqliteAuditStore};
use crate::client::{ModelClient, ModelError};
use crate::config::RuntimeConfig;
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};
use crate::RuntimeError;

/// Typed failures of one pipeline call.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input text is empty")]
    EmptyInput,

    #[error("Failed to build prompt: {0}")]
    Prompt(#[source] PromptError),

    #[error("Model did not respond within {timeout:?} ({attempts} attempts)")]
    ModelTimeout { timeout: Duration, attempts: usize },

    #[error("Model unavailable after {attempts} attempts: {source}")]
    ModelUnavailable {
        attempts: usize,
        #[source]
        source: ProviderError,
    },

    #[error("Model rejected the request: {0}")]
    ModelRejected(#[source] ProviderError),

    #[error("Model output is not parsable JSON: {0}")]
    Unparsable(String),

    #[error("Model output failed schema validation: {0}")]
    SchemaInvalid(#[source] SchemaError),
}

impl PipelineError {
    /// HTTP status a serving layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::EmptyInput => 400,
            PipelineError::Prompt(_) => 500,
            PipelineError::ModelTimeout { .. } => 504,
            PipelineError::ModelUnavailable { .. }
            | PipelineError::ModelRejected(_)
            | PipelineError::Unparsable(_)
            | PipelineError::SchemaInvalid(_) => 502,
        }
    }

    /// Whether the caller, not the model or the service, is at fault.
    pub fn is_caller_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// How this failure is recorded in the audit trail.
    pub fn parse_status(&self) -> ParseStatus {
        match self {
            PipelineError::Unparsable(_) => ParseStatus::Unparsable,
            PipelineError::SchemaInvalid(_) => ParseStatus::SchemaInvalid,
            _ => ParseStatus::ModelError,
        }
    }
}

impl From<PromptError> for PipelineError {
    fn from(e: PromptError) -> Self {
        match e {
            PromptError::EmptyInput => PipelineError::EmptyInput,
            other => PipelineError::Prompt(other),
        }
    }
}

impl From<ModelError> for PipelineError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Timeout { timeout, attempts } => {
                PipelineError::ModelTimeout { timeout, attempts }
            }
            ModelError::Unavailable { attempts, source } => {
                PipelineError::ModelUnavailable { attempts, source }
            }
            ModelError::Rejected(source) => PipelineError::ModelRejected(source),
        }
    }
}

impl From<ParseError> for PipelineError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Unparsable { reason } => PipelineError::Unparsable(reason),
            ParseError::SchemaInvalid(schema) => PipelineError::SchemaInvalid(schema),
        }
    }
}

/// A successful analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// The validated result
    pub result: AnalysisResult,

    /// Model that produced it
    pub model: String,

    /// Audit record id; `None` when the audit write failed
    pub audit_id: Option<i64>,
}

impl AnalysisOutcome {
    /// `{"data": <result>}` as returned to HTTP callers.
    pub fn into_envelope(self) -> serde_json::Value {
        self.result.to_envelope()
    }
}

/// Readiness of the pipeline's collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok` when every collaborator is reachable, otherwise `degraded`
    pub status: &'static str,
    pub provider: String,
    pub provider_healthy: bool,
    pub model: String,
    pub allowed_models: Vec<String>,
    pub prompt_version: String,
    pub prompt_chars: usize,
    pub audit_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

/// Runs analyses end to end.
pub struct AnalysisPipeline {
    prompts: PromptBuilder,
    client: ModelClient,
    audit: Arc<dyn AuditStore>,
    config: RuntimeConfig,
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("client", &self.client)
            .field("model", &self.config.model)
            .field("prompt_version", &self.prompts.system_prompt().version())
            .finish()
    }
}

impl AnalysisPipeline {
    /// Start building a pipeline.
    pub fn builder() -> AnalysisPipelineBuilder {
        AnalysisPipelineBuilder::new()
    }

    /// Build from configuration: provider from the registry, SQLite audit
    /// trail at `audit.path`.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let registry = ProviderRegistry::with_defaults();
        registry.validate(&config.provider, &config.provider_config)?;
        let provider = registry.create(&config.provider, &config.provider_config)?;
        let audit = SqliteAuditStore::open(&config.audit.path)?;

        Self::builder()
            .provider(provider)
            .audit_store(Arc::new(audit))
            .config(config)
            .build()
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The audit store this pipeline writes to.
    pub fn audit_store(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    /// Model a request will run against.
    ///
    /// An override outside the allow-list falls back to the configured
    /// default with a warning.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim).filter(|m| !m.is_empty()) {
            None => self.config.model.clone(),
            Some(model) if self.config.is_model_allowed(model) => model.to_string(),
            Some(model) => {
                tracing::warn!(
                    requested = model,
                    fallback = %self.config.model,
                    "Requested model not allowed, using default"
                );
                self.config.model.clone()
            }
        }
    }

    /// Analyze one request.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, PipelineError> {
        let prompt = self.prompts.build(request)?;
        let model = self.resolve_model(request.model());

        tracing::info!(
            model = %model,
            format = %request.output_format(),
            prompt_chars = prompt.char_count(),
            "Starting analysis"
        );

        let (raw_output, outcome) = match self.client.invoke(&prompt, &model, self.config.timeout).await {
            Ok(raw) => {
                let parsed = parse_response(&raw, request.output_format()).map_err(PipelineError::from);
                (raw, parsed)
            }
            Err(e) => (String::new(), Err(PipelineError::from(e))),
        };

        let (parse_status, error_detail) = match &outcome {
            Ok(_) => (ParseStatus::Success, None),
            Err(e) => (e.parse_status(), Some(e.to_string())),
        };

        let audit_id = self
            .record(NewAuditRecord {
                model: model.clone(),
                output_format: request.output_format(),
                input_preview: request.preview(self.config.audit.preview_chars),
                raw_output,
                parse_status,
                prompt_chars: prompt.char_count(),
                error_detail,
            })
            .await;

        match outcome {
            Ok(result) => {
                tracing::info!(audit_id = ?audit_id, findings = result.findings().len(), "Analysis complete");
                Ok(AnalysisOutcome {
                    result,
                    model,
                    audit_id,
                })
            }
            Err(e) => {
                tracing::warn!(audit_id = ?audit_id, status = %parse_status, error = %e, "Analysis failed");
                Err(e)
            }
        }
    }

    /// Append an audit record, logging instead of failing.
    async fn record(&self, record: NewAuditRecord) -> Option<i64> {
        match self.audit.record(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Audit write failed");
                None
            }
        }
    }

    /// Check provider and audit store readiness.
    pub async fn health(&self) -> HealthReport {
        let provider = self.client.provider();
        let provider_healthy = provider.health_check().await;
        let audit = self.audit.ping().await;
        let system = self.prompts.system_prompt();

        HealthReport {
            status: if provider_healthy && audit.is_ok() {
                "ok"
            } else {
                "degraded"
            },
            provider: provider.name().to_string(),
            provider_healthy,
            model: self.config.model.clone(),
            allowed_models: self.config.allowed_models.clone(),
            prompt_version: system.version().to_string(),
            prompt_chars: system.text().chars().count(),
            audit_reachable: audit.is_ok(),
            audit_error: audit.err().map(|e| e.to_string()),
        }
    }
}

/// Builder for [`AnalysisPipeline`].
pub struct AnalysisPipelineBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    audit: Option<Arc<dyn AuditStore>>,
    system_prompt: Option<Arc<SystemPrompt>>,
    config: RuntimeConfig,
}

impl AnalysisPipelineBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            audit: None,
            system_prompt: None,
            config: RuntimeConfig::default(),
        }
    }

    /// Set the model provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the audit store. Defaults to an in-memory store.
    pub fn audit_store(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Use an already loaded system prompt instead of the configured one.
    pub fn system_prompt(mut self, prompt: Arc<SystemPrompt>) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> Result<AnalysisPipeline, RuntimeError> {
        self.config.validate()?;

        let provider = self
            .provider
            .ok_or_else(|| RuntimeError::ProviderNotConfigured("No provider set".to_string()))?;

        let system_prompt = match (self.system_prompt, &self.config.system_prompt_path) {
            (Some(prompt), _) => prompt,
            (None, Some(path)) => Arc::new(SystemPrompt::from_file(path)?),
            (None, None) => Arc::new(SystemPrompt::builtin()),
        };

        let audit = self.audit.unwrap_or_else(|| {
            tracing::warn!("No audit store configured, records will not persist");
            Arc::new(MemoryAuditStore::new())
        });

        tracing::debug!(
            provider = provider.name(),
            model = %self.config.model,
            prompt_version = system_prompt.version(),
            "Analysis pipeline ready"
        );

        Ok(AnalysisPipeline {
            prompts: PromptBuilder::new(system_prompt),
            client: ModelClient::from_config(provider, &self.config),
            audit,
            config: self.config,
        })
    }
}

impl Default for AnalysisPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
