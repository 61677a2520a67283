//! # analyst-runtime
//!
//! Model invocation, audit trail and the analysis pipeline.
//!
//! `analyst-core` decides what to ask the model and whether its answer is
//! acceptable. This crate does everything with side effects:
//! - Calls the model provider with timeout and bounded retry
//! - Persists one audit record per analysis
//! - Loads runtime configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use analyst_runtime::{AnalysisPipeline, RuntimeConfig};
//! use analyst_core::{AnalysisRequest, OutputFormat};
//!
//! let config = RuntimeConfig::from_yaml_file("analyst.yaml")?.apply_env();
//! let pipeline = AnalysisPipeline::from_config(config)?;
//!
//! let request = AnalysisRequest::new("Badge 4411 used at two gates within 1 minute", OutputFormat::RiskAssessment);
//! let outcome = pipeline.analyze(&request).await?;
//! println!("{}", outcome.into_envelope());
//! ```

use thiserror::Error;

pub mod audit;
pub mod client;
pub mod config;
pub mod pipeline;
pub mod providers;

#[cfg(test)]
mod testing;

pub use audit::{
    AuditError, AuditRecord, AuditStore, AuditSummary, MemoryAuditStore, NewAuditRecord,
    ParseStatus, SqliteAuditStore,
};
pub use client::{ModelClient, ModelError};
pub use config::{AuditConfig, ConfigError, RetryPolicy, RuntimeConfig};
pub use pipeline::{
    AnalysisOutcome, AnalysisPipeline, AnalysisPipelineBuilder, HealthReport, PipelineError,
};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};

/// Errors assembling the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to load system prompt: {0}")]
    Prompt(#[from] analyst_core::PromptError),

    #[error("Failed to open audit store: {0}")]
    Audit(#[from] AuditError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_rejects_unknown_provider() {
        let config = RuntimeConfig {
            provider: "local-llama".to_string(),
            ..RuntimeConfig::default()
        };
        let err = AnalysisPipeline::from_config(config).unwrap_err();
        assert!(matches!(err, RuntimeError::Provider(ProviderError::NotConfigured(_))));
    }

    #[cfg(feature = "openai")]
    #[test]
    fn test_from_config_with_file_audit() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            provider_config: serde_json::json!({ "api_key": "sk-test" }),
            audit: AuditConfig {
                path: dir.path().join("audit.db"),
                ..AuditConfig::default()
            },
            ..RuntimeConfig::default()
        };

        let pipeline = AnalysisPipeline::from_config(config).unwrap();
        assert!(dir.path().join("audit.db").exists());
        assert_eq!(pipeline.config().model, "gpt-3.5-turbo");
    }
}
