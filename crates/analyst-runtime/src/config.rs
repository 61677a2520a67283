//! Runtime configuration.
//!
//! Loaded from YAML, then overridden by environment variables:
//!
//! ```yaml
//! provider: openai
//! provider_config:
//!   base_url: https://api.openai.com/v1
//! model: gpt-3.5-turbo
//! allowed_models: [gpt-3.5-turbo, gpt-4o-mini]
//! temperature: 0.2
//! timeout: 30s
//! retry:
//!   max_retries: 3
//!   initial_backoff: 500ms
//!   max_backoff: 8s
//! audit:
//!   path: analyst_audit.db
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Environment variable overriding [`RuntimeConfig::model`].
pub const MODEL_ENV: &str = "OPENAI_MODEL";

/// Environment variable overriding [`AuditConfig::path`].
pub const AUDIT_DB_ENV: &str = "ANALYST_AUDIT_DB";

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Durations written as `30s`, `500ms`, `1m 30s`.
mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Retry schedule for transient model failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,

    /// Delay before the first retry
    #[serde(with = "duration_human")]
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    #[serde(with = "duration_human")]
    pub max_backoff: Duration,

    /// Growth factor between delays
    pub factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Backoff schedule for `backon`.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.factor)
            .with_max_times(self.max_retries)
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// Characters of input kept in each record
    pub preview_chars: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("analyst_audit.db"),
            preview_chars: 60,
        }
    }
}

/// Configuration for the analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Provider type registered in the provider registry
    pub provider: String,

    /// Provider-specific settings passed to its factory
    pub provider_config: JsonValue,

    /// Default model identifier
    pub model: String,

    /// Models a request may override to; empty allows any
    pub allowed_models: Vec<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// Completion token limit
    pub max_tokens: u32,

    /// Per-attempt deadline
    #[serde(with = "duration_human")]
    pub timeout: Duration,

    /// Retry schedule
    pub retry: RetryPolicy,

    /// Operator-supplied system prompt; the built-in prompt when absent
    pub system_prompt_path: Option<PathBuf>,

    /// Audit trail settings
    pub audit: AuditConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            provider_config: serde_json::json!({}),
            model: "gpt-3.5-turbo".to_string(),
            allowed_models: Vec::new(),
            temperature: 0.2,
            max_tokens: 1500,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            system_prompt_path: None,
            audit: AuditConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Apply `OPENAI_MODEL` and `ANALYST_AUDIT_DB` overrides.
    pub fn apply_env(mut self) -> Self {
        if let Some(model) = std::env::var(MODEL_ENV).ok().filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        if let Some(path) = std::env::var_os(AUDIT_DB_ENV) {
            self.audit.path = PathBuf::from(path);
        }
        self
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if self.retry.factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry factor {} must be at least 1",
                self.retry.factor
            )));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid(
                "retry initial_backoff exceeds max_backoff".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a request may use `model`.
    pub fn is_model_allowed(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }
}
