//! Credential handling for model providers.
//!
//! API keys are wrapped in [`ApiCredential`] as soon as they are read, so
//! they never show up in `Debug`/`Display` output, logs, or audit records.
//!
//! ```ignore
//! let cred = ApiCredential::from_config_or_env(&config, "api_key", "OPENAI_API_KEY", "OpenAI API key")?;
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider JSON configuration
    Config,
    /// Environment variable
    Environment,
    /// Passed in by code
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A redacted API credential.
///
/// The value is zeroed on drop and only readable through [`expose`](Self::expose).
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a raw value.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load from an environment variable.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| {
                ProviderError::NotConfigured(format!(
                    "{} not set: configure '{}' environment variable",
                    name, env_var
                ))
            })
    }

    /// Load from `config[config_key]`, falling back to `env_var`.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        if let Ok(value) = std::env::var(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in config or {} environment variable",
            name, config_key, env_var
        )))
    }

    /// Whether a credential could be loaded, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some() || std::env::var(env_var).is_ok()
    }

    /// The raw value. Call only where the key is sent.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Whether the value is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Where the value came from.
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Human-readable credential name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted() {
        let secret = "sk-analyst-secret-98765";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "OpenAI API key");

        let debug = format!("{:?}", cred);
        let display = format!("{}", cred);
        assert!(!debug.contains(secret), "Secret exposed in Debug!");
        assert!(!display.contains(secret), "Secret exposed in Display!");
        assert!(display.contains("OpenAI API key from config"));
        assert_eq!(cred.expose(), secret);
    }

    #[test]
    fn test_from_config_or_env() {
        let config = serde_json::json!({ "api_key": "config-key" });
        std::env::set_var("ANALYST_TEST_KEY_PRIORITY", "env-key");

        let cred =
            ApiCredential::from_config_or_env(&config, "api_key", "ANALYST_TEST_KEY_PRIORITY", "Key")
                .unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);

        let cred = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "ANALYST_TEST_KEY_PRIORITY",
            "Key",
        )
        .unwrap();
        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);

        std::env::remove_var("ANALYST_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_missing_credential_names_both_sources() {
        let err = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "ANALYST_TEST_MISSING_KEY",
            "OpenAI API key",
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("api_key"));
        assert!(message.contains("ANALYST_TEST_MISSING_KEY"));
        assert!(!ApiCredential::is_available(
            &serde_json::json!({}),
            "api_key",
            "ANALYST_TEST_MISSING_KEY"
        ));
    }
}
