//! Provider lookup by type name.
//!
//! The runtime config names a provider (`provider: openai`) and carries an
//! opaque JSON blob for it. Each backend registers a [`ProviderFactory`] that
//! validates that blob and builds the provider.
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create(&config.provider, &config.provider_config)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds one kind of provider from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Type name used in configuration, e.g. `"openai"`.
    fn provider_type(&self) -> &'static str;

    /// Create a provider instance.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Defaults for optional fields.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    /// Human-readable description.
    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

/// Registered provider factories keyed by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type name.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Create a provider by type name.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(provider_type)?.create(config)
    }

    /// Validate configuration for a provider type.
    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factory(provider_type)?.validate_config(config)
    }

    /// Registered type names, sorted.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Whether a type name is registered.
    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Default configuration for a provider type.
    pub fn default_config(&self, provider_type: &str) -> Option<JsonValue> {
        self.factories
            .get(provider_type)
            .map(|f| f.default_config())
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }

    /// Registry with all compiled-in providers.
    #[cfg(feature = "openai")]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::OpenAiProviderFactory));
        registry
    }

    /// Registry with all compiled-in providers.
    #[cfg(not(feature = "openai"))]
    pub fn with_defaults() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
