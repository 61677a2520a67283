//! Model client adapter.
//!
//! Sends a built [`Prompt`] to the configured provider and returns the raw
//! reply text. Each attempt runs under its own deadline; transient failures
//! are retried with exponential backoff. Replies are never cached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use analyst_core::Prompt;
use backon::Retryable;
use thiserror::Error;

use crate::config::{RetryPolicy, RuntimeConfig};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};

/// Terminal failures of a model invocation.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("Model did not respond within {timeout:?} ({attempts} attempts)")]
    Timeout { timeout: Duration, attempts: usize },

    #[error("Model unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: usize,
        #[source]
        source: ProviderError,
    },

    #[error("Model rejected the request: {0}")]
    Rejected(#[source] ProviderError),
}

impl ModelError {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> usize {
        match self {
            ModelError::Timeout { attempts, .. } | ModelError::Unavailable { attempts, .. } => {
                *attempts
            }
            ModelError::Rejected(_) => 1,
        }
    }
}

/// Invokes a provider with per-attempt timeout and retry.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ModelClient {
    /// Create a client with default sampling settings.
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        let defaults = CompletionConfig::default();
        Self {
            provider,
            retry,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }

    /// Create a client using the sampling and retry settings from config.
    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &RuntimeConfig) -> Self {
        Self {
            provider,
            retry: config.retry.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Send the prompt to `model` and return the reply text.
    ///
    /// Timeouts, transport errors, rate limits and 5xx responses are retried
    /// up to the policy's limit. Authentication, content-policy and other
    /// client errors fail immediately with [`ModelError::Rejected`].
    pub async fn invoke(
        &self,
        prompt: &Prompt,
        model: &str,
        timeout: Duration,
    ) -> Result<String, ModelError> {
        let messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user(prompt.user.as_str()),
        ];
        let config = CompletionConfig {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout,
        };
        let attempts = AtomicUsize::new(0);

        let provider = &self.provider;
        let messages = &messages;
        let config = &config;
        let counter = &attempts;

        let attempt = move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(attempt = n, model = %config.model, "Invoking model");
            match tokio::time::timeout(timeout, provider.complete(messages.clone(), config)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            }
        };

        let outcome = attempt
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(ProviderError::is_transient)
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::warn!(error = %err, retry_in = ?delay, "Transient model failure, retrying");
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);

        match outcome {
            Ok(response) => {
                tracing::info!(
                    provider = provider.name(),
                    model = %config.model,
                    attempts,
                    tokens = response.usage.total(),
                    "Model replied"
                );
                Ok(response.content)
            }
            Err(e) if !e.is_transient() => Err(ModelError::Rejected(e)),
            Err(ProviderError::Timeout(_)) => Err(ModelError::Timeout { timeout, attempts }),
            Err(e) => Err(ModelError::Unavailable {
                attempts,
                source: e,
            }),
        }
    }
}
