//! LLM provider abstractions for analyst-runtime.
//!
//! This module defines the trait every model backend implements and an
//! OpenAI-compatible implementation.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Errors from LLM providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Request rejected by content policy: {0}")]
    ContentFiltered(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether a retry may succeed.
    ///
    /// Network failures, rate limits, timeouts and server-side errors are
    /// transient. Authentication, content-policy and other client errors are
    /// permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::ParseError(_)
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500 || *status == 408,
            ProviderError::AuthError
            | ProviderError::ContentFiltered(_)
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 1500,
            temperature: 0.2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// Implementations make exactly one network round-trip per call. Timeouts
/// and retries are applied by [`crate::client::ModelClient`], not here.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Get provider name for logs and health reports.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_creation() {
        let system = ChatMessage::system("You are a security analyst.");
        assert_eq!(system.role, "system");

        let user = ChatMessage::user("Gate 4 denied entry");
        assert_eq!(user.role, "user");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::HttpError("connection reset".into()).is_transient());
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Timeout(Duration::from_millis(1)).is_transient());
        assert!(ProviderError::ApiError {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());

        assert!(!ProviderError::AuthError.is_transient());
        assert!(!ProviderError::ContentFiltered("flagged".into()).is_transient());
        assert!(!ProviderError::ApiError {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
    }
}
