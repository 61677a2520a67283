//! OpenAI-compatible chat completions provider.
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` endpoint (set `base_url`).
//!
//! ## Security
//!
//! The API key is held in an [`ApiCredential`] and exposed only when the
//! `Authorization` header is built. See the [`secrets`](super::secrets) module.

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions provider.
pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    /// Create a provider with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "OpenAI API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(OPENAI_API_KEY_ENV, "OpenAI API key")?;
        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Create from JSON configuration.
    ///
    /// Reads `api_key` (falling back to `OPENAI_API_KEY`) and an optional
    /// `base_url`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )?;

        let base_url = config["base_url"]
            .as_str()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            base_url,
            client,
        })
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Chat completions request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

/// Chat completions response body.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Map a non-success status and its body to a provider error.
fn classify_error(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
    let detail = serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        401 | 403 => ProviderError::AuthError,
        429 => ProviderError::RateLimited { retry_after },
        _ if detail
            .as_ref()
            .and_then(|d| d.code.as_deref())
            .is_some_and(|c| c == "content_policy_violation") =>
        {
            ProviderError::ContentFiltered(message)
        }
        _ => ProviderError::ApiError { status, message },
    }
}

/// Turn a decoded body into a completion, rejecting filtered or empty choices.
fn into_completion(body: ChatResponse) -> Result<CompletionResponse, ProviderError> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(ProviderError::ContentFiltered(
            "completion stopped by content filter".to_string(),
        ));
    }

    let usage = body
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        usage,
        model: body.model,
        stop_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        // The credential is exposed only here
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body, retry_after));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let completion = into_completion(body)?;
        tracing::debug!(
            model = %completion.model,
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            "OpenAI completion received"
        );
        Ok(completion)
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Factory for OpenAI-compatible providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-...",             // Optional, falls back to OPENAI_API_KEY env
///   "base_url": "https://..."        // Optional, OpenAI-compatible endpoint
/// }
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let provider = OpenAiProvider::from_config(config)?;
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", OPENAI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in config or {} env",
                OPENAI_API_KEY_ENV
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible chat completions provider"
    }
}
