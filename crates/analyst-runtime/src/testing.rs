//! Scripted provider shared by the runtime's tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

/// Replies from a queue, then repeats a fallback forever.
pub(crate) struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Result<String, ProviderError>,
    delay: Duration,
    healthy: bool,
    calls: AtomicUsize,
    seen_models: Mutex<Vec<String>>,
    seen_messages: Mutex<Vec<ChatMessage>>,
}

impl ScriptedProvider {
    pub(crate) fn always(reply: impl Into<String>) -> Self {
        Self::script(Vec::new(), Ok(reply.into()))
    }

    pub(crate) fn failing(error: ProviderError) -> Self {
        Self::script(Vec::new(), Err(error))
    }

    pub(crate) fn script(
        replies: Vec<Result<String, ProviderError>>,
        fallback: Result<String, ProviderError>,
    ) -> Self {
        Self {
            queue: Mutex::new(replies.into()),
            fallback,
            delay: Duration::ZERO,
            healthy: true,
            calls: AtomicUsize::new(0),
            seen_models: Mutex::new(Vec::new()),
            seen_messages: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every reply.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen_models(&self) -> Vec<String> {
        self.seen_models.lock().clone()
    }

    pub(crate) fn last_messages(&self) -> Vec<ChatMessage> {
        self.seen_messages.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_models.lock().push(config.model.clone());
        *self.seen_messages.lock() = messages;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        next.map(|content| CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            model: config.model.clone(),
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
