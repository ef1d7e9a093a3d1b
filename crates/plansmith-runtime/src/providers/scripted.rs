//! Scripted provider that replays canned responses.
//!
//! Used for offline runs (`plansmith run --script`) and for driving the
//! pipeline through adversarial gateways in tests. Every call is recorded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage,
};

/// Failure kinds a script can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedFailure {
    Timeout,
    Transport,
    Upstream,
    RateLimited,
    Auth,
}

/// One scripted gateway reply.
///
/// In JSON a step is either a plain string (the raw response text) or an
/// object such as `{"error": "upstream", "status": 503}`. A `rate_limited`
/// step may carry `"retry_after_secs"`, as a `Retry-After` header would.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Text(String),
    Failure {
        error: ScriptedFailure,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

impl ScriptStep {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptStep::Text(text.into())
    }

    pub fn failure(error: ScriptedFailure) -> Self {
        ScriptStep::Failure {
            error,
            status: None,
            message: String::new(),
            retry_after_secs: None,
        }
    }

    /// A rate limit that asks the caller to wait `retry_after`.
    pub fn rate_limited(retry_after: Duration) -> Self {
        ScriptStep::Failure {
            error: ScriptedFailure::RateLimited,
            status: Some(429),
            message: String::new(),
            retry_after_secs: Some(retry_after.as_secs()),
        }
    }

    fn into_result(self, config: &CompletionConfig) -> Result<String, ProviderError> {
        match self {
            ScriptStep::Text(text) => Ok(text),
            ScriptStep::Failure {
                error,
                status,
                message,
                retry_after_secs,
            } => Err(match error {
                ScriptedFailure::Timeout => ProviderError::Timeout(config.timeout),
                ScriptedFailure::Transport => ProviderError::Transport(message),
                ScriptedFailure::Upstream => ProviderError::Upstream {
                    status: status.unwrap_or(500),
                    message,
                },
                ScriptedFailure::RateLimited => ProviderError::RateLimited {
                    retry_after: retry_after_secs.map(Duration::from_secs),
                },
                ScriptedFailure::Auth => ProviderError::Auth,
            }),
        }
    }
}

/// A call the scripted provider received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl RecordedCall {
    /// Concatenated message contents, for assertions on prompt text.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Provider that answers from a fixed queue of steps.
///
/// Once the queue is empty the fallback step (if any) answers every call;
/// without one the call fails as not configured.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    fallback: Option<ScriptStep>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider that answers every call with the same step.
    pub fn repeating(step: ScriptStep) -> Self {
        Self::new(Vec::new()).with_fallback(step)
    }

    /// Build from `{"steps": [...], "fallback": ...}`.
    pub fn from_json(config: &JsonValue) -> Result<Self, ProviderError> {
        let steps: Vec<ScriptStep> = match config.get("steps") {
            Some(steps) => serde_json::from_value(steps.clone())
                .map_err(|e| ProviderError::NotConfigured(format!("invalid script steps: {}", e)))?,
            None => Vec::new(),
        };
        let fallback: Option<ScriptStep> = match config.get("fallback") {
            Some(JsonValue::Null) | None => None,
            Some(step) => Some(serde_json::from_value(step.clone()).map_err(|e| {
                ProviderError::NotConfigured(format!("invalid script fallback: {}", e))
            })?),
        };

        let mut provider = Self::new(steps);
        provider.fallback = fallback;
        Ok(provider)
    }

    pub fn with_fallback(mut self, step: ScriptStep) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Steps left in the queue.
    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }

    fn next_step(&self) -> Option<ScriptStep> {
        self.steps
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("remaining", &self.remaining())
            .field("fallback", &self.fallback.is_some())
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let prompt_tokens: u32 = messages
            .iter()
            .map(|m| self.estimate_tokens(&m.content))
            .sum();

        self.calls.lock().push(RecordedCall {
            messages,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self
            .next_step()
            .ok_or_else(|| ProviderError::NotConfigured("script exhausted".to_string()))?;
        let content = step.into_result(config)?;

        Ok(CompletionResponse {
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens: self.estimate_tokens(&content),
            },
            content,
            model: config.model.clone(),
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        self.remaining() > 0 || self.fallback.is_some()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Factory for scripted providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "steps": ["raw text", {"error": "timeout"}],
///   "fallback": "{\"production_score\": 8}"
/// }
/// ```
pub struct ScriptedProviderFactory;

impl ProviderFactory for ScriptedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(ScriptedProvider::from_json(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        ScriptedProvider::from_json(config).map(|_| ())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "steps": [] })
    }

    fn description(&self) -> &'static str {
        "Replays canned responses for offline runs and tests"
    }
}
