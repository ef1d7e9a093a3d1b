//! Model gateway: one bounded model call, no retries.

use std::sync::Arc;
use std::time::Instant;

use plansmith_core::PassKind;

use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError};

/// A single request to the model gateway.
#[derive(Debug, Clone)]
pub struct ModelCall {
    /// Pass the call belongs to, for logs
    pub pass: PassKind,
    pub messages: Vec<ChatMessage>,
    pub config: CompletionConfig,
}

/// Wraps a provider and enforces the per-call wait budget.
///
/// The budget is applied here as well as passed to the provider, so a
/// provider that ignores it still cannot stall a run.
#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Issue one call. Fails with `Timeout` once the budget is spent.
    pub async fn call(&self, call: ModelCall) -> Result<CompletionResponse, ProviderError> {
        let budget = call.config.timeout;
        let started = Instant::now();

        let result = tokio::time::timeout(
            budget,
            self.provider.complete(call.messages, &call.config),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout(budget)));

        match &result {
            Ok(response) => tracing::debug!(
                pass = %call.pass,
                provider = self.provider.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                "model call completed"
            ),
            Err(e) => tracing::warn!(
                pass = %call.pass,
                provider = self.provider.name(),
                error = %e,
                "model call failed"
            ),
        }

        result
    }
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("provider", &self.provider.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptStep, ScriptedProvider};
    use std::time::Duration;

    fn call(timeout: Duration) -> ModelCall {
        ModelCall {
            pass: PassKind::Generate,
            messages: vec![ChatMessage::user("plan")],
            config: CompletionConfig {
                timeout,
                ..CompletionConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn test_call_passes_through() {
        let gateway = ModelGateway::new(Arc::new(ScriptedProvider::repeating(ScriptStep::text(
            "{}",
        ))));
        let response = gateway.call(call(Duration::from_secs(1))).await.unwrap();
        assert_eq!(response.content, "{}");
        assert_eq!(gateway.provider_name(), "scripted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = ScriptedProvider::repeating(ScriptStep::text("{}"))
            .with_delay(Duration::from_secs(60));
        let gateway = ModelGateway::new(Arc::new(provider));

        let result = gateway.call(call(Duration::from_secs(20))).await;
        assert_eq!(
            result.unwrap_err(),
            ProviderError::Timeout(Duration::from_secs(20))
        );
    }
}
