//! OpenAI-compatible chat completions provider.
//!
//! Serves both Groq (`https://api.groq.com/openai/v1`) and OpenAI, which
//! share the same wire format.

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialLookup, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for the Groq API key.
pub const GROQ_API_KEY_ENV: &str = "GROQ_API_KEY";

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Upstream error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 500;

/// Provider speaking the `/chat/completions` protocol.
pub struct OpenAiCompatProvider {
    name: &'static str,
    credential: ApiCredential,
    base_url: String,
    /// Overrides the pipeline's model when set
    model: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Create a provider for a compatible endpoint.
    pub fn new(
        name: &'static str,
        credential: ApiCredential,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            name,
            credential,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: None,
            client,
        })
    }

    /// Groq endpoint with an explicit key.
    pub fn groq(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            "groq",
            ApiCredential::new(api_key, CredentialSource::Programmatic, "Groq API key"),
            GROQ_BASE_URL,
        )
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn from_config(endpoint: &Endpoint, config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = endpoint.credential.resolve(config)?;
        let base_url = config["base_url"].as_str().unwrap_or(endpoint.base_url);

        let mut provider = Self::new(endpoint.name, credential, base_url)?;
        if let Some(model) = config["model"].as_str() {
            provider = provider.with_model(model);
        }
        Ok(provider)
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

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let model = self.model.as_deref().unwrap_or(&config.model);
        let request = ChatRequest {
            model,
            messages: &messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        // Only expose the credential here, at the point of use
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 401 || status == 403 {
            return Err(ProviderError::Auth);
        }

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response has no choices".to_string()))?;

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
            model: body.model.unwrap_or_else(|| model.to_string()),
            stop_reason: choice.finish_reason,
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Fixed facts about one compatible endpoint.
struct Endpoint {
    name: &'static str,
    credential: CredentialLookup,
    base_url: &'static str,
    default_model: &'static str,
}

const GROQ: Endpoint = Endpoint {
    name: "groq",
    credential: CredentialLookup::api_key(GROQ_API_KEY_ENV, "Groq API key"),
    base_url: GROQ_BASE_URL,
    default_model: "llama-3.1-8b-instant",
};

const OPENAI: Endpoint = Endpoint {
    name: "openai",
    credential: CredentialLookup::api_key(OPENAI_API_KEY_ENV, "OpenAI API key"),
    base_url: OPENAI_BASE_URL,
    default_model: "gpt-4o-mini",
};

fn validate_endpoint_config(endpoint: &Endpoint, config: &JsonValue) -> Result<(), ProviderError> {
    if !endpoint.credential.is_available(config) {
        return Err(ProviderError::NotConfigured(format!(
            "{} required: set 'api_key' in config or {} env",
            endpoint.credential.label, endpoint.credential.env_var
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

/// Factory for Groq providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "gsk_...",          // Optional, falls back to GROQ_API_KEY env
///   "base_url": "https://...",     // Optional, custom endpoint
///   "model": "llama-3.1-8b-instant" // Optional, overrides the pipeline model
/// }
/// ```
pub struct GroqProviderFactory;

impl ProviderFactory for GroqProviderFactory {
    fn provider_type(&self) -> &'static str {
        GROQ.name
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiCompatProvider::from_config(&GROQ, config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        validate_endpoint_config(&GROQ, config)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": GROQ.base_url, "model": GROQ.default_model })
    }

    fn description(&self) -> &'static str {
        "Groq chat completions (OpenAI-compatible)"
    }
}

/// Factory for OpenAI providers. Same configuration format as Groq,
/// with `OPENAI_API_KEY` as the environment fallback.
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        OPENAI.name
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiCompatProvider::from_config(&OPENAI, config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        validate_endpoint_config(&OPENAI, config)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": OPENAI.base_url, "model": OPENAI.default_model })
    }

    fn description(&self) -> &'static str {
        "OpenAI chat completions"
    }
}
