//! API keys for HTTP providers.
//!
//! Keys are held in a [`SecretString`] from the moment they are read and are
//! redacted in `Debug` and `Display`. Each endpoint describes where its key
//! lives with a [`CredentialLookup`]; blank values count as missing.
//!
//! ```ignore
//! const GROQ_KEY: CredentialLookup = CredentialLookup::api_key("GROQ_API_KEY", "Groq API key");
//! let key = GROQ_KEY.resolve(&provider_config)?;
//! request.bearer_auth(key.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a key was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider configuration JSON
    Config,
    /// Environment variable
    Environment,
    /// Passed in by code
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
            CredentialSource::Programmatic => "programmatic",
        })
    }
}

/// Config key and environment variable that may hold one endpoint's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialLookup {
    pub config_key: &'static str,
    pub env_var: &'static str,
    /// Human name used in errors and logs
    pub label: &'static str,
}

impl CredentialLookup {
    /// Lookup under the conventional `api_key` config field.
    pub const fn api_key(env_var: &'static str, label: &'static str) -> Self {
        Self {
            config_key: "api_key",
            env_var,
            label,
        }
    }

    /// Find the key, preferring provider config over the environment.
    pub fn resolve(&self, config: &JsonValue) -> Result<ApiCredential, ProviderError> {
        if let Some(value) = self.in_config(config) {
            return Ok(ApiCredential::new(value, CredentialSource::Config, self.label));
        }
        if let Some(value) = self.in_env() {
            return Ok(ApiCredential::new(value, CredentialSource::Environment, self.label));
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in provider config or the {} environment variable",
            self.label, self.config_key, self.env_var
        )))
    }

    /// Whether [`resolve`](Self::resolve) would succeed.
    pub fn is_available(&self, config: &JsonValue) -> bool {
        self.in_config(config).is_some() || self.in_env().is_some()
    }

    fn in_config<'a>(&self, config: &'a JsonValue) -> Option<&'a str> {
        config[self.config_key]
            .as_str()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn in_env(&self) -> Option<String> {
        std::env::var(self.env_var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// An API key that never prints.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            label,
        }
    }

    /// The raw key. Call only where it is sent upstream.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().trim().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("label", &self.label)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.label, self.source)
    }
}
