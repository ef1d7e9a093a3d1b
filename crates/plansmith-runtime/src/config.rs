//! Pipeline configuration.
//!
//! Loaded from YAML or JSON. Durations are human-readable (`"20s"`,
//! `"250ms"`). Every field has a default, so an empty document is valid.

use std::path::Path;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use plansmith_core::SCORE_MAX;

use crate::providers::CompletionConfig;

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Delay schedule before re-issuing a generation call after a transport failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoff {
    #[serde(with = "duration_human")]
    pub min_delay: Duration,

    #[serde(with = "duration_human")]
    pub max_delay: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryBackoff {
    /// Delays for successive transport retries, bounded by `attempts`.
    pub fn delays(&self, attempts: u32) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(attempts as usize)
            .build()
    }
}

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model name passed to the provider
    pub model: String,

    /// Temperature for generate, repair and regenerate calls
    pub generation_temperature: f32,

    /// Temperature for critique and score calls
    pub review_temperature: f32,

    pub max_tokens: u32,

    /// Wait budget for every model call
    #[serde(with = "duration_human")]
    pub call_timeout: Duration,

    /// Maximum schema-repair attempts
    pub repair_ceiling: u32,

    /// Maximum low-score regeneration attempts
    pub regeneration_ceiling: u32,

    /// Minimum acceptable total score (0-10)
    pub quality_threshold: u8,

    pub retry_backoff: RetryBackoff,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "llama-3.1-8b-instant".to_string(),
            generation_temperature: 0.3,
            review_temperature: 0.2,
            max_tokens: 4096,
            call_timeout: Duration::from_secs(20),
            repair_ceiling: 2,
            regeneration_ceiling: 2,
            quality_threshold: 6,
            retry_backoff: RetryBackoff::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse from YAML (JSON is valid YAML) and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("generation_temperature", self.generation_temperature),
            ("review_temperature", self.review_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} is outside 0.0-2.0", value),
                });
            }
        }

        if self.call_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "call_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                field: "max_tokens",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.quality_threshold > SCORE_MAX {
            return Err(ConfigError::Invalid {
                field: "quality_threshold",
                reason: format!("{} exceeds the {} point scale", self.quality_threshold, SCORE_MAX),
            });
        }

        if self.retry_backoff.min_delay > self.retry_backoff.max_delay {
            return Err(ConfigError::Invalid {
                field: "retry_backoff",
                reason: "min_delay is greater than max_delay".to_string(),
            });
        }

        Ok(())
    }

    /// Call settings for generation-class passes.
    pub fn generation_call(&self) -> CompletionConfig {
        self.completion(self.generation_temperature)
    }

    /// Call settings for critique and score passes.
    pub fn review_call(&self) -> CompletionConfig {
        self.completion(self.review_temperature)
    }

    fn completion(&self, temperature: f32) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature,
            timeout: self.call_timeout,
        }
    }
}

mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
