//! Inbound generation request.
//!
//! A request is built once per pipeline run from caller input and is never
//! mutated afterwards. Validation happens here, before the pipeline starts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on any single request field, in characters.
pub const MAX_FIELD_CHARS: usize = 4_000;

/// Errors raised when an inbound request is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field '{field}' is too long ({length} chars, max {max})")]
    FieldTooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    #[error("Failed to parse request: {0}")]
    Malformed(String),
}

/// What the caller wants an engineering plan for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Free-text goal (e.g. "Build a real-time chat app")
    pub goal: String,

    /// Target technology stack
    pub stack: String,

    /// Experience level of the person building it
    #[serde(default)]
    pub experience: String,

    /// Delivery constraints (deadlines, budget, hosting)
    #[serde(default)]
    pub constraints: String,
}

impl GenerationRequest {
    /// Build and validate a request.
    pub fn new(
        goal: impl Into<String>,
        stack: impl Into<String>,
        experience: impl Into<String>,
        constraints: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let request = Self {
            goal: goal.into(),
            stack: stack.into(),
            experience: experience.into(),
            constraints: constraints.into(),
        };
        request.validate()?;
        Ok(request)
    }

    /// Parse a request from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, RequestError> {
        let request: GenerationRequest =
            serde_json::from_str(json).map_err(|e| RequestError::Malformed(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Check required fields and length limits.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.goal.trim().is_empty() {
            return Err(RequestError::MissingField("goal"));
        }
        if self.stack.trim().is_empty() {
            return Err(RequestError::MissingField("stack"));
        }

        for (field, value) in self.fields() {
            let length = value.chars().count();
            if length > MAX_FIELD_CHARS {
                return Err(RequestError::FieldTooLong {
                    field,
                    length,
                    max: MAX_FIELD_CHARS,
                });
            }
        }

        Ok(())
    }

    /// Named fields in prompt order.
    pub fn fields(&self) -> [(&'static str, &str); 4] {
        [
            ("goal", self.goal.as_str()),
            ("stack", self.stack.as_str()),
            ("experience", self.experience.as_str()),
            ("constraints", self.constraints.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let request = GenerationRequest::new(
            "Build a real-time chat app",
            "Python FastAPI, PostgreSQL, Redis, WebSockets",
            "5 years backend",
            "deploy in 2 weeks",
        )
        .unwrap();
        assert_eq!(request.goal, "Build a real-time chat app");
    }

    #[test]
    fn test_blank_goal_rejected() {
        let result = GenerationRequest::new("   ", "Rust", "", "");
        assert_eq!(result, Err(RequestError::MissingField("goal")));
    }

    #[test]
    fn test_missing_stack_rejected() {
        let result = GenerationRequest::from_json(r#"{"goal": "CLI tool", "stack": ""}"#);
        assert_eq!(result, Err(RequestError::MissingField("stack")));
    }

    #[test]
    fn test_optional_fields_default_empty() {
        let request = GenerationRequest::from_json(r#"{"goal": "CLI tool", "stack": "Rust"}"#)
            .unwrap();
        assert!(request.experience.is_empty());
        assert!(request.constraints.is_empty());
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = GenerationRequest::from_json("{not json");
        assert!(matches!(result, Err(RequestError::Malformed(_))));
    }

    #[test]
    fn test_oversized_field_rejected() {
        let long = "x".repeat(MAX_FIELD_CHARS + 1);
        let result = GenerationRequest::new("goal", "stack", "", long);
        assert!(matches!(
            result,
            Err(RequestError::FieldTooLong { field: "constraints", .. })
        ));
    }
}
