//! Critique pass: model self-review of a schema-valid candidate.
//!
//! Critique is enrichment, not a gate. Any failure, whether the gateway
//! errors or the reply is not a critique, yields an absent report and the
//! run carries on to scoring.

use serde_json::Value;

use plansmith_core::{extract, CritiqueReport, PassKind};

use crate::gateway::{ModelCall, ModelGateway};
use crate::prompts;
use crate::providers::{CompletionConfig, CompletionResponse};

/// Result of one review call.
#[derive(Debug, Clone)]
pub struct Review<T> {
    pub outcome: T,

    /// Raw gateway response, when the call returned one
    pub response: Option<CompletionResponse>,
}

/// What the critique pass produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CritiqueOutcome {
    Present(CritiqueReport),
    Absent { reason: String },
}

impl CritiqueOutcome {
    pub fn report(&self) -> Option<&CritiqueReport> {
        match self {
            CritiqueOutcome::Present(report) => Some(report),
            CritiqueOutcome::Absent { .. } => None,
        }
    }
}

/// Issues the self-review call.
#[derive(Debug, Clone)]
pub struct CritiquePass {
    gateway: ModelGateway,
    call: CompletionConfig,
}

impl CritiquePass {
    pub fn new(gateway: ModelGateway, call: CompletionConfig) -> Self {
        Self { gateway, call }
    }

    pub async fn run(&self, document: &Value) -> Review<CritiqueOutcome> {
        let call = ModelCall {
            pass: PassKind::Critique,
            messages: prompts::critique_messages(document),
            config: self.call.clone(),
        };

        let response = match self.gateway.call(call).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "critique call failed, continuing without critique");
                return Review {
                    outcome: CritiqueOutcome::Absent {
                        reason: e.to_string(),
                    },
                    response: None,
                };
            }
        };

        let outcome = match extract(&response.content).into_document() {
            None => CritiqueOutcome::Absent {
                reason: "critique response held no JSON object".to_string(),
            },
            Some(value) => match CritiqueReport::from_value(&value) {
                Ok(report) => CritiqueOutcome::Present(report),
                Err(e) => CritiqueOutcome::Absent {
                    reason: e.to_string(),
                },
            },
        };

        if let CritiqueOutcome::Absent { reason } = &outcome {
            tracing::warn!(reason = %reason, "critique unusable, continuing without critique");
        }

        Review {
            outcome,
            response: Some(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptStep, ScriptedFailure, ScriptedProvider};
    use serde_json::json;
    use std::sync::Arc;

    fn pass(step: ScriptStep) -> CritiquePass {
        let provider = Arc::new(ScriptedProvider::repeating(step));
        CritiquePass::new(ModelGateway::new(provider), CompletionConfig::default())
    }

    #[tokio::test]
    async fn test_prose_wrapped_critique() {
        let review = pass(ScriptStep::text(
            r#"My review: {"weaknesses": ["thin tests"], "overall_score": "7/10"}"#,
        ))
        .run(&json!({}))
        .await;

        let report = review.outcome.report().unwrap();
        assert_eq!(report.total_findings(), 1);
        assert_eq!(report.overall_score, Some(7));
        assert!(review.response.is_some());
    }

    #[tokio::test]
    async fn test_gateway_failure_is_absent() {
        let review = pass(ScriptStep::failure(ScriptedFailure::Timeout))
            .run(&json!({}))
            .await;
        assert!(matches!(review.outcome, CritiqueOutcome::Absent { .. }));
        assert!(review.response.is_none());
    }

    #[tokio::test]
    async fn test_garbage_is_absent() {
        let review = pass(ScriptStep::text("Looks great to me!")).run(&json!({})).await;
        assert!(review.outcome.report().is_none());
        assert!(review.response.is_some());
    }

    #[tokio::test]
    async fn test_unrelated_json_is_absent() {
        let review = pass(ScriptStep::text(r#"{"verdict": "ship it"}"#))
            .run(&json!({}))
            .await;
        assert_eq!(
            review.outcome,
            CritiqueOutcome::Absent {
                reason: "Critique response has none of the known categories".to_string()
            }
        );
    }
}
