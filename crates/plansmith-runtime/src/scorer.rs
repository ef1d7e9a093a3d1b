//! Quality scorer: rates a schema-valid candidate on fixed dimensions.
//!
//! An unusable score response makes the score unknown, never zero.

use serde_json::Value;

use plansmith_core::{extract, CritiqueReport, PassKind, ScoreReport};

use crate::critique::Review;
use crate::gateway::{ModelCall, ModelGateway};
use crate::prompts;
use crate::providers::CompletionConfig;

/// What the scoring pass produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Known(ScoreReport),
    Unknown { reason: String },
}

impl ScoreOutcome {
    pub fn report(&self) -> Option<&ScoreReport> {
        match self {
            ScoreOutcome::Known(report) => Some(report),
            ScoreOutcome::Unknown { .. } => None,
        }
    }
}

/// Issues the scoring call.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    gateway: ModelGateway,
    call: CompletionConfig,
}

impl QualityScorer {
    pub fn new(gateway: ModelGateway, call: CompletionConfig) -> Self {
        Self { gateway, call }
    }

    pub async fn run(
        &self,
        document: &Value,
        critique: Option<&CritiqueReport>,
    ) -> Review<ScoreOutcome> {
        let call = ModelCall {
            pass: PassKind::Score,
            messages: prompts::score_messages(document, critique),
            config: self.call.clone(),
        };

        let response = match self.gateway.call(call).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "score call failed, score unknown");
                return Review {
                    outcome: ScoreOutcome::Unknown {
                        reason: e.to_string(),
                    },
                    response: None,
                };
            }
        };

        let outcome = match extract(&response.content).into_document() {
            None => ScoreOutcome::Unknown {
                reason: "score response held no JSON object".to_string(),
            },
            Some(value) => match ScoreReport::from_value(&value) {
                Ok(report) => ScoreOutcome::Known(report),
                Err(e) => ScoreOutcome::Unknown {
                    reason: e.to_string(),
                },
            },
        };

        if let ScoreOutcome::Unknown { reason } = &outcome {
            tracing::warn!(reason = %reason, "score unusable, score unknown");
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
    use crate::providers::{ScriptStep, ScriptedProvider};
    use serde_json::json;
    use std::sync::Arc;

    fn scorer(provider: Arc<ScriptedProvider>) -> QualityScorer {
        QualityScorer::new(ModelGateway::new(provider), CompletionConfig::default())
    }

    #[tokio::test]
    async fn test_known_score() {
        let provider = Arc::new(ScriptedProvider::repeating(ScriptStep::text(
            r#"{"production_score": "8/10", "security_score": 7, "architecture_score": "8",
                "specificity_score": 9, "overall_engineering_score": "8/10"}"#,
        )));
        let review = scorer(provider).run(&json!({}), None).await;

        let report = review.outcome.report().unwrap();
        assert_eq!(report.total, 8);
    }

    #[tokio::test]
    async fn test_out_of_range_is_unknown() {
        let provider = Arc::new(ScriptedProvider::repeating(ScriptStep::text(
            r#"{"production_score": 80, "security_score": 7, "architecture_score": 8,
                "specificity_score": 9}"#,
        )));
        let review = scorer(provider).run(&json!({}), None).await;
        assert!(matches!(review.outcome, ScoreOutcome::Unknown { .. }));
    }

    #[tokio::test]
    async fn test_critique_feeds_score_prompt() {
        let provider = Arc::new(ScriptedProvider::repeating(ScriptStep::text("no idea")));
        let critique =
            CritiqueReport::from_value(&json!({"weaknesses": ["no rollback plan"]})).unwrap();

        let review = scorer(provider.clone())
            .run(&json!({"risks": []}), Some(&critique))
            .await;

        assert!(review.outcome.report().is_none());
        assert!(provider.calls()[0].prompt_text().contains("no rollback plan"));
    }
}
