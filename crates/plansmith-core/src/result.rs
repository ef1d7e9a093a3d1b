//! Terminal pipeline artifact.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::critique::CritiqueReport;
use crate::score::ScoreReport;
use crate::trace::RunTrace;
use crate::usage::LlmUsage;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// A schema-valid document cleared the quality gate, or scoring was unavailable.
    Succeeded,
    /// A ceiling ran out; the best candidate so far is attached.
    ExhaustedRetries,
    /// The model gateway was unusable.
    FatalError,
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStatus::Succeeded => "succeeded",
            PipelineStatus::ExhaustedRetries => "exhausted_retries",
            PipelineStatus::FatalError => "fatal_error",
            PipelineStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Run metadata attached to the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,

    pub model_used: String,

    /// Generation temperature
    pub temperature: f32,

    pub review_temperature: f32,

    /// Contract the document was checked against
    pub schema: String,

    pub repair_attempts: u32,

    pub regeneration_attempts: u32,

    pub duration_ms: u64,

    pub usage: LlmUsage,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,

    /// Final candidate; may be invalid or low-scored when retries ran out
    pub document: Option<Value>,

    /// Whether `document` passed the schema contract
    pub document_valid: bool,

    pub critique: Option<CritiqueReport>,

    pub score: Option<ScoreReport>,

    pub trace: RunTrace,

    pub meta: RunMeta,

    /// Reason for a fatal or cancelled ending
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// Whether any low-score regeneration took place.
    pub fn auto_regeneration_applied(&self) -> bool {
        self.meta.regeneration_attempts > 0
    }

    /// Outbound document: the candidate's own fields plus review and run metadata.
    pub fn to_response_json(&self) -> Value {
        let meta = json!({
            "model_used": self.meta.model_used,
            "temperature": self.meta.temperature,
            "multi_pass": true,
            "schema_enforced": self.document_valid,
            "auto_regeneration_applied": self.auto_regeneration_applied(),
            "status": self.status.to_string(),
            "repair_attempts": self.meta.repair_attempts,
            "regeneration_attempts": self.meta.regeneration_attempts,
            "score_unknown": self.trace.score_unknown(),
            "run_id": self.meta.run_id,
            "duration_ms": self.meta.duration_ms,
            "usage": self.meta.usage,
        });

        if self.status == PipelineStatus::FatalError {
            return json!({
                "error": self.error.clone().unwrap_or_else(|| "model gateway unavailable".to_string()),
                "meta": meta,
                "trace": self.trace,
            });
        }

        let mut out = match &self.document {
            Some(Value::Object(fields)) => fields.clone(),
            _ => Map::new(),
        };

        if let Some(error) = &self.error {
            out.insert("error".to_string(), json!(error));
        } else if self.document.is_none() {
            out.insert("error".to_string(), json!("no structured document produced"));
        }
        out.insert("ai_self_critique".to_string(), json!(self.critique));
        out.insert("engineering_review".to_string(), json!(self.score));
        out.insert("meta".to_string(), meta);
        out.insert("trace".to_string(), json!(self.trace));

        Value::Object(out)
    }
}
