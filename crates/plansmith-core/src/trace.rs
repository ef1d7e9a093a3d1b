//! Run trace types.
//!
//! A run trace is the ordered, append-only list of [`PassRecord`]s written
//! while a pipeline run executes. Records are never edited once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::{ExtractionFailure, ExtractionTier};
use crate::schema::Violation;

/// Model-facing passes a run can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// First generation call
    Generate,
    /// Generation call carrying schema violations
    Repair,
    /// Generation call carrying critique and score feedback
    Regenerate,
    Critique,
    Score,
    /// Run stopped at a pass boundary
    Cancelled,
}

impl PassKind {
    /// Whether the pass produces a candidate document.
    pub fn is_generation(self) -> bool {
        matches!(
            self,
            PassKind::Generate | PassKind::Repair | PassKind::Regenerate
        )
    }
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PassKind::Generate => "generate",
            PassKind::Repair => "repair",
            PassKind::Regenerate => "regenerate",
            PassKind::Critique => "critique",
            PassKind::Score => "score",
            PassKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Generating,
    Extracting,
    SchemaChecking,
    Repairing,
    Critiquing,
    Scoring,
    Regenerating,
    Finalizing,
    FatalError,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Finalizing | PipelineState::FatalError)
    }
}

/// What happened during one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutcome {
    /// A document was extracted and checked against the contract.
    Candidate {
        tier: ExtractionTier,
        valid: bool,
        violations: Vec<Violation>,
    },

    /// The response held no parsable document.
    ExtractionFailed { failure: ExtractionFailure },

    /// The model gateway call itself failed.
    GatewayFailed { error: String, retriable: bool },

    Critiqued { findings: usize },

    /// Critique failed; the run continues without it.
    CritiqueAbsent { reason: String },

    Scored { total: u8, threshold: u8 },

    /// Score response unusable; the candidate is accepted as is.
    ScoreUnknown { reason: String },

    Cancelled,
}

impl PassOutcome {
    /// Whether the pass did what it set out to do.
    pub fn is_success(&self) -> bool {
        match self {
            PassOutcome::Candidate { valid, .. } => *valid,
            PassOutcome::Critiqued { .. } => true,
            PassOutcome::Scored { total, threshold } => total >= threshold,
            _ => false,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            PassOutcome::Candidate { valid: true, .. } => "valid_candidate",
            PassOutcome::Candidate { valid: false, .. } => "invalid_candidate",
            PassOutcome::ExtractionFailed { .. } => "extraction_failed",
            PassOutcome::GatewayFailed { .. } => "gateway_failed",
            PassOutcome::Critiqued { .. } => "critiqued",
            PassOutcome::CritiqueAbsent { .. } => "critique_absent",
            PassOutcome::Scored { .. } => "scored",
            PassOutcome::ScoreUnknown { .. } => "score_unknown",
            PassOutcome::Cancelled => "cancelled",
        }
    }
}

/// One entry in the run trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    /// Position in the trace, starting at 1
    pub sequence: u32,

    pub pass: PassKind,

    /// Attempt number within this pass kind, starting at 1
    pub attempt: u32,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,

    pub outcome: PassOutcome,

    /// State the controller moved to after this pass
    pub next: PipelineState,
}

/// Ordered, append-only pass history of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTrace {
    records: Vec<PassRecord>,
}

impl RunTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning its sequence number.
    pub fn append(&mut self, mut record: PassRecord) -> &PassRecord {
        record.sequence = self.records.len() as u32 + 1;
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[PassRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&PassRecord> {
        self.records.last()
    }

    /// Number of records of one pass kind.
    pub fn count(&self, pass: PassKind) -> usize {
        self.records.iter().filter(|r| r.pass == pass).count()
    }

    /// Whether any scoring pass ended with an unknown score.
    pub fn score_unknown(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r.outcome, PassOutcome::ScoreUnknown { .. }))
    }
}
