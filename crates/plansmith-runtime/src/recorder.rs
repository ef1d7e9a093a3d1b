//! Run recorder: owns the append-only trace of one pipeline run.
//!
//! Usage:
//! 1. [`RunRecorder::start`] when the run begins.
//! 2. [`RunRecorder::begin`] before each pass, [`RunRecorder::record`] after it.
//! 3. [`RunRecorder::finish`] to hand the trace and usage to the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

use plansmith_core::{
    LlmUsage, PassKind, PassOutcome, PassRecord, PipelineState, PipelineStatus, RunTrace,
};

use crate::providers::CompletionResponse;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique run identifier.
pub fn new_run_id() -> String {
    let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{}-{}", Utc::now().format("%Y%m%dT%H%M%S%3f"), seq)
}

/// Start marker for a pass in progress.
#[derive(Debug, Clone, Copy)]
pub struct PassStart {
    pass: PassKind,
    started_at: DateTime<Utc>,
    instant: Instant,
}

impl PassStart {
    pub fn pass(&self) -> PassKind {
        self.pass
    }
}

/// What the recorder hands back when a run ends.
#[derive(Debug, Clone)]
pub struct Recording {
    pub run_id: String,
    pub trace: RunTrace,
    pub usage: LlmUsage,
    pub duration_ms: u64,
}

/// Accumulates pass records and token usage for one run.
#[derive(Debug)]
pub struct RunRecorder {
    run_id: String,
    trace: RunTrace,
    usage: LlmUsage,
    started: Instant,
}

impl RunRecorder {
    pub fn start(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        tracing::info!(run_id = %run_id, "pipeline run started");
        Self {
            run_id,
            trace: RunTrace::new(),
            usage: LlmUsage::default(),
            started: Instant::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Mark the start of a pass.
    pub fn begin(&self, pass: PassKind) -> PassStart {
        PassStart {
            pass,
            started_at: Utc::now(),
            instant: Instant::now(),
        }
    }

    /// Append the record for a finished pass.
    pub fn record(
        &mut self,
        start: PassStart,
        outcome: PassOutcome,
        next: PipelineState,
    ) -> &PassRecord {
        let attempt = self.trace.count(start.pass) as u32 + 1;
        let record = self.trace.append(PassRecord {
            sequence: 0,
            pass: start.pass,
            attempt,
            started_at: start.started_at,
            duration_ms: start.instant.elapsed().as_millis() as u64,
            outcome,
            next,
        });

        tracing::info!(
            run_id = %self.run_id,
            sequence = record.sequence,
            pass = %record.pass,
            attempt = record.attempt,
            outcome = record.outcome.label(),
            next = ?record.next,
            duration_ms = record.duration_ms,
            "pass recorded"
        );

        record
    }

    /// Count a gateway response toward run usage.
    pub fn add_usage(&mut self, response: &CompletionResponse) {
        self.usage.add(
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
            &response.model,
        );
    }

    pub fn trace(&self) -> &RunTrace {
        &self.trace
    }

    pub fn finish(self, status: PipelineStatus) -> Recording {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %self.run_id,
            status = %status,
            passes = self.trace.len(),
            llm_calls = self.usage.llm_calls,
            total_tokens = self.usage.total_tokens,
            duration_ms,
            "pipeline run finished"
        );

        Recording {
            run_id: self.run_id,
            trace: self.trace,
            usage: self.usage,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TokenUsage;

    #[test]
    fn test_attempts_counted_per_pass() {
        let mut recorder = RunRecorder::start("run-test");

        let start = recorder.begin(PassKind::Repair);
        recorder.record(start, PassOutcome::Cancelled, PipelineState::Repairing);
        let start = recorder.begin(PassKind::Critique);
        recorder.record(start, PassOutcome::Critiqued { findings: 0 }, PipelineState::Scoring);
        let start = recorder.begin(PassKind::Repair);
        let record = recorder.record(start, PassOutcome::Cancelled, PipelineState::Finalizing);

        assert_eq!(record.attempt, 2);
        assert_eq!(record.sequence, 3);
    }

    #[test]
    fn test_finish_hands_over_usage() {
        let mut recorder = RunRecorder::start("run-usage");
        recorder.add_usage(&CompletionResponse {
            content: String::new(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            model: "llama-3.1-8b-instant".to_string(),
            stop_reason: None,
        });

        let recording = recorder.finish(PipelineStatus::Succeeded);
        assert_eq!(recording.run_id, "run-usage");
        assert_eq!(recording.usage.total_tokens, 15);
        assert_eq!(recording.usage.llm_calls, 1);
        assert!(recording.trace.is_empty());
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }
}
