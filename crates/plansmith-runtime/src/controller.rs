//! Regeneration controller: the state machine that drives one pipeline run.
//!
//! ```text
//! Generating -> Extracting -> SchemaChecking -> Critiquing -> Scoring -> Finalizing
//!                   |               |                            |
//!                   +--> Repairing <+                            +--> Regenerating
//!                        (repair ceiling)                             (regeneration ceiling)
//! ```
//!
//! Repair and regeneration attempts are counted against separate ceilings.
//! Passes run strictly in sequence; each run owns all of its state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::Instrument;

use plansmith_core::{
    extract, validate, CritiqueReport, Extraction, ExtractionFailure, ExtractionTier,
    GenerationRequest, PassKind, PassOutcome, PipelineResult, PipelineState, PipelineStatus,
    RunMeta, SchemaContract, SchemaError, ScoreReport,
};

use crate::cancel::{Cancellable, CancellationToken};
use crate::config::{ConfigError, PipelineConfig};
use crate::critique::{CritiqueOutcome, CritiquePass};
use crate::gateway::{ModelCall, ModelGateway};
use crate::prompts;
use crate::providers::{ChatMessage, LlmProvider, ProviderError};
use crate::recorder::{new_run_id, PassStart, RunRecorder};
use crate::scorer::{QualityScorer, ScoreOutcome};

/// Errors from building a controller.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No model provider configured")]
    MissingProvider,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Attempt counters, each bounded by its own ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Budget {
    repair_ceiling: u32,
    regeneration_ceiling: u32,
    repairs: u32,
    regenerations: u32,
}

impl Budget {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            repair_ceiling: config.repair_ceiling,
            regeneration_ceiling: config.regeneration_ceiling,
            repairs: 0,
            regenerations: 0,
        }
    }

    fn take_repair(&mut self) -> bool {
        if self.repairs < self.repair_ceiling {
            self.repairs += 1;
            true
        } else {
            false
        }
    }

    fn take_regeneration(&mut self) -> bool {
        if self.regenerations < self.regeneration_ceiling {
            self.regenerations += 1;
            true
        } else {
            false
        }
    }
}

/// A schema-valid candidate and the reviews it received.
#[derive(Debug, Clone)]
struct ReviewedCandidate {
    document: Value,
    critique: Option<CritiqueReport>,
    score: Option<ScoreReport>,
}

/// Mutable state of one run. Never shared between runs.
struct RunState {
    budget: Budget,
    status: Option<PipelineStatus>,
    error: Option<String>,

    /// Generation-class pass whose record is written once checking ends
    open_pass: Option<PassStart>,

    /// Latest raw generation output
    raw: Option<String>,

    /// Document extracted by the open pass
    extracted: Option<(ExtractionTier, Value)>,

    /// What the last candidate got wrong, for the next repair prompt
    problems: String,

    latest_extracted: Option<Value>,

    /// Schema-valid candidates in the order they were produced
    reviewed: Vec<ReviewedCandidate>,

    delays: Box<dyn Iterator<Item = Duration> + Send>,
    pending_delay: Option<Duration>,
}

impl RunState {
    fn new(config: &PipelineConfig) -> Self {
        let transport_retries = config.repair_ceiling + config.regeneration_ceiling;
        Self {
            budget: Budget::new(config),
            status: None,
            error: None,
            open_pass: None,
            raw: None,
            extracted: None,
            problems: String::new(),
            latest_extracted: None,
            reviewed: Vec::new(),
            delays: Box::new(config.retry_backoff.delays(transport_retries)),
            pending_delay: None,
        }
    }

    fn finalize(&mut self, status: PipelineStatus) -> PipelineState {
        self.status = Some(status);
        match status {
            PipelineStatus::FatalError => PipelineState::FatalError,
            _ => PipelineState::Finalizing,
        }
    }

    /// Best candidate for a run that did not succeed: the highest-scored
    /// schema-valid candidate (later wins ties), else the latest extracted one.
    fn best_effort(&self) -> (Option<Value>, bool, Option<CritiqueReport>, Option<ScoreReport>) {
        let best = self
            .reviewed
            .iter()
            .max_by_key(|c| c.score.as_ref().map(|s| s.total));

        match best {
            Some(c) => (Some(c.document.clone()), true, c.critique.clone(), c.score.clone()),
            None => (self.latest_extracted.clone(), false, None, None),
        }
    }
}

/// Drives generate, repair, critique, score and regenerate passes for one request.
pub struct RegenerationController {
    gateway: ModelGateway,
    critique: CritiquePass,
    scorer: QualityScorer,
    contract: Arc<SchemaContract>,
    config: PipelineConfig,
}

impl std::fmt::Debug for RegenerationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegenerationController")
            .field("gateway", &self.gateway)
            .field("contract", &self.contract.name())
            .field("config", &self.config)
            .finish()
    }
}

impl RegenerationController {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn contract(&self) -> &SchemaContract {
        &self.contract
    }

    /// Run the pipeline to completion.
    pub async fn run(&self, request: &GenerationRequest) -> PipelineResult {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run the pipeline, stopping at the next pass boundary once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &dyn Cancellable,
    ) -> PipelineResult {
        let run_id = new_run_id();
        let span = tracing::info_span!("pipeline_run", run_id = %run_id);
        self.execute(run_id, request, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: String,
        request: &GenerationRequest,
        cancel: &dyn Cancellable,
    ) -> PipelineResult {
        let mut recorder = RunRecorder::start(run_id);
        let mut run = RunState::new(&self.config);
        let mut state = PipelineState::Generating;

        while !state.is_terminal() {
            if issues_model_call(state) && cancel.is_cancelled() {
                tracing::warn!(state = ?state, "run cancelled at pass boundary");
                state = cancel_run(&mut run, &mut recorder);
                break;
            }

            state = match state {
                PipelineState::Generating => {
                    self.generation_pass(
                        PassKind::Generate,
                        request,
                        &mut run,
                        &mut recorder,
                        cancel,
                    )
                    .await
                }
                PipelineState::Repairing => {
                    self.generation_pass(
                        PassKind::Repair,
                        request,
                        &mut run,
                        &mut recorder,
                        cancel,
                    )
                    .await
                }
                PipelineState::Regenerating => {
                    self.generation_pass(
                        PassKind::Regenerate,
                        request,
                        &mut run,
                        &mut recorder,
                        cancel,
                    )
                    .await
                }
                PipelineState::Extracting => self.extracting(&mut run, &mut recorder),
                PipelineState::SchemaChecking => self.schema_checking(&mut run, &mut recorder),
                PipelineState::Critiquing => self.critiquing(&mut run, &mut recorder).await,
                PipelineState::Scoring => self.scoring(&mut run, &mut recorder).await,
                PipelineState::Finalizing | PipelineState::FatalError => state,
            };
        }

        self.assemble(run, recorder)
    }

    /// Issue a generate, repair or regenerate call.
    async fn generation_pass(
        &self,
        pass: PassKind,
        request: &GenerationRequest,
        run: &mut RunState,
        recorder: &mut RunRecorder,
        cancel: &dyn Cancellable,
    ) -> PipelineState {
        if let Some(delay) = run.pending_delay.take() {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
            tokio::time::sleep(delay).await;

            if cancel.is_cancelled() {
                tracing::warn!(pass = ?pass, "run cancelled during backoff");
                return cancel_run(run, recorder);
            }
        }

        let call = ModelCall {
            pass,
            messages: self.generation_messages(pass, request, run),
            config: self.config.generation_call(),
        };

        let start = recorder.begin(pass);
        match self.gateway.call(call).await {
            Ok(response) => {
                recorder.add_usage(&response);
                run.raw = Some(response.content);
                run.open_pass = Some(start);
                PipelineState::Extracting
            }
            Err(e) => {
                let next = self.after_gateway_failure(pass, &e, run);
                recorder.record(
                    start,
                    PassOutcome::GatewayFailed {
                        error: e.to_string(),
                        retriable: e.is_retriable(),
                    },
                    next,
                );
                next
            }
        }
    }

    fn generation_messages(
        &self,
        pass: PassKind,
        request: &GenerationRequest,
        run: &RunState,
    ) -> Vec<ChatMessage> {
        match (pass, run.raw.as_deref(), run.reviewed.last()) {
            (PassKind::Regenerate, _, Some(current)) => {
                let Some(score) = &current.score else {
                    return prompts::generation_messages(request, &self.contract);
                };
                prompts::regeneration_messages(
                    request,
                    &self.contract,
                    &current.document,
                    current.critique.as_ref(),
                    score,
                    self.config.quality_threshold,
                )
            }
            (PassKind::Repair, Some(raw), _) => {
                prompts::repair_messages(request, &self.contract, raw, &run.problems)
            }
            _ => prompts::generation_messages(request, &self.contract),
        }
    }

    /// Transport-class failures consume the ceiling of the phase they hit.
    fn after_gateway_failure(
        &self,
        pass: PassKind,
        error: &ProviderError,
        run: &mut RunState,
    ) -> PipelineState {
        if !error.is_retriable() {
            tracing::error!(error = %error, "non-retriable gateway failure");
            run.error = Some(error.to_string());
            return run.finalize(PipelineStatus::FatalError);
        }

        let retry = if pass == PassKind::Regenerate {
            run.budget
                .take_regeneration()
                .then_some(PipelineState::Regenerating)
        } else {
            run.budget.take_repair().then_some(PipelineState::Repairing)
        };

        match retry {
            Some(next) => {
                let backoff = run.delays.next();
                run.pending_delay = match error {
                    ProviderError::RateLimited {
                        retry_after: Some(after),
                    } => Some((*after).min(self.config.retry_backoff.max_delay)),
                    _ => backoff,
                };
                next
            }
            None if run.latest_extracted.is_some() => {
                run.finalize(PipelineStatus::ExhaustedRetries)
            }
            None => {
                run.error = Some(format!("model gateway unavailable: {}", error));
                run.finalize(PipelineStatus::FatalError)
            }
        }
    }

    fn after_invalid(&self, run: &mut RunState) -> PipelineState {
        if run.budget.take_repair() {
            PipelineState::Repairing
        } else {
            tracing::warn!(
                repairs = run.budget.repairs,
                "repair ceiling reached without a valid document"
            );
            run.finalize(PipelineStatus::ExhaustedRetries)
        }
    }

    fn extracting(&self, run: &mut RunState, recorder: &mut RunRecorder) -> PipelineState {
        let raw = run.raw.as_deref().unwrap_or_default();
        match extract(raw) {
            Extraction::Failed(failure) => {
                tracing::debug!(failure = %failure, "extraction failed");
                run.problems = format!(
                    "- no JSON object could be extracted ({}); respond with a single JSON object",
                    failure
                );
                let next = self.after_invalid(run);
                let start = take_open_pass(run, recorder);
                recorder.record(start, PassOutcome::ExtractionFailed { failure }, next);
                next
            }
            Extraction::Parsed(document) => {
                run.extracted = Some((ExtractionTier::Direct, document));
                PipelineState::SchemaChecking
            }
            Extraction::Recovered(document) => {
                tracing::debug!("document recovered from prose-wrapped response");
                run.extracted = Some((ExtractionTier::BraceScan, document));
                PipelineState::SchemaChecking
            }
        }
    }

    fn schema_checking(&self, run: &mut RunState, recorder: &mut RunRecorder) -> PipelineState {
        let start = take_open_pass(run, recorder);

        let Some((tier, document)) = run.extracted.take() else {
            let next = self.after_invalid(run);
            recorder.record(
                start,
                PassOutcome::ExtractionFailed {
                    failure: ExtractionFailure::Empty,
                },
                next,
            );
            return next;
        };

        let outcome = validate(Some(&document), &self.contract);
        run.latest_extracted = Some(document.clone());

        let next = if outcome.valid {
            run.reviewed.push(ReviewedCandidate {
                document,
                critique: None,
                score: None,
            });
            PipelineState::Critiquing
        } else {
            tracing::debug!(violations = outcome.violations.len(), "candidate failed schema check");
            run.problems = outcome.summary();
            self.after_invalid(run)
        };

        recorder.record(
            start,
            PassOutcome::Candidate {
                tier,
                valid: outcome.valid,
                violations: outcome.violations,
            },
            next,
        );
        next
    }

    async fn critiquing(&self, run: &mut RunState, recorder: &mut RunRecorder) -> PipelineState {
        let start = recorder.begin(PassKind::Critique);
        let Some(current) = run.reviewed.last_mut() else {
            recorder.record(
                start,
                PassOutcome::CritiqueAbsent {
                    reason: "no schema-valid candidate".to_string(),
                },
                PipelineState::Scoring,
            );
            return PipelineState::Scoring;
        };

        let review = self.critique.run(&current.document).await;
        if let Some(response) = &review.response {
            recorder.add_usage(response);
        }

        let outcome = match review.outcome {
            CritiqueOutcome::Present(report) => {
                let findings = report.total_findings();
                current.critique = Some(report);
                PassOutcome::Critiqued { findings }
            }
            CritiqueOutcome::Absent { reason } => PassOutcome::CritiqueAbsent { reason },
        };

        recorder.record(start, outcome, PipelineState::Scoring);
        PipelineState::Scoring
    }

    async fn scoring(&self, run: &mut RunState, recorder: &mut RunRecorder) -> PipelineState {
        let start = recorder.begin(PassKind::Score);
        let threshold = self.config.quality_threshold;

        let review = match run.reviewed.last() {
            Some(current) => {
                self.scorer
                    .run(&current.document, current.critique.as_ref())
                    .await
            }
            None => {
                let next = run.finalize(PipelineStatus::ExhaustedRetries);
                recorder.record(
                    start,
                    PassOutcome::ScoreUnknown {
                        reason: "no schema-valid candidate".to_string(),
                    },
                    next,
                );
                return next;
            }
        };
        if let Some(response) = &review.response {
            recorder.add_usage(response);
        }

        let (outcome, next) = match review.outcome {
            ScoreOutcome::Known(report) => {
                let total = report.total;
                let meets = report.meets(threshold);
                if let Some(current) = run.reviewed.last_mut() {
                    current.score = Some(report);
                }

                let next = if meets {
                    run.finalize(PipelineStatus::Succeeded)
                } else if run.budget.take_regeneration() {
                    tracing::info!(total, threshold, "score below threshold, regenerating");
                    PipelineState::Regenerating
                } else {
                    tracing::warn!(total, threshold, "regeneration ceiling reached below threshold");
                    run.finalize(PipelineStatus::ExhaustedRetries)
                };
                (PassOutcome::Scored { total, threshold }, next)
            }
            ScoreOutcome::Unknown { reason } => (
                PassOutcome::ScoreUnknown { reason },
                run.finalize(PipelineStatus::Succeeded),
            ),
        };

        recorder.record(start, outcome, next);
        next
    }

    fn assemble(&self, mut run: RunState, recorder: RunRecorder) -> PipelineResult {
        let status = run.status.unwrap_or(PipelineStatus::ExhaustedRetries);

        let (document, document_valid, critique, score) = match status {
            PipelineStatus::Succeeded => match run.reviewed.pop() {
                Some(c) => (Some(c.document), true, c.critique, c.score),
                None => (None, false, None, None),
            },
            PipelineStatus::FatalError => (None, false, None, None),
            PipelineStatus::ExhaustedRetries | PipelineStatus::Cancelled => run.best_effort(),
        };

        let repair_attempts = run.budget.repairs;
        let regeneration_attempts = run.budget.regenerations;
        let recording = recorder.finish(status);

        PipelineResult {
            status,
            document,
            document_valid,
            critique,
            score,
            meta: RunMeta {
                run_id: recording.run_id,
                model_used: self.config.model.clone(),
                temperature: self.config.generation_temperature,
                review_temperature: self.config.review_temperature,
                schema: self.contract.name().to_string(),
                repair_attempts,
                regeneration_attempts,
                duration_ms: recording.duration_ms,
                usage: recording.usage,
            },
            trace: recording.trace,
            error: run.error,
        }
    }
}

fn issues_model_call(state: PipelineState) -> bool {
    matches!(
        state,
        PipelineState::Generating
            | PipelineState::Repairing
            | PipelineState::Regenerating
            | PipelineState::Critiquing
            | PipelineState::Scoring
    )
}

/// Record the cancellation and finalize with the best candidate so far.
fn cancel_run(run: &mut RunState, recorder: &mut RunRecorder) -> PipelineState {
    let start = recorder.begin(PassKind::Cancelled);
    recorder.record(start, PassOutcome::Cancelled, PipelineState::Finalizing);
    run.error = Some("run cancelled".to_string());
    run.finalize(PipelineStatus::Cancelled)
}

fn take_open_pass(run: &mut RunState, recorder: &RunRecorder) -> PassStart {
    run.open_pass
        .take()
        .unwrap_or_else(|| recorder.begin(PassKind::Generate))
}

/// Builder for [`RegenerationController`].
#[derive(Default)]
pub struct ControllerBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    contract: Option<Arc<SchemaContract>>,
    config: Option<PipelineConfig>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model gateway backend. Required.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Schema contract; defaults to the built-in engineering plan contract.
    pub fn contract(mut self, contract: Arc<SchemaContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<RegenerationController, RuntimeError> {
        let provider = self.provider.ok_or(RuntimeError::MissingProvider)?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let contract = match self.contract {
            Some(contract) => contract,
            None => Arc::new(SchemaContract::engineering_plan()?.clone()),
        };

        let gateway = ModelGateway::new(provider);
        Ok(RegenerationController {
            critique: CritiquePass::new(gateway.clone(), config.review_call()),
            scorer: QualityScorer::new(gateway.clone(), config.review_call()),
            gateway,
            contract,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptStep, ScriptedFailure, ScriptedProvider};
    use serde_json::json;

    fn valid_plan() -> Value {
        json!({
            "project_specification": {"name": "chat"},
            "folder_structure": {},
            "environment_variables": ["DATABASE_URL"],
            "security_architecture": {},
            "optimized_prompt": {},
            "ai_prompt_strategy": {
                "generation_sequence": [],
                "validation_loop": "pytest",
                "self_critique_strategy": "review",
                "hallucination_prevention_rules": []
            },
            "interaction_plan": [],
            "risks": [],
            "ai_failure_cases": [],
            "testing_checklist": [],
            "refactor_advice": [],
            "secret_hacks": []
        })
    }

    fn score(total: u8) -> ScriptStep {
        ScriptStep::text(
            json!({
                "production_score": total,
                "security_score": total,
                "architecture_score": total,
                "specificity_score": total,
                "overall_engineering_score": format!("{}/10", total)
            })
            .to_string(),
        )
    }

    fn critique() -> ScriptStep {
        ScriptStep::text(r#"{"weaknesses": ["no load tests"], "security_gaps": []}"#)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("Build a chat app", "FastAPI", "", "").unwrap()
    }

    fn controller(provider: Arc<ScriptedProvider>) -> RegenerationController {
        controller_with_backoff(provider, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn controller_with_backoff(
        provider: Arc<ScriptedProvider>,
        min_delay: Duration,
        max_delay: Duration,
    ) -> RegenerationController {
        let config = PipelineConfig {
            retry_backoff: crate::config::RetryBackoff {
                min_delay,
                max_delay,
            },
            ..PipelineConfig::default()
        };
        RegenerationController::builder()
            .provider(provider)
            .config(config)
            .build()
            .unwrap()
    }

    #[test]
    fn test_budget_ceilings() {
        let mut budget = Budget::new(&PipelineConfig {
            repair_ceiling: 1,
            regeneration_ceiling: 0,
            ..PipelineConfig::default()
        });
        assert!(budget.take_repair());
        assert!(!budget.take_repair());
        assert!(!budget.take_regeneration());
        assert_eq!(budget.repairs, 1);
    }

    #[test]
    fn test_builder_requires_provider() {
        let result = RegenerationController::builder().build();
        assert!(matches!(result, Err(RuntimeError::MissingProvider)));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = RegenerationController::builder()
            .provider(Arc::new(ScriptedProvider::new(vec![])))
            .config(PipelineConfig {
                quality_threshold: 42,
                ..PipelineConfig::default()
            })
            .build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[tokio::test]
    async fn test_repair_fixes_invalid_document() {
        let mut broken = valid_plan();
        broken.as_object_mut().unwrap().remove("risks");

        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::text(broken.to_string()),
            ScriptStep::text(valid_plan().to_string()),
            critique(),
            score(7),
        ]));
        let result = controller(provider.clone()).run(&request()).await;

        assert_eq!(result.status, PipelineStatus::Succeeded);
        assert_eq!(result.meta.repair_attempts, 1);
        assert_eq!(result.trace.count(PassKind::Repair), 1);

        let repair_prompt = provider.calls()[1].prompt_text();
        assert!(repair_prompt.contains("$.risks: expected field to be present"));
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal_immediately() {
        let provider = Arc::new(ScriptedProvider::repeating(ScriptStep::failure(
            ScriptedFailure::Auth,
        )));
        let result = controller(provider.clone()).run(&request()).await;

        assert_eq!(result.status, PipelineStatus::FatalError);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.trace.len(), 1);
        assert!(result.document.is_none());
        assert_eq!(result.error.as_deref(), Some("Authentication failed"));
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_into_fatal_error() {
        let provider = Arc::new(ScriptedProvider::repeating(ScriptStep::failure(
            ScriptedFailure::Timeout,
        )));
        let result = controller(provider.clone()).run(&request()).await;

        assert_eq!(result.status, PipelineStatus::FatalError);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(result.meta.repair_attempts, 2);
        assert!(result
            .trace
            .records()
            .iter()
            .all(|r| matches!(r.outcome, PassOutcome::GatewayFailed { retriable: true, .. })));
    }

    #[tokio::test]
    async fn test_transport_failure_then_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::failure(ScriptedFailure::Transport),
            ScriptStep::text(valid_plan().to_string()),
            critique(),
            score(9),
        ]));
        let result = controller(provider).run(&request()).await;

        assert_eq!(result.status, PipelineStatus::Succeeded);
        assert_eq!(result.trace.len(), 4);
        assert_eq!(result.trace.records()[1].pass, PassKind::Repair);
    }

    #[tokio::test]
    async fn test_unknown_score_accepts_candidate() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::text(valid_plan().to_string()),
            ScriptStep::failure(ScriptedFailure::Timeout),
            ScriptStep::text("I'd give it a solid B+"),
        ]));
        let result = controller(provider).run(&request()).await;

        assert_eq!(result.status, PipelineStatus::Succeeded);
        assert!(result.critique.is_none());
        assert!(result.score.is_none());
        assert!(result.trace.score_unknown());
        assert_eq!(result.meta.regeneration_attempts, 0);
        assert_eq!(result.document, Some(valid_plan()));
    }

    #[tokio::test]
    async fn test_regeneration_recovers_quality() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::text(valid_plan().to_string()),
            critique(),
            score(4),
            ScriptStep::text(valid_plan().to_string()),
            critique(),
            score(8),
        ]));
        let result = controller(provider.clone()).run(&request()).await;

        assert_eq!(result.status, PipelineStatus::Succeeded);
        assert_eq!(result.meta.regeneration_attempts, 1);
        assert_eq!(result.score.as_ref().map(|s| s.total), Some(8));
        assert!(result.auto_regeneration_applied());

        let regen_prompt = provider.calls()[3].prompt_text();
        assert!(regen_prompt.contains("scored 4/10"));
        assert!(regen_prompt.contains("no load tests"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let provider = Arc::new(ScriptedProvider::repeating(ScriptStep::text("{}")));
        let token = CancellationToken::new();
        token.cancel();

        let result = controller(provider.clone())
            .run_with_cancel(&request(), &token)
            .await;

        assert_eq!(result.status, PipelineStatus::Cancelled);
        assert_eq!(provider.call_count(), 0);
        assert_eq!(result.trace.len(), 1);
        assert_eq!(result.trace.records()[0].pass, PassKind::Cancelled);
    }

    #[tokio::test]
    async fn test_review_calls_use_review_temperature() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::text(valid_plan().to_string()),
            critique(),
            score(8),
        ]));
        controller(provider.clone()).run(&request()).await;

        let temps: Vec<f32> = provider.calls().iter().map(|c| c.temperature).collect();
        assert_eq!(temps, vec![0.3, 0.2, 0.2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_retry_waits_for_backoff() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::failure(ScriptedFailure::Transport),
            ScriptStep::text(valid_plan().to_string()),
            critique(),
            score(9),
        ]));
        let controller =
            controller_with_backoff(provider, Duration::from_secs(3), Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        let result = controller.run(&request()).await;
        let waited = started.elapsed();

        assert_eq!(result.status, PipelineStatus::Succeeded);
        assert!(waited >= Duration::from_secs(3), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(6), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_capped_at_max_delay() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::rate_limited(Duration::from_secs(60)),
            ScriptStep::text(valid_plan().to_string()),
            critique(),
            score(9),
        ]));
        let controller = controller_with_backoff(
            provider.clone(),
            Duration::from_millis(100),
            Duration::from_secs(2),
        );

        let started = tokio::time::Instant::now();
        let result = controller.run(&request()).await;
        let waited = started.elapsed();

        assert_eq!(result.status, PipelineStatus::Succeeded);
        assert_eq!(provider.call_count(), 4);
        assert!(waited >= Duration::from_secs(2), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(3), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_skips_retry_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptStep::failure(ScriptedFailure::Transport),
            ScriptStep::text(valid_plan().to_string()),
        ]));
        let controller = controller_with_backoff(
            provider.clone(),
            Duration::from_secs(4),
            Duration::from_secs(30),
        );
        let token = CancellationToken::new();
        let request = request();

        let (result, ()) = tokio::join!(controller.run_with_cancel(&request, &token), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        assert_eq!(result.status, PipelineStatus::Cancelled);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.error.as_deref(), Some("run cancelled"));
        let passes: Vec<PassKind> = result.trace.records().iter().map(|r| r.pass).collect();
        assert_eq!(passes, vec![PassKind::Generate, PassKind::Cancelled]);
    }
}
