//! # plansmith-runtime
//!
//! Model-facing half of plansmith: the multi-pass pipeline that turns a
//! generation request into a schema-valid, reviewed engineering plan.
//!
//! `plansmith-core` holds everything deterministic (extraction, schema
//! checks, score parsing, the trace model). This crate adds the passes
//! that talk to a model:
//!
//! - [`ModelGateway`]: one bounded call, no retries
//! - [`CritiquePass`] and [`QualityScorer`]: self-review of a valid candidate
//! - [`RegenerationController`]: the state machine that decides what runs next
//! - [`RunRecorder`]: the append-only trace of each run
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plansmith_core::GenerationRequest;
//! use plansmith_runtime::{PipelineConfig, ProviderRegistry, RegenerationController};
//!
//! let provider = ProviderRegistry::with_defaults()
//!     .create("groq", &serde_json::json!({}))?;
//!
//! let controller = RegenerationController::builder()
//!     .provider(provider)
//!     .config(PipelineConfig::from_file("plansmith.yaml")?)
//!     .build()?;
//!
//! let request = GenerationRequest::new("Build a chat app", "FastAPI, Redis", "", "")?;
//! let result = controller.run(&request).await;
//! println!("{}", result.to_response_json());
//! ```

pub mod cancel;
pub mod config;
pub mod controller;
pub mod critique;
pub mod gateway;
pub mod prompts;
pub mod providers;
pub mod recorder;
pub mod scorer;

pub use cancel::{Cancellable, CancellationToken};
pub use config::{ConfigError, PipelineConfig, RetryBackoff};
pub use controller::{ControllerBuilder, RegenerationController, RuntimeError};
pub use critique::{CritiqueOutcome, CritiquePass, Review};
pub use gateway::{ModelCall, ModelGateway};
pub use providers::{
    ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, ProviderFactory, ProviderRegistry, ScriptStep, ScriptedFailure,
    ScriptedProvider, TokenUsage,
};
pub use recorder::{new_run_id, PassStart, Recording, RunRecorder};
pub use scorer::{QualityScorer, ScoreOutcome};

#[cfg(feature = "openai")]
pub use providers::OpenAiCompatProvider;
