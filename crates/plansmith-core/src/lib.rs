//! # plansmith-core
//!
//! Deterministic building blocks of the plansmith validation pipeline.
//!
//! Everything here is pure: no model calls, no I/O beyond loading a schema
//! contract. The runtime crate sequences these pieces around model calls.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same text and contract always give the same outcome
//! 2. **Complete**: validation reports every violation, not just the first
//! 3. **Traceable**: every pass of a run leaves one [`PassRecord`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use plansmith_core::{inspect, SchemaContract};
//!
//! let contract = SchemaContract::engineering_plan()?;
//! let inspection = inspect("Sure! {\"risks\": []}", contract);
//!
//! if !inspection.validation.valid {
//!     println!("{}", inspection.validation.summary());
//! }
//! ```

pub mod critique;
pub mod extract;
pub mod request;
pub mod result;
pub mod schema;
pub mod score;
pub mod trace;
pub mod usage;

// Re-export main types at crate root
pub use critique::{CritiqueCategory, CritiqueError, CritiqueReport};
pub use extract::{extract, Extraction, ExtractionFailure, ExtractionTier};
pub use request::{GenerationRequest, RequestError, MAX_FIELD_CHARS};
pub use result::{PipelineResult, PipelineStatus, RunMeta};
pub use schema::{
    validate, Expected, FieldKind, SchemaContract, SchemaError, Shape, ValidationOutcome,
    Violation, NO_DOCUMENT,
};
pub use score::{parse_score, ScoreDimension, ScoreError, ScoreReport, SCORE_MAX};
pub use trace::{PassKind, PassOutcome, PassRecord, PipelineState, RunTrace};
pub use usage::LlmUsage;

/// Extraction and validation of one raw response.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub extraction: Extraction,
    pub validation: ValidationOutcome,
}

/// Run the extractor and schema validator over raw model text.
pub fn inspect(text: &str, contract: &SchemaContract) -> Inspection {
    let extraction = extract(text);
    let validation = validate(extraction.document(), contract);
    Inspection {
        extraction,
        validation,
    }
}
