//! Schema contracts and candidate validation.
//!
//! Contracts are JSON Schema documents supplied as configuration. The
//! built-in engineering plan contract is embedded at compile time.

mod contract;
mod validator;

use thiserror::Error;

pub use contract::{FieldKind, SchemaContract, Shape};
pub use validator::{validate, Expected, ValidationOutcome, Violation, NO_DOCUMENT};

/// Errors from loading a schema contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    Load(String),

    #[error("Schema does not compile: {0}")]
    Invalid(String),
}
