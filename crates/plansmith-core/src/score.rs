//! Quality score reports.
//!
//! Models return scores in loose shapes: `8`, `"8"`, `"8/10"`. Each is
//! normalized to an integer in `0..=10`. Anything else makes the whole
//! report unparsable, which the pipeline treats as "score unknown".

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Highest score on the rating scale.
pub const SCORE_MAX: u8 = 10;

lazy_static! {
    /// `8`, `8/10`, `8 / 10`
    static ref SCORE_PATTERN: Regex = Regex::new(r"^\s*(\d{1,3})\s*(?:/\s*10\s*)?$").unwrap();
}

/// Errors from score parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoreError {
    #[error("Score response is not an object")]
    NotAnObject,

    #[error("Missing score dimension: {0}")]
    MissingDimension(&'static str),

    #[error("Unparsable score for {key}: {raw}")]
    Unparsable { key: String, raw: String },

    #[error("Score for {key} out of range: {value}")]
    OutOfRange { key: String, value: u64 },
}

/// Fixed quality dimensions every plan is rated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDimension {
    Production,
    Security,
    Architecture,
    Specificity,
}

impl ScoreDimension {
    pub const ALL: [ScoreDimension; 4] = [
        ScoreDimension::Production,
        ScoreDimension::Security,
        ScoreDimension::Architecture,
        ScoreDimension::Specificity,
    ];

    /// Key the model is asked to use in its response.
    pub fn response_key(self) -> &'static str {
        match self {
            ScoreDimension::Production => "production_score",
            ScoreDimension::Security => "security_score",
            ScoreDimension::Architecture => "architecture_score",
            ScoreDimension::Specificity => "specificity_score",
        }
    }
}

/// Response key for the model's own overall rating.
pub const OVERALL_KEY: &str = "overall_engineering_score";

/// A validated score report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub dimensions: BTreeMap<ScoreDimension, u8>,

    /// Overall rating as reported by the model, if it gave one
    pub reported_overall: Option<u8>,

    /// Mean of the dimension scores
    pub average: f64,

    /// Score the regeneration decision is made on
    pub total: u8,
}

impl ScoreReport {
    /// Build a report from the extracted score response.
    pub fn from_value(value: &Value) -> Result<Self, ScoreError> {
        let fields = value.as_object().ok_or(ScoreError::NotAnObject)?;

        let mut dimensions = BTreeMap::new();
        for dimension in ScoreDimension::ALL {
            let key = dimension.response_key();
            let raw = fields.get(key).ok_or(ScoreError::MissingDimension(key))?;
            dimensions.insert(dimension, parse_score(key, raw)?);
        }

        let reported_overall = match fields.get(OVERALL_KEY) {
            Some(Value::Null) | None => None,
            Some(raw) => Some(parse_score(OVERALL_KEY, raw)?),
        };

        let sum: u32 = dimensions.values().map(|&s| u32::from(s)).sum();
        let average = f64::from(sum) / dimensions.len() as f64;
        let total = reported_overall.unwrap_or_else(|| average.round() as u8);

        Ok(Self {
            dimensions,
            reported_overall,
            average,
            total,
        })
    }

    /// Whether the report clears the quality threshold.
    pub fn meets(&self, threshold: u8) -> bool {
        self.total >= threshold
    }

    /// Points missing to reach the threshold.
    pub fn shortfall(&self, threshold: u8) -> u8 {
        threshold.saturating_sub(self.total)
    }

    /// Dimensions scoring below the threshold, lowest first.
    pub fn weakest(&self, threshold: u8) -> Vec<(ScoreDimension, u8)> {
        let mut low: Vec<_> = self
            .dimensions
            .iter()
            .filter(|(_, &s)| s < threshold)
            .map(|(&d, &s)| (d, s))
            .collect();
        low.sort_by_key(|&(_, s)| s);
        low
    }
}

/// Normalize one score value to `0..=10`.
pub fn parse_score(key: &str, raw: &Value) -> Result<u8, ScoreError> {
    let unparsable = || ScoreError::Unparsable {
        key: key.to_string(),
        raw: raw.to_string(),
    };

    let value: u64 = match raw {
        Value::Number(n) => match n.as_u64() {
            Some(v) => v,
            None => match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => f as u64,
                _ => return Err(unparsable()),
            },
        },
        Value::String(s) => {
            let caps = SCORE_PATTERN.captures(s).ok_or_else(unparsable)?;
            caps[1].parse().map_err(|_| unparsable())?
        }
        _ => return Err(unparsable()),
    };

    if value > u64::from(SCORE_MAX) {
        return Err(ScoreError::OutOfRange {
            key: key.to_string(),
            value,
        });
    }

    Ok(value as u8)
}
