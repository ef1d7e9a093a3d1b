//! Self-critique reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::score::parse_score;

/// Errors from critique parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CritiqueError {
    #[error("Critique response is not an object")]
    NotAnObject,

    #[error("Critique response has none of the known categories")]
    NoKnownCategories,
}

/// Named deficiency categories a review is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueCategory {
    Weaknesses,
    SecurityGaps,
    ArchitectureIssues,
    ImprovementSuggestions,
}

impl CritiqueCategory {
    pub const ALL: [CritiqueCategory; 4] = [
        CritiqueCategory::Weaknesses,
        CritiqueCategory::SecurityGaps,
        CritiqueCategory::ArchitectureIssues,
        CritiqueCategory::ImprovementSuggestions,
    ];

    pub fn response_key(self) -> &'static str {
        match self {
            CritiqueCategory::Weaknesses => "weaknesses",
            CritiqueCategory::SecurityGaps => "security_gaps",
            CritiqueCategory::ArchitectureIssues => "architecture_issues",
            CritiqueCategory::ImprovementSuggestions => "improvement_suggestions",
        }
    }

    /// Heading used when findings are fed back into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            CritiqueCategory::Weaknesses => "Weaknesses",
            CritiqueCategory::SecurityGaps => "Security gaps",
            CritiqueCategory::ArchitectureIssues => "Architecture issues",
            CritiqueCategory::ImprovementSuggestions => "Improvement suggestions",
        }
    }
}

const HALLUCINATION_RISK_KEY: &str = "hallucination_risk_score";
const OVERALL_KEY: &str = "overall_score";

/// Structured self-review of a candidate document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueReport {
    /// Findings per category; categories the model left out are empty
    pub findings: BTreeMap<CritiqueCategory, Vec<String>>,

    pub hallucination_risk: Option<u8>,

    pub overall_score: Option<u8>,
}

impl CritiqueReport {
    /// Build a report from the extracted critique response.
    ///
    /// Categories may hold a list or a single value. Non-string entries
    /// are kept as compact JSON text. Unparsable side scores are dropped
    /// rather than failing the report.
    pub fn from_value(value: &Value) -> Result<Self, CritiqueError> {
        let fields = value.as_object().ok_or(CritiqueError::NotAnObject)?;

        let known = CritiqueCategory::ALL
            .iter()
            .any(|c| fields.contains_key(c.response_key()))
            || fields.contains_key(HALLUCINATION_RISK_KEY)
            || fields.contains_key(OVERALL_KEY);
        if !known {
            return Err(CritiqueError::NoKnownCategories);
        }

        let findings = CritiqueCategory::ALL
            .iter()
            .map(|&category| {
                let entries = fields
                    .get(category.response_key())
                    .map(entries_of)
                    .unwrap_or_default();
                (category, entries)
            })
            .collect();

        let side_score = |key: &str| fields.get(key).and_then(|raw| parse_score(key, raw).ok());

        Ok(Self {
            findings,
            hallucination_risk: side_score(HALLUCINATION_RISK_KEY),
            overall_score: side_score(OVERALL_KEY),
        })
    }

    /// Findings in one category.
    pub fn category(&self, category: CritiqueCategory) -> &[String] {
        self.findings
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn total_findings(&self) -> usize {
        self.findings.values().map(Vec::len).sum()
    }

    /// Findings rendered as a bulleted list grouped by category.
    pub fn feedback(&self) -> String {
        let mut out = String::new();
        for category in CritiqueCategory::ALL {
            let entries = self.category(category);
            if entries.is_empty() {
                continue;
            }
            out.push_str(category.label());
            out.push_str(":\n");
            for entry in entries {
                out.push_str("- ");
                out.push_str(entry);
                out.push('\n');
            }
        }
        out
    }
}

fn entries_of(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(entry_text).collect(),
        other => entry_text(other).into_iter().collect(),
    }
}

fn entry_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}
