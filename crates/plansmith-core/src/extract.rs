//! Structured extraction from raw model text.
//!
//! Two tiers, tried in order:
//! 1. Direct parse of the whole text as a JSON object.
//! 2. Brace scan: the region from the first `{` to the last `}` is parsed.
//!
//! Nothing else is attempted. Trailing commas, smart quotes and truncated
//! payloads are extraction failures and feed the repair loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which tier produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// The whole response was a JSON object.
    Direct,
    /// The object was recovered from a prose-wrapped response.
    BraceScan,
}

/// Why extraction produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExtractionFailure {
    /// Response was empty or whitespace.
    Empty,
    /// No `{ ... }` region exists in the response.
    NoBraceRegion,
    /// A brace region exists but is not valid JSON.
    InvalidRegion { detail: String },
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionFailure::Empty => write!(f, "empty response"),
            ExtractionFailure::NoBraceRegion => write!(f, "no JSON object found in response"),
            ExtractionFailure::InvalidRegion { detail } => {
                write!(f, "JSON object region is malformed: {}", detail)
            }
        }
    }
}

/// Outcome of [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Direct parse succeeded.
    Parsed(Value),
    /// Brace-scan fallback succeeded.
    Recovered(Value),
    /// Neither tier produced a document.
    Failed(ExtractionFailure),
}

impl Extraction {
    /// The tier that produced a document, if any.
    pub fn tier(&self) -> Option<ExtractionTier> {
        match self {
            Extraction::Parsed(_) => Some(ExtractionTier::Direct),
            Extraction::Recovered(_) => Some(ExtractionTier::BraceScan),
            Extraction::Failed(_) => None,
        }
    }

    /// Borrow the extracted document.
    pub fn document(&self) -> Option<&Value> {
        match self {
            Extraction::Parsed(v) | Extraction::Recovered(v) => Some(v),
            Extraction::Failed(_) => None,
        }
    }

    /// Take the extracted document.
    pub fn into_document(self) -> Option<Value> {
        match self {
            Extraction::Parsed(v) | Extraction::Recovered(v) => Some(v),
            Extraction::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Extraction::Failed(_))
    }
}

/// Recover a JSON object from raw model text.
pub fn extract(text: &str) -> Extraction {
    if text.trim().is_empty() {
        return Extraction::Failed(ExtractionFailure::Empty);
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Extraction::Parsed(value);
    }

    let Some(region) = brace_region(text) else {
        tracing::debug!("no brace region in response");
        return Extraction::Failed(ExtractionFailure::NoBraceRegion);
    };

    match serde_json::from_str::<Value>(region) {
        Ok(value @ Value::Object(_)) => Extraction::Recovered(value),
        Ok(_) => Extraction::Failed(ExtractionFailure::InvalidRegion {
            detail: "region is not an object".to_string(),
        }),
        Err(e) => {
            tracing::debug!(error = %e, "brace region failed to parse");
            Extraction::Failed(ExtractionFailure::InvalidRegion {
                detail: e.to_string(),
            })
        }
    }
}

/// Slice from the first `{` through the last `}`.
fn brace_region(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_extract_valid_json() {
        let result = extract(r#"{"test": "value"}"#);
        assert_eq!(result, Extraction::Parsed(json!({"test": "value"})));
    }

    #[test]
    fn test_extract_json_with_surrounding_text() {
        let result = extract(r#"Some explanation {"test": "value"} more text"#);
        assert_eq!(result, Extraction::Recovered(json!({"test": "value"})));
    }

    #[test]
    fn test_extract_json_with_newlines() {
        let text = "{\n    \"key\": \"value\",\n    \"number\": 42\n}";
        let result = extract(text);
        assert_eq!(result.tier(), Some(ExtractionTier::Direct));
        assert_eq!(
            result.into_document(),
            Some(json!({"key": "value", "number": 42}))
        );
    }

    #[test]
    fn test_extract_no_json() {
        let result = extract("no json here at all");
        assert_eq!(result, Extraction::Failed(ExtractionFailure::NoBraceRegion));
    }

    #[test]
    fn test_extract_malformed_json() {
        let result = extract(r#"{"incomplete": "json""#);
        assert!(result.is_failed());
    }

    #[test]
    fn test_trailing_comma_is_not_repaired() {
        let result = extract(r#"Here: {"a": 1,} done"#);
        assert!(matches!(
            result,
            Extraction::Failed(ExtractionFailure::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_extract_nested_json() {
        let result = extract(r#"{"outer": {"inner": "value"}}"#);
        assert_eq!(result.document(), Some(&json!({"outer": {"inner": "value"}})));
    }

    #[test]
    fn test_extract_json_with_array() {
        let result = extract(r#"{"items": [1, 2, 3]}"#);
        assert_eq!(result.document(), Some(&json!({"items": [1, 2, 3]})));
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(extract("  \n "), Extraction::Failed(ExtractionFailure::Empty));
    }

    #[test]
    fn test_top_level_array_is_not_a_document() {
        let result = extract("[1, 2, 3]");
        assert_eq!(result, Extraction::Failed(ExtractionFailure::NoBraceRegion));
    }

    #[test]
    fn test_reversed_braces() {
        assert_eq!(
            extract("} nothing here {"),
            Extraction::Failed(ExtractionFailure::NoBraceRegion)
        );
    }

    #[test]
    fn test_greedy_scan_spans_two_objects() {
        // First `{` to last `}` covers both objects, which is not valid JSON.
        let result = extract(r#"a {"x": 1} b {"y": 2} c"#);
        assert!(result.is_failed());
    }

    #[test]
    fn test_markdown_fenced_payload() {
        let text = "Here is the plan:\n```json\n{\"risks\": []}\n```\nLet me know.";
        assert_eq!(result_tier(text), Some(ExtractionTier::BraceScan));
    }

    fn result_tier(text: &str) -> Option<ExtractionTier> {
        extract(text).tier()
    }

    fn object_strategy() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z_]{1,10}", any::<i64>(), 0..6)
            .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k, json!(v))).collect()))
    }

    proptest! {
        #[test]
        fn prop_bare_object_takes_direct_path(doc in object_strategy()) {
            let text = serde_json::to_string_pretty(&doc).unwrap();
            prop_assert_eq!(extract(&text), Extraction::Parsed(doc));
        }

        #[test]
        fn prop_prose_wrapped_object_is_recovered(
            doc in object_strategy(),
            before in "[A-Za-z0-9 .,:;!?\n]{0,60}",
            after in "[A-Za-z0-9 .,:;!?\n]{0,60}",
        ) {
            let text = format!("{}{}{}", before, serde_json::to_string(&doc).unwrap(), after);
            let result = extract(&text);
            prop_assert_eq!(result.document(), Some(&doc));
        }

        #[test]
        fn prop_brace_free_text_never_extracts(text in "[A-Za-z0-9 .,:;!?\n]{0,200}") {
            prop_assert!(extract(&text).is_failed());
        }
    }
}
