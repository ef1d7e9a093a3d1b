//! Candidate validation against a [`SchemaContract`].
//!
//! Pure and deterministic: the same document and contract always produce the
//! same violations, sorted by path. Every violation the compiled schema
//! reports is kept, not just the first, so a single repair prompt can address
//! all of them.

use jsonschema::error::ValidationErrorKind;
use jsonschema::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::contract::{FieldKind, SchemaContract};

/// Actual-value text used when no document was extracted.
pub const NO_DOCUMENT: &str = "no structured document produced";

/// What the contract expected at a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "kind", rename_all = "snake_case")]
pub enum Expected {
    /// A structured document at all.
    Document,
    /// The field to be present.
    Present,
    /// The field to have this kind.
    Kind(FieldKind),
    /// The field to have one of these kinds.
    OneOf(Vec<FieldKind>),
    /// Some other schema keyword (`enum`, `minItems`, ...) held.
    Constraint(String),
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Document => write!(f, "a structured document"),
            Expected::Present => write!(f, "field to be present"),
            Expected::Kind(kind) => write!(f, "{}", kind),
            Expected::OneOf(kinds) => {
                let names: Vec<String> = kinds.iter().map(ToString::to_string).collect();
                write!(f, "one of {}", names.join(", "))
            }
            Expected::Constraint(keyword) => write!(f, "'{}' to hold", keyword),
        }
    }
}

/// A single contract violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Location in the document (`$`, `$.risks`, `$.items[2]`)
    pub path: String,

    pub expected: Expected,

    /// What was found instead, or the validator's message for constraints
    pub actual: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.expected {
            Expected::Constraint(keyword) => write!(f, "{}: {} ({})", self.path, self.actual, keyword),
            expected => write!(f, "{}: expected {}, found {}", self.path, expected, self.actual),
        }
    }
}

/// Result of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    /// Violations rendered one per line, for repair prompts.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("- {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Validate a candidate document (possibly absent) against a contract.
pub fn validate(document: Option<&Value>, contract: &SchemaContract) -> ValidationOutcome {
    let Some(document) = document else {
        return ValidationOutcome::from_violations(vec![Violation {
            path: "$".to_string(),
            expected: Expected::Document,
            actual: NO_DOCUMENT.to_string(),
        }]);
    };

    let mut violations: Vec<Violation> = contract
        .validator()
        .iter_errors(document)
        .map(|error| to_violation(&error, document, contract.source()))
        .collect();
    violations.sort_by(|a, b| a.path.cmp(&b.path));

    ValidationOutcome::from_violations(violations)
}

fn to_violation(error: &ValidationError<'_>, document: &Value, schema: &Value) -> Violation {
    let path = display_path(&error.instance_path.to_string(), document);
    let schema_path = error.schema_path.to_string();

    match &error.kind {
        ValidationErrorKind::Required { property } => {
            let name = property
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| property.to_string());
            Violation {
                path: format!("{}.{}", path, name),
                expected: Expected::Present,
                actual: "missing".to_string(),
            }
        }
        ValidationErrorKind::Type { .. } => match declared_kinds(schema, &schema_path) {
            Some(expected) => Violation {
                path,
                expected,
                actual: FieldKind::name_of(&error.instance).to_string(),
            },
            None => constraint(path, &schema_path, error),
        },
        _ => constraint(path, &schema_path, error),
    }
}

fn constraint(path: String, schema_path: &str, error: &ValidationError<'_>) -> Violation {
    let keyword = schema_path
        .rsplit('/')
        .next()
        .filter(|k| !k.is_empty())
        .unwrap_or("schema");
    Violation {
        path,
        expected: Expected::Constraint(keyword.to_string()),
        actual: error.to_string(),
    }
}

/// The `type` keyword a type error came from, read back out of the schema.
fn declared_kinds(schema: &Value, schema_path: &str) -> Option<Expected> {
    match schema.pointer(schema_path)? {
        Value::String(keyword) => FieldKind::from_keyword(keyword).map(Expected::Kind),
        Value::Array(keywords) => {
            let kinds: Option<Vec<FieldKind>> = keywords
                .iter()
                .map(|k| k.as_str().and_then(FieldKind::from_keyword))
                .collect();
            kinds.map(Expected::OneOf)
        }
        _ => None,
    }
}

/// Render a JSON pointer (`/tags/1`) as a document path (`$.tags[1]`).
fn display_path(pointer: &str, document: &Value) -> String {
    let mut path = String::from("$");
    let mut current = Some(document);

    for raw in pointer.split('/').skip(1) {
        let segment = raw.replace("~1", "/").replace("~0", "~");
        let index = match current {
            Some(Value::Array(_)) => segment.parse::<usize>().ok(),
            _ => None,
        };
        match index {
            Some(i) => {
                path.push_str(&format!("[{}]", i));
                current = current.and_then(|v| v.get(i));
            }
            None => {
                path.push('.');
                path.push_str(&segment);
                current = current.and_then(|v| v.get(segment.as_str()));
            }
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan() -> &'static SchemaContract {
        SchemaContract::engineering_plan().unwrap()
    }

    fn valid_plan() -> Value {
        json!({
            "project_specification": {},
            "folder_structure": {},
            "environment_variables": [],
            "security_architecture": {},
            "optimized_prompt": {},
            "ai_prompt_strategy": {
                "generation_sequence": [],
                "validation_loop": "",
                "self_critique_strategy": "",
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

    #[test]
    fn test_valid_output_structure() {
        let outcome = validate(Some(&valid_plan()), plan());
        assert!(outcome.valid);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn test_absent_document() {
        let outcome = validate(None, plan());
        assert!(!outcome.valid);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].expected, Expected::Document);
        assert_eq!(outcome.violations[0].actual, NO_DOCUMENT);
    }

    #[test]
    fn test_missing_required_fields_all_reported() {
        let outcome = validate(Some(&json!({"project_specification": {}})), plan());
        assert!(!outcome.valid);
        assert_eq!(outcome.violations.len(), 11);
        assert!(outcome.violations.iter().all(|v| v.expected == Expected::Present));
        assert_eq!(outcome.violations[0].path, "$.ai_failure_cases");
        assert!(outcome.violations.iter().any(|v| v.path == "$.folder_structure"));
    }

    #[test]
    fn test_wrong_type_environment_variables() {
        let mut doc = valid_plan();
        doc["environment_variables"] = json!("should be array, not string");

        let outcome = validate(Some(&doc), plan());
        assert!(!outcome.valid);
        assert_eq!(
            outcome.violations,
            vec![Violation {
                path: "$.environment_variables".to_string(),
                expected: Expected::Kind(FieldKind::Array),
                actual: "string".to_string(),
            }]
        );
    }

    #[test]
    fn test_nested_violations() {
        let mut doc = valid_plan();
        doc["ai_prompt_strategy"] = json!({
            "generation_sequence": [],
            "validation_loop": 3
        });

        let outcome = validate(Some(&doc), plan());
        let paths: Vec<&str> = outcome.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "$.ai_prompt_strategy.hallucination_prevention_rules",
                "$.ai_prompt_strategy.self_critique_strategy",
                "$.ai_prompt_strategy.validation_loop",
            ]
        );
    }

    #[test]
    fn test_root_kind_mismatch_stops_descent() {
        let contract = SchemaContract::from_json_schema(
            "list",
            json!({"type": "array", "items": {"type": "string"}}),
        )
        .unwrap();
        let outcome = validate(Some(&json!({"a": 1})), &contract);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].path, "$");
    }

    #[test]
    fn test_array_items_checked() {
        let contract = SchemaContract::from_json_schema(
            "tags",
            json!({
                "type": "object",
                "properties": {"tags": {"type": "array", "items": {"type": "string"}}}
            }),
        )
        .unwrap();
        let outcome = validate(Some(&json!({"tags": ["a", 2, "c", null]})), &contract);
        let paths: Vec<&str> = outcome.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["$.tags[1]", "$.tags[3]"]);
    }

    #[test]
    fn test_extra_fields_allowed() {
        let mut doc = valid_plan();
        doc["bonus"] = json!("ignored");
        assert!(validate(Some(&doc), plan()).valid);
    }

    #[test]
    fn test_keywords_beyond_shape_enforced() {
        let contract = SchemaContract::from_json_schema(
            "strict",
            json!({
                "type": "object",
                "properties": {
                    "risks": {"type": "array", "minItems": 1},
                    "level": {"enum": ["low", "high"]},
                    "count": {"type": "integer"}
                },
                "additionalProperties": false
            }),
        )
        .unwrap();

        let outcome = validate(
            Some(&json!({"risks": [], "level": "banana", "count": 3.0, "extra": 1})),
            &contract,
        );
        assert!(!outcome.valid);

        let found: Vec<(&str, &Expected)> = outcome
            .violations
            .iter()
            .map(|v| (v.path.as_str(), &v.expected))
            .collect();
        assert_eq!(
            found,
            vec![
                ("$", &Expected::Constraint("additionalProperties".to_string())),
                ("$.level", &Expected::Constraint("enum".to_string())),
                ("$.risks", &Expected::Constraint("minItems".to_string())),
            ]
        );
        assert!(outcome.summary().contains("(minItems)"));
        assert!(outcome.violations[0].actual.contains("extra"));
    }

    #[test]
    fn test_union_type_reports_all_kinds() {
        let contract = SchemaContract::from_json_schema(
            "nullable",
            json!({"type": "object", "properties": {"note": {"type": ["string", "null"]}}}),
        )
        .unwrap();

        assert!(validate(Some(&json!({"note": null})), &contract).valid);
        assert!(validate(Some(&json!({"note": "ok"})), &contract).valid);

        let outcome = validate(Some(&json!({"note": 3})), &contract);
        assert_eq!(
            outcome.violations,
            vec![Violation {
                path: "$.note".to_string(),
                expected: Expected::OneOf(vec![FieldKind::String, FieldKind::Null]),
                actual: "integer".to_string(),
            }]
        );
    }

    #[test]
    fn test_matches_compiled_schema_verdict() {
        let compiled = jsonschema::validator_for(plan().source()).unwrap();
        let mut wrong = valid_plan();
        wrong["risks"] = json!({});

        for doc in [valid_plan(), wrong, json!({}), json!({"risks": []})] {
            assert_eq!(validate(Some(&doc), plan()).valid, compiled.is_valid(&doc));
        }
    }

    #[test]
    fn test_pointer_rendered_as_path() {
        let doc = json!({"a/b": [{"c": 1}]});
        assert_eq!(display_path("", &doc), "$");
        assert_eq!(display_path("/a~1b/0/c", &doc), "$.a/b[0].c");
    }

    #[test]
    fn test_summary_lists_each_violation() {
        let outcome = validate(Some(&json!({})), plan());
        assert_eq!(outcome.summary().lines().count(), 12);
        assert!(outcome.summary().contains("$.risks: expected field to be present, found missing"));
    }
}
