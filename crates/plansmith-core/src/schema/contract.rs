//! Schema contract loading.
//!
//! A contract is a compiled JSON Schema document. Validation runs through
//! the compiled validator, so every keyword the schema draft defines is
//! enforced. The [`Shape`] tree keeps only `type`, `properties`, `required`
//! and `items`, which is what prompt skeletons are rendered from.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SchemaError;

/// Embedded engineering plan contract (loaded at compile time).
const ENGINEERING_PLAN_SCHEMA_JSON: &str =
    include_str!("../../schemas/engineering_plan.schema.json");

/// Parsed built-in contract (initialized once, reused).
static ENGINEERING_PLAN: OnceLock<Result<SchemaContract, String>> = OnceLock::new();

/// Runtime shape a field is declared to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
    /// No `type` keyword; any value is accepted.
    Any,
}

impl FieldKind {
    pub(crate) fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "object" => Some(FieldKind::Object),
            "array" => Some(FieldKind::Array),
            "string" => Some(FieldKind::String),
            "number" => Some(FieldKind::Number),
            "integer" => Some(FieldKind::Integer),
            "boolean" => Some(FieldKind::Boolean),
            "null" => Some(FieldKind::Null),
            _ => None,
        }
    }

    /// Name of the kind a value actually has.
    pub fn name_of(value: &Value) -> &'static str {
        match value {
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::String(_) => "string",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Null => "null",
            FieldKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// Declared shape of one node in the document tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub kind: FieldKind,

    /// Fields that must be present when the node is an object, in declared order
    pub required: Vec<String>,

    /// Declared child shapes for object nodes
    pub properties: BTreeMap<String, Shape>,

    /// Element shape for array nodes
    pub items: Option<Box<Shape>>,
}

impl Shape {
    fn any() -> Self {
        Self {
            kind: FieldKind::Any,
            required: Vec::new(),
            properties: BTreeMap::new(),
            items: None,
        }
    }

    fn from_schema(schema: &Value) -> Self {
        let Some(obj) = schema.as_object() else {
            return Shape::any();
        };

        let kind = match obj.get("type") {
            Some(Value::String(keyword)) => FieldKind::from_keyword(keyword).unwrap_or(FieldKind::Any),
            // Union: render the first non-null member.
            Some(Value::Array(keywords)) => {
                let kinds: Vec<FieldKind> = keywords
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(FieldKind::from_keyword)
                    .collect();
                kinds
                    .iter()
                    .copied()
                    .find(|k| *k != FieldKind::Null)
                    .or_else(|| kinds.first().copied())
                    .unwrap_or(FieldKind::Any)
            }
            _ => FieldKind::Any,
        };

        let required = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let properties = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, child)| (name.clone(), Shape::from_schema(child)))
                    .collect()
            })
            .unwrap_or_default();

        let items = match obj.get("items") {
            Some(Value::Array(tuple)) => tuple.first().map(|s| Box::new(Shape::from_schema(s))),
            Some(item_schema) => Some(Box::new(Shape::from_schema(item_schema))),
            None => None,
        };

        Self {
            kind,
            required,
            properties,
            items,
        }
    }
}

/// A compiled contract documents are validated against.
#[derive(Clone)]
pub struct SchemaContract {
    name: String,
    root: Shape,
    source: Value,
    validator: Arc<jsonschema::Validator>,
}

impl std::fmt::Debug for SchemaContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaContract")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl SchemaContract {
    /// Load a contract from a JSON Schema document.
    ///
    /// Fails only when the document does not compile as a JSON Schema.
    pub fn from_json_schema(name: impl Into<String>, schema: Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .build(&schema)
            .map_err(|e| SchemaError::Invalid(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            root: Shape::from_schema(&schema),
            source: schema,
            validator: Arc::new(validator),
        })
    }

    /// Parse a contract from a JSON string.
    pub fn from_json_str(name: impl Into<String>, json: &str) -> Result<Self, SchemaError> {
        let schema: Value =
            serde_json::from_str(json).map_err(|e| SchemaError::Load(e.to_string()))?;
        Self::from_json_schema(name, schema)
    }

    /// The built-in engineering plan contract.
    pub fn engineering_plan() -> Result<&'static SchemaContract, SchemaError> {
        let result = ENGINEERING_PLAN.get_or_init(|| {
            SchemaContract::from_json_str("engineering_plan", ENGINEERING_PLAN_SCHEMA_JSON)
                .map_err(|e| e.to_string())
        });

        match result {
            Ok(contract) => Ok(contract),
            Err(e) => Err(SchemaError::Load(e.clone())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root shape of the contract, used for prompt skeletons.
    pub fn root(&self) -> &Shape {
        &self.root
    }

    /// The JSON Schema document this contract was loaded from.
    pub fn source(&self) -> &Value {
        &self.source
    }

    pub(crate) fn validator(&self) -> &jsonschema::Validator {
        &self.validator
    }

    /// Required top-level field names, in declared order.
    pub fn required_fields(&self) -> &[String] {
        &self.root.required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_contract_loads() {
        let contract = SchemaContract::engineering_plan().unwrap();
        assert_eq!(contract.name(), "engineering_plan");
        assert_eq!(contract.required_fields().len(), 12);
        assert_eq!(contract.required_fields()[0], "project_specification");

        let strategy = &contract.root().properties["ai_prompt_strategy"];
        assert_eq!(strategy.kind, FieldKind::Object);
        assert_eq!(strategy.required.len(), 4);
        assert_eq!(
            strategy.properties["validation_loop"].kind,
            FieldKind::String
        );
    }

    #[test]
    fn test_missing_type_means_any() {
        let contract =
            SchemaContract::from_json_schema("loose", json!({"properties": {"a": {}}})).unwrap();
        assert_eq!(contract.root().kind, FieldKind::Any);
        assert_eq!(contract.root().properties["a"].kind, FieldKind::Any);
    }

    #[test]
    fn test_union_type_loads() {
        let contract =
            SchemaContract::from_json_schema("nullable", json!({"type": ["string", "null"]})).unwrap();
        assert_eq!(contract.root().kind, FieldKind::String);

        let contract = SchemaContract::from_json_schema(
            "union",
            json!({"type": "object", "properties": {"a": {"type": ["null", "integer"]}}}),
        )
        .unwrap();
        assert_eq!(contract.root().properties["a"].kind, FieldKind::Integer);
    }

    #[test]
    fn test_boolean_subschema_is_any() {
        let contract = SchemaContract::from_json_schema(
            "open",
            json!({"type": "object", "properties": {"a": true}}),
        )
        .unwrap();
        assert_eq!(contract.root().properties["a"].kind, FieldKind::Any);
    }

    #[test]
    fn test_uncompilable_schema_rejected() {
        let result = SchemaContract::from_json_schema(
            "bad",
            json!({"type": "string", "pattern": "(unclosed"}),
        );
        assert!(matches!(result, Err(SchemaError::Invalid(_))));
    }

    #[test]
    fn test_items_shape_parsed() {
        let contract = SchemaContract::from_json_schema(
            "list",
            json!({"type": "object", "properties": {"tags": {"type": "array", "items": {"type": "string"}}}}),
        )
        .unwrap();
        let tags = &contract.root().properties["tags"];
        assert_eq!(tags.items.as_ref().map(|s| s.kind), Some(FieldKind::String));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(FieldKind::name_of(&json!(1)), "integer");
        assert_eq!(FieldKind::name_of(&json!(1.5)), "number");
        assert_eq!(FieldKind::name_of(&json!("x")), "string");
        assert_eq!(FieldKind::from_keyword("integer"), Some(FieldKind::Integer));
        assert_eq!(FieldKind::from_keyword("tuple"), None);
    }
}
