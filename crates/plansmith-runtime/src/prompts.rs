//! Prompt builders for every model-facing pass.
//!
//! Generation-class prompts embed a JSON skeleton rendered from the active
//! schema contract, so a user-supplied contract needs no prompt changes.

use serde_json::{json, Map, Value};

use plansmith_core::{
    CritiqueReport, FieldKind, GenerationRequest, SchemaContract, ScoreDimension, ScoreReport,
    Shape,
};

use crate::providers::ChatMessage;

/// Previous output echoed into a repair prompt is cut to this many characters.
pub const MAX_ECHO_CHARS: usize = 6_000;

/// System prompt for generate, repair and regenerate calls.
pub const ARCHITECT_SYSTEM_PROMPT: &str = r#"
You are a senior backend architect who designs AI-assisted engineering workflows.

Rules:
- This is not a machine learning research task. Do not discuss training or fine-tuning models.
- No buzzwords and no vague wording. Name concrete frameworks, files and commands.
- Cover environment variables, security, deployment, validation and testing.

Respond with a single JSON object and nothing else.
"#;

const REPAIR_SYSTEM_PROMPT: &str =
    "You repair structured engineering plans so they match a required JSON structure exactly.";

const CRITIQUE_SYSTEM_PROMPT: &str = "You are a strict backend architecture reviewer.";

const SCORE_SYSTEM_PROMPT: &str = "You are a senior engineering evaluator.";

/// First generation call.
pub fn generation_messages(
    request: &GenerationRequest,
    contract: &SchemaContract,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "{}\nRequired structure:\n{}",
            ARCHITECT_SYSTEM_PROMPT,
            pretty(&skeleton(contract.root()))
        )),
        ChatMessage::user(request_block(request)),
    ]
}

/// Generation call after an extraction failure or schema violations.
pub fn repair_messages(
    request: &GenerationRequest,
    contract: &SchemaContract,
    previous_output: &str,
    problems: &str,
) -> Vec<ChatMessage> {
    let user = format!(
        "The previous output failed validation.\n\n\
         Problems:\n{problems}\n\n\
         Previous output:\n{previous}\n\n\
         {request}\n\
         Required structure:\n{structure}\n\n\
         Fix every problem listed. Return only the corrected JSON object, with no explanation.",
        problems = problems,
        previous = truncate(previous_output, MAX_ECHO_CHARS),
        request = request_block(request),
        structure = pretty(&skeleton(contract.root())),
    );

    vec![ChatMessage::system(REPAIR_SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Generation call after a low score.
pub fn regeneration_messages(
    request: &GenerationRequest,
    contract: &SchemaContract,
    document: &Value,
    critique: Option<&CritiqueReport>,
    score: &ScoreReport,
    threshold: u8,
) -> Vec<ChatMessage> {
    let mut feedback = format!(
        "The plan scored {}/10; at least {}/10 is required ({} points short).\n",
        score.total,
        threshold,
        score.shortfall(threshold)
    );

    let weakest = score.weakest(threshold);
    if !weakest.is_empty() {
        feedback.push_str("Weakest areas:\n");
        for (dimension, value) in weakest {
            feedback.push_str(&format!("- {}: {}/10\n", dimension_label(dimension), value));
        }
    }

    if let Some(critique) = critique {
        let findings = critique.feedback();
        if !findings.is_empty() {
            feedback.push_str("\nReview findings:\n");
            feedback.push_str(&findings);
        }
    }

    let user = format!(
        "{request}\n\
         Current plan:\n{plan}\n\n\
         {feedback}\n\
         Produce an improved plan that addresses every point above. Keep the same structure:\n\
         {structure}\n\n\
         Return only the JSON object.",
        request = request_block(request),
        plan = truncate(&compact(document), MAX_ECHO_CHARS),
        feedback = feedback,
        structure = pretty(&skeleton(contract.root())),
    );

    vec![
        ChatMessage::system(ARCHITECT_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}

/// Self-critique call.
pub fn critique_messages(document: &Value) -> Vec<ChatMessage> {
    let shape = json!({
        "weaknesses": [],
        "security_gaps": [],
        "architecture_issues": [],
        "hallucination_risk_score": "1-10",
        "overall_score": "1-10",
        "improvement_suggestions": []
    });

    let user = format!(
        "Review this engineering plan for security completeness, architecture clarity, \
         production readiness, specificity and hallucination risk.\n\n\
         Respond with JSON only, in this shape:\n{}\n\nPlan:\n{}",
        pretty(&shape),
        compact(document)
    );

    vec![
        ChatMessage::system(CRITIQUE_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}

/// Quality scoring call.
pub fn score_messages(document: &Value, critique: Option<&CritiqueReport>) -> Vec<ChatMessage> {
    let mut shape = Map::new();
    for dimension in ScoreDimension::ALL {
        shape.insert(dimension.response_key().to_string(), json!("0-10"));
    }
    shape.insert(plansmith_core::score::OVERALL_KEY.to_string(), json!("0-10"));

    let mut user = format!(
        "Score this engineering plan from 0 to 10 on production readiness, security depth, \
         architecture quality and specificity. Use whole numbers.\n\n\
         Respond with JSON only, in this shape:\n{}\n\nPlan:\n{}",
        pretty(&Value::Object(shape)),
        compact(document)
    );

    if let Some(critique) = critique {
        let findings = critique.feedback();
        if !findings.is_empty() {
            user.push_str("\n\nA reviewer already noted:\n");
            user.push_str(&findings);
        }
    }

    vec![ChatMessage::system(SCORE_SYSTEM_PROMPT), ChatMessage::user(user)]
}

fn request_block(request: &GenerationRequest) -> String {
    request
        .fields()
        .iter()
        .map(|(name, value)| format!("{}: {}\n", field_label(name), value))
        .collect()
}

fn field_label(name: &str) -> &str {
    match name {
        "goal" => "Goal",
        "stack" => "Tech Stack",
        "experience" => "Experience Level",
        "constraints" => "Constraints",
        other => other,
    }
}

fn dimension_label(dimension: ScoreDimension) -> &'static str {
    match dimension {
        ScoreDimension::Production => "Production readiness",
        ScoreDimension::Security => "Security",
        ScoreDimension::Architecture => "Architecture",
        ScoreDimension::Specificity => "Specificity",
    }
}

/// Empty example value for a shape: required object fields are filled in.
pub fn skeleton(shape: &Shape) -> Value {
    match shape.kind {
        FieldKind::Object | FieldKind::Any if !shape.required.is_empty() => {
            let mut fields = Map::new();
            for name in &shape.required {
                let child = shape
                    .properties
                    .get(name)
                    .map(skeleton)
                    .unwrap_or_else(|| json!({}));
                fields.insert(name.clone(), child);
            }
            Value::Object(fields)
        }
        FieldKind::Object | FieldKind::Any => json!({}),
        FieldKind::Array => json!([]),
        FieldKind::String => json!(""),
        FieldKind::Number | FieldKind::Integer => json!(0),
        FieldKind::Boolean => json!(false),
        FieldKind::Null => Value::Null,
    }
}

/// Cut text to at most `max` characters on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn compact(value: &Value) -> String {
    value.to_string()
}
