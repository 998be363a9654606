//! Guardrail checks as declarative data.
//!
//! Every guardrail (malicious intent, PII, hallucination, self-reference)
//! is the same template: a classifier is asked a question about a payload
//! and answers with a primary flag, an exempt-context flag and a rationale.
//!
//! ## Trip rule
//!
//! `tripped = flag AND NOT exempt`
//!
//! A detection only blocks when it cannot be explained as a legitimate
//! developer or educational use.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::types::GuardrailVerdict;

lazy_static! {
    /// A JSON object wrapped in a Markdown code fence.
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*\})\s*```").unwrap();
}

/// Field name used by every built-in check for the exemption flag.
pub const DEVELOPER_CONTEXT_FIELD: &str = "is_developer_context";

/// Field name used by every built-in check for the rationale.
pub const REASONING_FIELD: &str = "reasoning";

/// Which side of the agent a check guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Output,
}

/// Errors while turning classifier output into a verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerdictError {
    #[error("Classifier output is not a JSON object: {0}")]
    NotJson(String),

    #[error("Classifier output does not match schema for '{check}': {errors:?}")]
    SchemaMismatch { check: String, errors: Vec<String> },
}

/// A declarative classification task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Stable identifier (e.g. "malicious_intent")
    pub name: String,

    /// Human-readable title used in prompts
    pub title: String,

    /// Input or output side
    pub stage: Stage,

    /// What the classifier should detect
    pub instructions: String,

    /// Name of the primary boolean flag
    pub flag_field: String,

    /// Name of the boolean exempt-context flag
    pub exempt_field: String,

    /// Name of the free-text rationale field
    pub rationale_field: String,
}

impl CheckSpec {
    /// Create a check with the default exempt and rationale field names.
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        stage: Stage,
        flag_field: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            stage,
            instructions: instructions.into(),
            flag_field: flag_field.into(),
            exempt_field: DEVELOPER_CONTEXT_FIELD.to_string(),
            rationale_field: REASONING_FIELD.to_string(),
        }
    }

    /// JSON Schema the classifier output must satisfy.
    pub fn output_schema(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(self.flag_field.clone(), json!({ "type": "boolean" }));
        properties.insert(self.exempt_field.clone(), json!({ "type": "boolean" }));
        properties.insert(self.rationale_field.clone(), json!({ "type": "string" }));

        json!({
            "type": "object",
            "properties": properties,
            "required": [&self.flag_field, &self.exempt_field, &self.rationale_field],
        })
    }

    /// Parse raw classifier output into a verdict.
    ///
    /// Accepts bare JSON or JSON inside a Markdown code fence. The object is
    /// validated against [`output_schema`](Self::output_schema) before the
    /// trip rule is applied; anything else is a [`VerdictError`].
    pub fn parse_verdict(&self, raw: &str) -> Result<GuardrailVerdict, VerdictError> {
        let value = parse_json_object(raw)?;
        self.validate(&value)?;

        let fields = match value {
            Value::Object(map) => map,
            other => return Err(VerdictError::NotJson(other.to_string())),
        };

        let flag = |name: &str| fields.get(name).and_then(Value::as_bool).unwrap_or(false);
        let flagged = flag(&self.flag_field);
        let exempt = flag(&self.exempt_field);
        let rationale = fields
            .get(&self.rationale_field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(GuardrailVerdict {
            check: self.name.clone(),
            flagged,
            exempt,
            tripped: trips(flagged, exempt),
            rationale,
            fields,
            raw: raw.to_string(),
            failure: None,
        })
    }

    fn validate(&self, value: &Value) -> Result<(), VerdictError> {
        let schema = self.output_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| VerdictError::SchemaMismatch {
            check: self.name.clone(),
            errors: vec![e.to_string()],
        })?;

        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VerdictError::SchemaMismatch {
                check: self.name.clone(),
                errors,
            })
        }
    }
}

/// The asymmetric trip rule shared by every guardrail.
pub fn trips(flagged: bool, exempt: bool) -> bool {
    flagged && !exempt
}

pub(crate) fn parse_json_object(raw: &str) -> Result<Value, VerdictError> {
    let trimmed = raw.trim();
    let candidate = FENCED_JSON
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(VerdictError::NotJson(other.to_string())),
        Err(e) => Err(VerdictError::NotJson(e.to_string())),
    }
}
