use std::fmt;
use std::sync::{Arc, OnceLock};

use jsonschema::JSONSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ModelError;

/// The JSON structure a node expects back from the judge model.
///
/// The schema is compiled once, when the shape is built; clones share it.
#[derive(Clone)]
pub struct ResultShape {
    name: String,
    schema: Value,
    compiled: Result<Arc<JSONSchema>, String>,
}

impl ResultShape {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        let compiled = JSONSchema::compile(&schema)
            .map(Arc::new)
            .map_err(|e| format!("invalid schema: {e}"));
        Self {
            name: name.into(),
            schema,
            compiled,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// JSON Schema handed to models that support constrained generation.
    pub fn json_schema(&self) -> &Value {
        &self.schema
    }

    pub fn validate(&self, value: &Value) -> Result<(), ModelError> {
        let compiled = self.compiled.as_ref().map_err(|message| ModelError::InvalidOutput {
            shape: self.name.clone(),
            message: message.clone(),
        })?;
        if let Err(errors) = compiled.validate(value) {
            let message = errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ModelError::InvalidOutput {
                shape: self.name.clone(),
                message,
            });
        }
        Ok(())
    }

    /// Validates `value` against the shape, then deserializes it.
    pub fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T, ModelError> {
        self.validate(&value)?;
        self.from_validated(value)
    }

    /// Deserializes a value that already passed [`validate`](Self::validate),
    /// as everything returned by `model::generate_value` has.
    pub(crate) fn from_validated<T: DeserializeOwned>(&self, value: Value) -> Result<T, ModelError> {
        serde_json::from_value(value).map_err(|e| ModelError::InvalidOutput {
            shape: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Builds a fixed shape on first use and hands out clones after that.
fn cached(cell: &'static OnceLock<ResultShape>, build: impl FnOnce() -> ResultShape) -> ResultShape {
    cell.get_or_init(build).clone()
}

impl fmt::Debug for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultShape")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl PartialEq for ResultShape {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.schema == other.schema
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNodeOutput {
    pub output: String,
}

impl TaskNodeOutput {
    pub fn shape() -> ResultShape {
        static SHAPE: OnceLock<ResultShape> = OnceLock::new();
        cached(&SHAPE, || {
            ResultShape::new(
                "TaskNodeOutput",
                json!({
                    "type": "object",
                    "properties": { "output": { "type": "string" } },
                    "required": ["output"]
                }),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryJudgmentVerdict {
    pub verdict: bool,
    pub reason: String,
}

impl BinaryJudgmentVerdict {
    pub fn shape() -> ResultShape {
        static SHAPE: OnceLock<ResultShape> = OnceLock::new();
        cached(&SHAPE, || {
            ResultShape::new(
                "BinaryJudgmentVerdict",
                json!({
                    "type": "object",
                    "properties": {
                        "verdict": { "type": "boolean" },
                        "reason": { "type": "string" }
                    },
                    "required": ["verdict", "reason"]
                }),
            )
        })
    }
}

/// A verdict picked from a set of options known only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstrainedChoice {
    pub verdict: String,
    pub reason: String,
}

impl ConstrainedChoice {
    pub fn shape(options: &[String]) -> ResultShape {
        ResultShape::new(
            "NonBinaryJudgmentVerdict",
            json!({
                "type": "object",
                "properties": {
                    "verdict": { "type": "string", "enum": options },
                    "reason": { "type": "string" }
                },
                "required": ["verdict", "reason"]
            }),
        )
    }

    /// Rejects a verdict outside `options`, whatever the model claimed.
    pub fn check(self, options: &[String]) -> Result<Self, ModelError> {
        if options.iter().any(|o| *o == self.verdict) {
            Ok(self)
        } else {
            Err(ModelError::InvalidOutput {
                shape: "NonBinaryJudgmentVerdict".to_string(),
                message: format!("verdict `{}` is not one of {:?}", self.verdict, options),
            })
        }
    }
}

/// Rubric steps derived from free-form criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSteps {
    pub steps: Vec<String>,
}

impl EvaluationSteps {
    pub fn shape() -> ResultShape {
        static SHAPE: OnceLock<ResultShape> = OnceLock::new();
        cached(&SHAPE, || {
            ResultShape::new(
                "EvaluationSteps",
                json!({
                    "type": "object",
                    "properties": {
                        "steps": { "type": "array", "items": { "type": "string" }, "minItems": 1 }
                    },
                    "required": ["steps"]
                }),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaScore {
    pub score: u8,
    pub reason: String,
}

impl CriteriaScore {
    pub fn shape() -> ResultShape {
        static SHAPE: OnceLock<ResultShape> = OnceLock::new();
        cached(&SHAPE, || {
            ResultShape::new(
                "CriteriaScore",
                json!({
                    "type": "object",
                    "properties": {
                        "score": { "type": "integer", "minimum": 0, "maximum": 10 },
                        "reason": { "type": "string" }
                    },
                    "required": ["score", "reason"]
                }),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScoreReason {
    pub reason: String,
}

impl MetricScoreReason {
    pub fn shape() -> ResultShape {
        static SHAPE: OnceLock<ResultShape> = OnceLock::new();
        cached(&SHAPE, || {
            ResultShape::new(
                "MetricScoreReason",
                json!({
                    "type": "object",
                    "properties": { "reason": { "type": "string" } },
                    "required": ["reason"]
                }),
            )
        })
    }
}
