//! The judge model capability and the structured-output plumbing around it.

mod ollama;
mod scripted;

pub use ollama::{OllamaModel, DEFAULT_BASE_URL};
pub use scripted::ScriptedModel;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::dag::schema::ResultShape;
use crate::error::ModelError;

/// What a model handed back: either already-structured JSON or free text
/// that still has to be parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Structured(Value),
    Text(String),
}

/// A language model used as a judge.
///
/// Native models always honour the requested [`ResultShape`]. Other models
/// may answer [`ModelError::SchemaUnsupported`], in which case the caller
/// retries without a shape and extracts JSON from the raw text.
#[async_trait]
pub trait JudgeModel: Send + Sync {
    fn name(&self) -> &str;

    fn is_native(&self) -> bool {
        false
    }

    fn generate(&self, prompt: &str, shape: Option<&ResultShape>) -> Result<(Generation, f64), ModelError>;

    async fn a_generate(
        &self,
        prompt: &str,
        shape: Option<&ResultShape>,
    ) -> Result<(Generation, f64), ModelError>;
}

/// Prompts `model` for `shape`, returning the validated JSON and the cost.
pub fn generate_value(
    model: &dyn JudgeModel,
    prompt: &str,
    shape: &ResultShape,
) -> Result<(Value, f64), ModelError> {
    let (generation, cost) = match model.generate(prompt, Some(shape)) {
        Err(ModelError::SchemaUnsupported) if !model.is_native() => {
            debug!(model = model.name(), shape = shape.name(), "schema unsupported, parsing raw output");
            model.generate(prompt, None)?
        }
        other => other?,
    };
    Ok((into_value(generation, shape)?, cost))
}

pub async fn a_generate_value(
    model: &dyn JudgeModel,
    prompt: &str,
    shape: &ResultShape,
) -> Result<(Value, f64), ModelError> {
    let (generation, cost) = match model.a_generate(prompt, Some(shape)).await {
        Err(ModelError::SchemaUnsupported) if !model.is_native() => {
            debug!(model = model.name(), shape = shape.name(), "schema unsupported, parsing raw output");
            model.a_generate(prompt, None).await?
        }
        other => other?,
    };
    Ok((into_value(generation, shape)?, cost))
}

fn into_value(generation: Generation, shape: &ResultShape) -> Result<Value, ModelError> {
    let value = match generation {
        Generation::Structured(value) => value,
        Generation::Text(text) => trim_and_load_json(&text)?,
    };
    shape.validate(&value)?;
    Ok(value)
}

/// Pulls the outermost JSON object out of free-form model output.
pub fn trim_and_load_json(text: &str) -> Result<Value, ModelError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(ModelError::Parse(format!("no JSON object in {:?}", preview(text)))),
    };

    let trailing_commas = Regex::new(r",\s*([\]}])").map_err(|e| ModelError::Parse(e.to_string()))?;
    let cleaned = trailing_commas.replace_all(body, "$1");
    serde_json::from_str(&cleaned).map_err(|e| ModelError::Parse(format!("{e} in {:?}", preview(text))))
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::schema::BinaryJudgmentVerdict;
    use serde_json::json;

    #[test]
    fn extracts_json_from_chatter() {
        let text = "Sure! Here you go:\n```json\n{\"verdict\": true, \"reason\": \"ok\",}\n```";
        assert_eq!(
            trim_and_load_json(text).unwrap(),
            json!({"verdict": true, "reason": "ok"})
        );
    }

    #[test]
    fn missing_object_is_a_parse_error() {
        assert!(matches!(
            trim_and_load_json("no json here"),
            Err(ModelError::Parse(_))
        ));
    }

    #[test]
    fn falls_back_to_raw_text_when_schema_unsupported() {
        let model = ScriptedModel::new()
            .respond("Is it", json!({"verdict": false, "reason": "nope"}))
            .raw_only();
        let (value, cost) =
            generate_value(&model, "Is it blue?", &BinaryJudgmentVerdict::shape()).unwrap();
        assert_eq!(value["verdict"], json!(false));
        assert_eq!(cost, 0.0);
        // one rejected schema call, one raw call
        assert_eq!(model.calls(), 2);
    }

    #[test]
    fn native_models_do_not_fall_back() {
        let model = ScriptedModel::new()
            .respond("Is it", json!({"verdict": false, "reason": "nope"}))
            .raw_only()
            .native();
        assert!(matches!(
            generate_value(&model, "Is it blue?", &BinaryJudgmentVerdict::shape()),
            Err(ModelError::SchemaUnsupported)
        ));
    }

    #[tokio::test]
    async fn async_path_validates_shape() {
        let model = ScriptedModel::new().respond("Is it", json!({"verdict": "maybe"}));
        let err = a_generate_value(&model, "Is it blue?", &BinaryJudgmentVerdict::shape())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidOutput { .. }));
    }
}
