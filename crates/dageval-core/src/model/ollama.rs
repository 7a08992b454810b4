use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Generation, JudgeModel};
use crate::dag::schema::ResultShape;
use crate::error::ModelError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// A judge served by a local Ollama instance. Local inference is free, so
/// every call reports zero cost.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    model: String,
    base_url: String,
    temperature: f64,
    client: reqwest::Client,
    // built on the first sync call, outside any async runtime
    blocking: Arc<OnceLock<reqwest::blocking::Client>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OllamaModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            client: reqwest::Client::new(),
            blocking: Arc::default(),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Result<Self, ModelError> {
        if temperature < 0.0 {
            return Err(ModelError::Config(format!("temperature must be >= 0, got {temperature}")));
        }
        self.temperature = temperature;
        Ok(self)
    }

    fn blocking_client(&self) -> &reqwest::blocking::Client {
        self.blocking.get_or_init(reqwest::blocking::Client::new)
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn body(&self, prompt: &str, shape: Option<&ResultShape>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        if let Some(shape) = shape {
            body["format"] = shape.json_schema().clone();
        }
        body
    }

    fn into_generation(response: ChatResponse, shape: Option<&ResultShape>) -> Result<Generation, ModelError> {
        let content = response.message.content;
        match shape {
            Some(shape) => serde_json::from_str(&content)
                .map(Generation::Structured)
                .map_err(|e| ModelError::Parse(format!("{} response is not JSON: {e}", shape.name()))),
            None => Ok(Generation::Text(content)),
        }
    }
}

#[async_trait]
impl JudgeModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn is_native(&self) -> bool {
        true
    }

    fn generate(&self, prompt: &str, shape: Option<&ResultShape>) -> Result<(Generation, f64), ModelError> {
        let resp = self.blocking_client().post(self.endpoint()).json(&self.body(prompt, shape)).send()?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(ModelError::Request(format!("HTTP {}: {}", status.as_u16(), text)));
        }
        let response: ChatResponse = resp.json()?;
        Ok((Self::into_generation(response, shape)?, 0.0))
    }

    async fn a_generate(
        &self,
        prompt: &str,
        shape: Option<&ResultShape>,
    ) -> Result<(Generation, f64), ModelError> {
        let resp = self
            .client
            .post(self.endpoint())
            .json(&self.body(prompt, shape))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Request(format!("HTTP {}: {}", status.as_u16(), text)));
        }
        let response: ChatResponse = resp.json().await?;
        Ok((Self::into_generation(response, shape)?, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::schema::TaskNodeOutput;

    #[test]
    fn rejects_negative_temperature() {
        let err = OllamaModel::new("llama3").temperature(-0.5).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
        assert!(OllamaModel::new("llama3").temperature(0.7).is_ok());
    }

    #[test]
    fn blocking_client_is_built_once_and_shared() {
        let model = OllamaModel::new("llama3");
        assert!(model.blocking.get().is_none());
        let first: *const reqwest::blocking::Client = model.blocking_client();
        assert!(std::ptr::eq(first, model.blocking_client()));
        assert!(std::ptr::eq(first, model.clone().blocking_client()));
    }

    #[test]
    fn body_carries_schema_as_format() {
        let model = OllamaModel::new("llama3").base_url("http://gpu-box:11434/");
        assert_eq!(model.endpoint(), "http://gpu-box:11434/api/chat");

        let shape = TaskNodeOutput::shape();
        let body = model.body("hello", Some(&shape));
        assert_eq!(body["format"], *shape.json_schema());
        assert_eq!(body["stream"], json!(false));
        assert!(model.body("hello", None).get("format").is_none());
    }

    #[test]
    fn structured_content_must_be_json() {
        let shape = TaskNodeOutput::shape();
        let ok = ChatResponse {
            message: ChatMessage { content: r#"{"output": "x"}"#.into() },
        };
        assert_eq!(
            OllamaModel::into_generation(ok, Some(&shape)).unwrap(),
            Generation::Structured(json!({"output": "x"}))
        );
        let bad = ChatResponse {
            message: ChatMessage { content: "plain".into() },
        };
        assert!(OllamaModel::into_generation(bad, Some(&shape)).is_err());
    }
}
