use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Generation, JudgeModel};
use crate::dag::schema::ResultShape;
use crate::error::ModelError;

/// A deterministic judge for tests and demos.
///
/// Each rule pairs a prompt substring with the JSON to answer; the first
/// rule whose needle occurs in the prompt wins, so put rules for prompts
/// that embed other prompts' text (such as the final-reason prompt, which
/// contains the whole trace) first.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    rules: Vec<(String, Value)>,
    cost_per_call: f64,
    raw_only: bool,
    native: bool,
    delay: Option<Duration>,
    slow: Vec<(String, Duration)>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, needle: impl Into<String>, response: Value) -> Self {
        self.rules.push((needle.into(), response));
        self
    }

    pub fn cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    /// Refuse schema-constrained calls and answer with JSON embedded in text.
    pub fn raw_only(mut self) -> Self {
        self.raw_only = true;
        self
    }

    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    /// Sleep before every async answer, to let concurrent branches interleave.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep before async answers to prompts containing `needle`, on top of
    /// any [`delay`](Self::delay).
    pub fn delay_on(mut self, needle: impl Into<String>, delay: Duration) -> Self {
        self.slow.push((needle.into(), delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn answer(&self, prompt: &str, shape: Option<&ResultShape>) -> Result<(Generation, f64), ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.raw_only && shape.is_some() {
            return Err(ModelError::SchemaUnsupported);
        }
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }

        let (_, response) = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .ok_or_else(|| ModelError::Request(format!("no scripted response for prompt: {prompt}")))?;

        let generation = if shape.is_some() {
            Generation::Structured(response.clone())
        } else {
            Generation::Text(format!("Here is my answer:\n{response}"))
        };
        Ok((generation, self.cost_per_call))
    }
}

#[async_trait]
impl JudgeModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_native(&self) -> bool {
        self.native
    }

    fn generate(&self, prompt: &str, shape: Option<&ResultShape>) -> Result<(Generation, f64), ModelError> {
        self.answer(prompt, shape)
    }

    async fn a_generate(
        &self,
        prompt: &str,
        shape: Option<&ResultShape>,
    ) -> Result<(Generation, f64), ModelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((_, delay)) = self.slow.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            tokio::time::sleep(*delay).await;
        }
        self.answer(prompt, shape)
    }
}
