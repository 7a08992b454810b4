use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::model::JudgeModel;
use crate::types::TestCase;

/// How a finished sub-evaluation describes itself in the parent's trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvaluatorDetails {
    /// Criteria-driven evaluators report what they were asked to check.
    Criteria {
        criteria: Option<String>,
        steps: Vec<String>,
    },
    /// Anything else hands over its own execution trace.
    Verbose(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub score: f64,
    pub reason: Option<String>,
    pub evaluation_cost: f64,
    pub details: EvaluatorDetails,
}

/// An externally scored evaluation that a verdict node can hand off to.
///
/// The DAG never measures the shared instance directly: it forks a copy
/// bound to the metric's own judge model and measures that.
#[async_trait]
pub trait SubEvaluator: Send + Sync {
    fn name(&self) -> &str;

    fn fork(&self, model: Arc<dyn JudgeModel>) -> Box<dyn SubEvaluator>;

    fn measure(&self, case: &TestCase) -> Result<Measurement, EvalError>;

    async fn a_measure(&self, case: &TestCase) -> Result<Measurement, EvalError>;
}
