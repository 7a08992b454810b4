//! dageval-core: score LLM outputs with evaluation DAGs.
//!
//! Build a graph of task, judgment and verdict nodes with [`DagBuilder`],
//! wrap it in a [`DagMetric`] with a judge model, then score single test
//! cases or run a whole dataset through [`Eval`].
//! See `demos/binary_judgment.rs` for a quickstart.

pub mod config;
pub mod criteria;
pub mod dag;
pub mod datasource;
pub mod error;
pub mod evaluator;
pub mod metric;
pub mod model;
pub mod report;
pub mod runner;
pub mod scorer;
pub mod task;
pub mod testing;
pub mod types;

pub use config::{CriteriaConfig, DagConfig, EvalConfig, ModelConfig, NodeConfig};
pub use criteria::CriteriaMetric;
pub use dag::{
    BinaryJudgmentNode, Dag, DagBuilder, DagRun, NodeId, NodeKind, NonBinaryJudgmentNode, RunOutcome,
    TaskNode, VerdictChild, VerdictNode, VerdictValue,
};
pub use datasource::{DataSource, JsonlDataSource, VecDataSource};
pub use error::{DagError, EvalError, ModelError};
pub use evaluator::{EvaluatorDetails, Measurement, SubEvaluator};
pub use metric::{DagMetric, MetricOutcome};
pub use model::{Generation, JudgeModel, OllamaModel, ScriptedModel};
pub use runner::{Eval, EvalBuilder};
pub use scorer::Scorer;
pub use task::{from_async_fn, Task};
pub use types::{CaseResult, EvalResult, EvalSummary, Score, TestCase, TestCaseParam, ToolCall};

#[cfg(feature = "persistence")]
pub use dageval_store as store;
