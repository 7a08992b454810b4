use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::info;

use crate::dag::{Dag, DagRun, RunOutcome};
use crate::error::EvalError;
use crate::evaluator::{EvaluatorDetails, Measurement, SubEvaluator};
use crate::model::JudgeModel;
use crate::scorer::Scorer;
use crate::types::{Score, TestCase};

/// Result of measuring one test case with a [`DagMetric`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricOutcome {
    pub score: f64,
    pub reason: Option<String>,
    pub success: bool,
    pub evaluation_cost: f64,
    pub verbose_steps: Vec<String>,
}

impl MetricOutcome {
    pub fn verbose_logs(&self) -> String {
        self.verbose_steps.join("\n\n")
    }
}

/// Scores test cases by running an evaluation DAG with a judge model.
///
/// Cloning is cheap; the graph and the model are shared.
#[derive(Clone)]
pub struct DagMetric {
    name: String,
    dag: Arc<Dag>,
    model: Arc<dyn JudgeModel>,
    threshold: f64,
    include_reason: bool,
    strict_mode: bool,
    async_mode: bool,
}

impl DagMetric {
    pub fn new(name: impl Into<String>, dag: Dag, model: Arc<dyn JudgeModel>) -> Self {
        Self {
            name: name.into(),
            dag: Arc::new(dag),
            model,
            threshold: 0.5,
            include_reason: true,
            strict_mode: false,
            async_mode: true,
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn include_reason(mut self, include: bool) -> Self {
        self.include_reason = include;
        self
    }

    /// Only a perfect score passes; anything lower is reported as 0.
    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Whether [`Scorer::score`] runs the concurrent or the sequential walk.
    pub fn async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    fn effective_threshold(&self) -> f64 {
        if self.strict_mode {
            1.0
        } else {
            self.threshold
        }
    }

    fn start(&self) -> DagRun<'_> {
        DagRun::new(&self.dag, self.model.clone(), self.name.clone(), self.include_reason)
    }

    /// Walks the DAG depth-first, one model call at a time.
    pub fn measure(&self, case: &TestCase) -> Result<MetricOutcome, EvalError> {
        let run = self.start();
        run.execute(self.dag.root(), case, 0)?;
        self.finish(run.into_outcome())
    }

    /// Walks the DAG with sibling subtrees running concurrently.
    pub async fn a_measure(&self, case: &TestCase) -> Result<MetricOutcome, EvalError> {
        let run = self.start();
        run.a_execute(self.dag.root(), case, 0).await?;
        self.finish(run.into_outcome())
    }

    fn finish(&self, outcome: RunOutcome) -> Result<MetricOutcome, EvalError> {
        let raw = outcome.score.ok_or_else(|| EvalError::NoScore(self.name.clone()))?;
        let threshold = self.effective_threshold();
        let score = if self.strict_mode && raw < threshold { 0.0 } else { raw };
        let success = score >= threshold;
        info!(
            metric = %self.name,
            score,
            success,
            cost = outcome.evaluation_cost,
            steps = outcome.verbose_steps.len(),
            "DAG evaluation finished"
        );
        Ok(MetricOutcome {
            score,
            reason: outcome.reason,
            success,
            evaluation_cost: outcome.evaluation_cost,
            verbose_steps: outcome.verbose_steps,
        })
    }
}

impl From<MetricOutcome> for Measurement {
    fn from(outcome: MetricOutcome) -> Self {
        let details = EvaluatorDetails::Verbose(outcome.verbose_logs());
        Measurement {
            score: outcome.score,
            reason: outcome.reason,
            evaluation_cost: outcome.evaluation_cost,
            details,
        }
    }
}

/// A DAG metric can itself sit under a verdict node of another DAG.
#[async_trait]
impl SubEvaluator for DagMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn fork(&self, model: Arc<dyn JudgeModel>) -> Box<dyn SubEvaluator> {
        Box::new(Self {
            model,
            ..self.clone()
        })
    }

    fn measure(&self, case: &TestCase) -> Result<Measurement, EvalError> {
        DagMetric::measure(self, case).map(Measurement::from)
    }

    async fn a_measure(&self, case: &TestCase) -> Result<Measurement, EvalError> {
        DagMetric::a_measure(self, case).await.map(Measurement::from)
    }
}

#[async_trait]
impl Scorer for DagMetric {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, case: &TestCase) -> Result<Score> {
        let outcome = if self.async_mode {
            self.a_measure(case).await?
        } else {
            // the sequential walk may block on the model, keep it off the runtime threads
            let metric = self.clone();
            let case = case.clone();
            tokio::task::spawn_blocking(move || metric.measure(&case))
                .await
                .map_err(|e| anyhow!(e))??
        };

        let verbose_logs = outcome.verbose_logs();
        Ok(Score {
            name: self.name.clone(),
            value: outcome.score,
            passed: outcome.success,
            reason: outcome.reason,
            evaluation_cost: outcome.evaluation_cost,
            verbose_logs: Some(verbose_logs),
            details: None,
        })
    }
}
