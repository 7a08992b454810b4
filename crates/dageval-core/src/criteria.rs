use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::dag::schema::{CriteriaScore, EvaluationSteps};
use crate::dag::templates;
use crate::error::EvalError;
use crate::evaluator::{EvaluatorDetails, Measurement, SubEvaluator};
use crate::model::{self, JudgeModel};
use crate::types::{TestCase, TestCaseParam};

/// Scores a test case from 0 to 10 against a rubric. When only free-form
/// criteria are given, the judge first turns them into evaluation steps.
///
/// Usually placed under a verdict node, which binds it to the DAG's judge
/// through [`SubEvaluator::fork`].
#[derive(Clone)]
pub struct CriteriaMetric {
    name: String,
    criteria: Option<String>,
    evaluation_steps: Vec<String>,
    evaluation_params: Vec<TestCaseParam>,
    model: Option<Arc<dyn JudgeModel>>,
}

impl CriteriaMetric {
    pub fn new(name: impl Into<String>, criteria: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            criteria: Some(criteria.into()),
            evaluation_steps: Vec::new(),
            evaluation_params: vec![TestCaseParam::Input, TestCaseParam::ActualOutput],
            model: None,
        }
    }

    pub fn with_steps(name: impl Into<String>, steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            criteria: None,
            evaluation_steps: steps.into_iter().map(Into::into).collect(),
            evaluation_params: vec![TestCaseParam::Input, TestCaseParam::ActualOutput],
            model: None,
        }
    }

    pub fn evaluation_params(mut self, params: impl IntoIterator<Item = TestCaseParam>) -> Self {
        self.evaluation_params = params.into_iter().collect();
        self
    }

    pub fn model(mut self, model: Arc<dyn JudgeModel>) -> Self {
        self.model = Some(model);
        self
    }

    fn judge(&self) -> Result<&dyn JudgeModel, EvalError> {
        self.model.as_deref().ok_or_else(|| EvalError::SubEvaluator {
            name: self.name.clone(),
            message: "no judge model bound".to_string(),
        })
    }

    fn steps_prompt(&self) -> Option<String> {
        match (&self.criteria, self.evaluation_steps.is_empty()) {
            (Some(criteria), true) => Some(templates::evaluation_steps(criteria)),
            _ => None,
        }
    }

    fn finish(&self, steps: Vec<String>, scored: CriteriaScore, cost: f64) -> Measurement {
        debug!(evaluator = %self.name, score = scored.score, "criteria scored");
        Measurement {
            score: f64::from(scored.score.min(10)) / 10.0,
            reason: Some(scored.reason),
            evaluation_cost: cost,
            details: EvaluatorDetails::Criteria {
                criteria: self.criteria.clone(),
                steps,
            },
        }
    }
}

#[async_trait]
impl SubEvaluator for CriteriaMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn fork(&self, model: Arc<dyn JudgeModel>) -> Box<dyn SubEvaluator> {
        Box::new(self.clone().model(model))
    }

    fn measure(&self, case: &TestCase) -> Result<Measurement, EvalError> {
        let judge = self.judge()?;
        let mut cost = 0.0;
        let steps = match self.steps_prompt() {
            Some(prompt) => {
                let shape = EvaluationSteps::shape();
                let (value, c) = model::generate_value(judge, &prompt, &shape)?;
                cost += c;
                shape.from_validated::<EvaluationSteps>(value)?.steps
            }
            None => self.evaluation_steps.clone(),
        };

        let shape = CriteriaScore::shape();
        let prompt = templates::criteria_score(&steps, &templates::test_case_text(case, &self.evaluation_params));
        let (value, c) = model::generate_value(judge, &prompt, &shape)?;
        let scored: CriteriaScore = shape.from_validated(value)?;
        Ok(self.finish(steps, scored, cost + c))
    }

    async fn a_measure(&self, case: &TestCase) -> Result<Measurement, EvalError> {
        let judge = self.judge()?;
        let mut cost = 0.0;
        let steps = match self.steps_prompt() {
            Some(prompt) => {
                let shape = EvaluationSteps::shape();
                let (value, c) = model::a_generate_value(judge, &prompt, &shape).await?;
                cost += c;
                shape.from_validated::<EvaluationSteps>(value)?.steps
            }
            None => self.evaluation_steps.clone(),
        };

        let shape = CriteriaScore::shape();
        let prompt = templates::criteria_score(&steps, &templates::test_case_text(case, &self.evaluation_params));
        let (value, c) = model::a_generate_value(judge, &prompt, &shape).await?;
        let scored: CriteriaScore = shape.from_validated(value)?;
        Ok(self.finish(steps, scored, cost + c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;
    use serde_json::json;

    #[test]
    fn derives_steps_from_criteria() {
        let model = Arc::new(
            ScriptedModel::new()
                .respond("write 3 to 4 concise steps", json!({"steps": ["Check the city", "Check the country"]}))
                .respond("Evaluation Steps:", json!({"score": 9, "reason": "accurate"}))
                .cost_per_call(0.1),
        );
        let metric = CriteriaMetric::new("Accuracy", "Is the answer factually right?").fork(model.clone());
        let m = metric.measure(&TestCase::new("Capital of France?", "Paris")).unwrap();

        assert_eq!(m.score, 0.9);
        assert_eq!(m.reason.as_deref(), Some("accurate"));
        assert!((m.evaluation_cost - 0.2).abs() < 1e-9);
        assert_eq!(
            m.details,
            EvaluatorDetails::Criteria {
                criteria: Some("Is the answer factually right?".into()),
                steps: vec!["Check the city".into(), "Check the country".into()],
            }
        );
        assert!(model.prompts()[1].contains("1. Check the city\n2. Check the country"));
        assert!(model.prompts()[1].contains("Actual Output:\nParis\n"));
    }

    #[tokio::test]
    async fn given_steps_skip_generation() {
        let model = Arc::new(ScriptedModel::new().respond("Evaluation Steps:", json!({"score": 4, "reason": "vague"})));
        let metric = CriteriaMetric::with_steps("Specificity", ["Look for concrete numbers"]).model(model.clone());
        let m = metric.a_measure(&TestCase::new("q", "a")).await.unwrap();
        assert_eq!(m.score, 0.4);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn unbound_metric_reports_missing_model() {
        let metric = CriteriaMetric::new("Accuracy", "right?");
        assert!(matches!(
            metric.measure(&TestCase::new("q", "a")),
            Err(EvalError::SubEvaluator { .. })
        ));
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let model = Arc::new(ScriptedModel::new().respond("Evaluation Steps:", json!({"score": 14, "reason": "r"})));
        let metric = CriteriaMetric::with_steps("S", ["step"]).model(model);
        assert!(matches!(metric.measure(&TestCase::new("q", "a")), Err(EvalError::Model(_))));
    }
}
