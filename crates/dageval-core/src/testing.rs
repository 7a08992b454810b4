//! Assertions for using DAG metrics inside `#[tokio::test]` functions.

use anyhow::Result;

use crate::scorer::Scorer;
use crate::types::{EvalResult, Score, TestCase};

/// Scores one case with every metric and fails if any of them does not pass.
///
/// ```ignore
/// #[tokio::test]
/// async fn answers_capital_questions() -> anyhow::Result<()> {
///     let case = TestCase::new("Capital of France?", agent.ask("Capital of France?").await?);
///     assert_test(&case, &[&correctness_dag]).await?;
///     Ok(())
/// }
/// ```
pub async fn assert_test(case: &TestCase, metrics: &[&dyn Scorer]) -> Result<Vec<Score>> {
    let mut scores = Vec::with_capacity(metrics.len());
    let mut failures = Vec::new();
    for metric in metrics {
        let score = match metric.score(case).await {
            Ok(score) => score,
            Err(err) => Score::failed(metric.name(), err),
        };
        if !score.passed {
            failures.push(describe(&score));
        }
        scores.push(score);
    }
    if !failures.is_empty() {
        anyhow::bail!("Metrics failed for input {:?}:\n{}", case.input, failures.join("\n"));
    }
    Ok(scores)
}

/// Fails when fewer than `min_pass_rate` of the cases passed every metric.
pub fn assert_eval_pass_rate(result: &EvalResult, min_pass_rate: f64) -> Result<()> {
    if result.summary.pass_rate < min_pass_rate {
        anyhow::bail!(
            "pass rate {:.1}% is below {:.1}%\n{}\n{}",
            result.summary.pass_rate * 100.0,
            min_pass_rate * 100.0,
            failing_cases(result),
            result.summary_table()
        );
    }
    Ok(())
}

pub fn assert_eval_all_passed(result: &EvalResult) -> Result<()> {
    assert_eval_pass_rate(result, 1.0)
}

fn failing_cases(result: &EvalResult) -> String {
    let mut lines = Vec::new();
    for (idx, cr) in result.cases.iter().enumerate() {
        let id = cr.case.id.clone().unwrap_or_else(|| format!("#{idx}"));
        if let Some(err) = &cr.error {
            lines.push(format!("{id}: task error: {err}"));
            continue;
        }
        for score in cr.scores.iter().filter(|s| !s.passed) {
            lines.push(format!("{id}: {}", describe(score)));
        }
    }
    lines.join("\n")
}

fn describe(score: &Score) -> String {
    let why = score
        .reason
        .clone()
        .or_else(|| score.details.as_ref().and_then(|d| d.get("error")).and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| "no reason given".to_string());
    format!("{} scored {:.2} ({})", score.name, score.value, why)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CaseResult;
    use async_trait::async_trait;

    struct Fixed(f64);

    #[async_trait]
    impl Scorer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn score(&self, _case: &TestCase) -> Result<Score> {
            Ok(Score {
                name: "fixed".into(),
                value: self.0,
                passed: self.0 >= 0.5,
                reason: Some(format!("scored {}", self.0)),
                evaluation_cost: 0.0,
                verbose_logs: None,
                details: None,
            })
        }
    }

    #[tokio::test]
    async fn assert_test_reports_failing_metric() {
        let case = TestCase::new("q", "a");
        assert_eq!(assert_test(&case, &[&Fixed(0.9)]).await.unwrap().len(), 1);

        let err = assert_test(&case, &[&Fixed(0.9), &Fixed(0.2)]).await.unwrap_err();
        assert!(err.to_string().contains("fixed scored 0.20 (scored 0.2)"));
    }

    #[tokio::test]
    async fn usable_with_question_mark_in_tests() -> Result<()> {
        let case = TestCase::new("Capital of France?", "Paris");
        assert_test(&case, &[&Fixed(1.0)]).await?;
        Ok(())
    }

    #[test]
    fn pass_rate_lists_failures() {
        let failing = Score::failed("dag", "model unreachable");
        let cases = vec![CaseResult {
            case: TestCase::with_id("c1", "q", "a"),
            error: None,
            scores: vec![failing],
        }];
        let summary = EvalResult::summarize(&cases);
        let result = EvalResult { cases, summary };

        let err = assert_eval_all_passed(&result).unwrap_err().to_string();
        assert!(err.contains("c1: dag scored 0.00"));
        assert!(err.contains("model unreachable"));
    }
}
