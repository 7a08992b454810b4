use std::sync::Arc;

use dageval_core::*;
use serde_json::json;

/// One yes/no question decides the score. The scripted judge stands in for
/// a real model so the demo runs offline.
fn main() -> anyhow::Result<()> {
    let mut builder = DagBuilder::new();
    let correct = builder.add_verdict(VerdictNode::with_score(true, 10)?)?;
    let wrong = builder.add_verdict(VerdictNode::with_score(false, 0)?)?;
    let root = builder.add_binary_judgment(
        BinaryJudgmentNode::new(
            "Does the actual output correctly name the capital asked about in the input?",
            [correct, wrong],
        )
        .evaluation_params([TestCaseParam::Input, TestCaseParam::ActualOutput]),
    )?;
    let dag = builder.build(root)?;

    let judge = ScriptedModel::new()
        .respond("The final score is", json!({"reason": "The output names Paris, which is correct."}))
        .respond("Actual Output:\nParis", json!({"verdict": true, "reason": "Paris is the capital of France."}))
        .respond("Actual Output:", json!({"verdict": false, "reason": "That is not the capital."}));

    let metric = DagMetric::new("Capital Correctness", dag, Arc::new(judge));

    for output in ["Paris", "Marseille"] {
        let case = TestCase::new("What is the capital of France?", output);
        let outcome = metric.measure(&case)?;
        println!(
            "{output}: score {:.1} ({}) - {}",
            outcome.score,
            if outcome.success { "pass" } else { "fail" },
            outcome.reason.as_deref().unwrap_or("-")
        );
        println!("{}\n", outcome.verbose_logs());
    }

    Ok(())
}
