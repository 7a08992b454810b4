use std::sync::Arc;
use std::time::Duration;

use dageval_core::*;
use serde_json::json;

/// A task node extracts the headings of a meeting summary; two judgments
/// inspect them and both funnel into the same formatting check, which runs
/// only once both of its parents have arrived.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut b = DagBuilder::new();

    let tidy = b.add_verdict(VerdictNode::with_score("tidy", 10)?)?;
    let messy = b.add_verdict(VerdictNode::with_score("messy", 6)?)?;
    let formatting = b.add_non_binary_judgment(
        NonBinaryJudgmentNode::new("How consistent is the heading formatting?", [tidy, messy])
            .label("Formatting"),
    )?;

    let intro_ok = b.add_verdict(VerdictNode::with_child(true, formatting))?;
    let intro_missing = b.add_verdict(VerdictNode::with_score(false, 2)?)?;
    let has_intro = b.add_binary_judgment(BinaryJudgmentNode::new(
        "Is there an introduction heading?",
        [intro_ok, intro_missing],
    ))?;

    let actions_ok = b.add_verdict(VerdictNode::with_child(true, formatting))?;
    let actions_missing = b.add_verdict(VerdictNode::with_score(false, 3)?)?;
    let has_actions = b.add_binary_judgment(BinaryJudgmentNode::new(
        "Is there an action items heading?",
        [actions_ok, actions_missing],
    ))?;

    let extract = b.add_task(
        TaskNode::new(
            "Extract all headings in the summary.",
            "Summary headings",
            [has_intro, has_actions],
        )
        .evaluation_params([TestCaseParam::ActualOutput]),
    )?;
    let dag = b.build(extract)?;
    println!("formatting check waits for {:?} arrivals", dag.indegree(formatting));

    let judge = Arc::new(
        ScriptedModel::new()
            .respond("The final score is", json!({"reason": "All sections present, formatting consistent."}))
            .respond("Extract all headings", json!({"output": "Intro\nAction Items"}))
            .respond("introduction heading", json!({"verdict": true, "reason": "Intro is present."}))
            .respond("action items heading", json!({"verdict": true, "reason": "Action Items is present."}))
            .respond("heading formatting", json!({"verdict": "tidy", "reason": "Same casing throughout."}))
            .cost_per_call(0.001)
            .delay(Duration::from_millis(20)),
    );

    let metric = DagMetric::new("Summary Structure", dag, judge.clone());
    let case = TestCase::new(
        "Summarize the meeting.",
        "Intro\nWe met.\n\nAction Items\n- ship it",
    );
    let outcome = metric.a_measure(&case).await?;

    println!("score {:.1}, cost {:.3}, model calls {}", outcome.score, outcome.evaluation_cost, judge.calls());
    println!("{}", outcome.verbose_logs());
    Ok(())
}
