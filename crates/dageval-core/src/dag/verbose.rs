//! Human-readable trace fragments, one per executed node.

use crate::evaluator::EvaluatorDetails;

use super::node::{BinaryJudgmentNode, NonBinaryJudgmentNode, TaskNode, VerdictNode};

fn label_or_none(label: &Option<String>) -> &str {
    label.as_deref().unwrap_or("None")
}

fn banner(kind: &str, depth: usize) -> String {
    let title = format!("| {kind} | Level == {depth} |");
    format!(
        "{}\n{}\n{}\n",
        "_".repeat(title.len() - 2),
        title,
        "*".repeat(title.len() + 4)
    )
}

fn judgment(kind: &str, depth: usize, label: &Option<String>, criteria: &str, verdict: &str, reason: &str) -> String {
    format!(
        "{}Label: {}\n\nCriteria:\n{}\n\nVerdict: {}\nReason: {}\n",
        banner(kind, depth),
        label_or_none(label),
        criteria,
        verdict,
        reason
    )
}

pub fn binary_judgment(node: &BinaryJudgmentNode, depth: usize, verdict: bool, reason: &str) -> String {
    judgment(
        "BinaryJudgmentNode",
        depth,
        &node.label,
        &node.criteria,
        &verdict.to_string(),
        reason,
    )
}

pub fn non_binary_judgment(node: &NonBinaryJudgmentNode, depth: usize, verdict: &str, reason: &str) -> String {
    judgment("NonBinaryJudgmentNode", depth, &node.label, &node.criteria, verdict, reason)
}

pub fn task(node: &TaskNode, depth: usize, output: &str) -> String {
    format!(
        "{}Label: {}\n\nInstructions:\n{}\n\n{}:\n{}\n",
        banner("TaskNode", depth),
        label_or_none(&node.label),
        node.instructions,
        node.output_label,
        output
    )
}

/// A sub-evaluation run under a verdict node, as seen by the log.
pub struct NestedRun<'a> {
    pub name: &'a str,
    pub details: &'a EvaluatorDetails,
}

pub fn verdict(node: &VerdictNode, depth: usize, nested: Option<NestedRun<'_>>) -> String {
    let kind = match &nested {
        Some(run) => format!("{} Metric", run.name),
        None => "Deterministic".to_string(),
    };
    let mut log = format!("{}Verdict: {}\nType: {}", banner("VerdictNode", depth), node.verdict, kind);

    match nested.map(|run| run.details) {
        Some(EvaluatorDetails::Criteria { criteria, steps }) => {
            log.push_str(&format!("\n\nCriteria:\n{}\n", criteria.as_deref().unwrap_or("None")));
            log.push_str("Evaluation Steps:\n");
            log.push_str(&serde_json::to_string_pretty(steps).unwrap_or_default());
        }
        Some(EvaluatorDetails::Verbose(trace)) => {
            log.push_str("\n\n");
            log.push_str(trace);
        }
        None => {}
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_frames_kind_and_depth() {
        let node = BinaryJudgmentNode::new("Is it correct?", []);
        let log = binary_judgment(&node, 2, true, "It is.");
        let mut lines = log.lines();
        assert!(lines.next().unwrap().chars().all(|c| c == '_'));
        assert_eq!(lines.next().unwrap(), "| BinaryJudgmentNode | Level == 2 |");
        assert!(log.contains("Label: None"));
        assert!(log.contains("Criteria:\nIs it correct?\n\nVerdict: true\nReason: It is.\n"));
    }

    #[test]
    fn task_fragment_uses_output_label() {
        let node = TaskNode::new("List the facts.", "Facts", []).label("extract");
        let log = task(&node, 0, "- sky is blue");
        assert!(log.contains("Label: extract"));
        assert!(log.ends_with("Facts:\n- sky is blue\n"));
    }

    #[test]
    fn verdict_fragment_describes_nested_evaluator() {
        let node = VerdictNode::with_score("partial", 5).unwrap();
        assert!(verdict(&node, 1, None).ends_with("Verdict: partial\nType: Deterministic"));

        let details = EvaluatorDetails::Criteria {
            criteria: Some("Be concise".into()),
            steps: vec!["Check length".into()],
        };
        let log = verdict(&node, 1, Some(NestedRun { name: "Brevity", details: &details }));
        assert!(log.contains("Type: Brevity Metric"));
        assert!(log.contains("Criteria:\nBe concise\nEvaluation Steps:\n["));
    }
}
