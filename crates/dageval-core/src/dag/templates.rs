//! Prompt builders for each node kind. Every prompt asks for bare JSON so
//! models without constrained generation can still be parsed.

use crate::types::{TestCase, TestCaseParam};

/// The selected test case fields, each under its display heading.
pub fn test_case_text(case: &TestCase, params: &[TestCaseParam]) -> String {
    params
        .iter()
        .map(|p| format!("{}:\n{}\n", p.display_name(), case.param_text(*p)))
        .collect()
}

pub fn task_output(instructions: &str, text: &str) -> String {
    format!(
        r#"Given the following instructions and text, produce an output that follows the instructions.

Instructions:
{instructions}

{text}

**
IMPORTANT: Please make sure to only return in JSON format, with the "output" key as a string.
Example JSON:
{{
    "output": "your output here"
}}
**

JSON:
"#
    )
}

pub fn binary_verdict(criteria: &str, text: &str) -> String {
    format!(
        r#"{criteria}

{text}

**
IMPORTANT: Please make sure to only return in JSON format, with the "verdict" key as a boolean (true or false) and the "reason" key explaining the verdict in one or two sentences.
Example JSON:
{{
    "verdict": true,
    "reason": "The actual output states the correct capital."
}}
**

JSON:
"#
    )
}

pub fn non_binary_verdict(criteria: &str, text: &str, options: &[String]) -> String {
    let options = options
        .iter()
        .map(|o| format!("\"{o}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{criteria}

{text}

**
IMPORTANT: Please make sure to only return in JSON format, with the "verdict" key being exactly one of [{options}] and the "reason" key explaining the verdict in one or two sentences.
Example JSON:
{{
    "verdict": "one of the options above",
    "reason": "Why this option was chosen."
}}
**

JSON:
"#
    )
}

pub fn evaluation_steps(criteria: &str) -> String {
    format!(
        r#"Given the evaluation criteria below, write 3 to 4 concise steps an evaluator should follow to judge a response against it.

Evaluation Criteria:
{criteria}

**
IMPORTANT: Please make sure to only return in JSON format, with the "steps" key as a list of strings.
Example JSON:
{{
    "steps": ["first step", "second step"]
}}
**

JSON:
"#
    )
}

pub fn criteria_score(steps: &[String], text: &str) -> String {
    let steps = steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Follow the evaluation steps below to score the test case from 0 (worst) to 10 (best).

Evaluation Steps:
{steps}

{text}

**
IMPORTANT: Please make sure to only return in JSON format, with the "score" key as an integer from 0 to 10 and the "reason" key explaining the score.
Example JSON:
{{
    "score": 7,
    "reason": "Mostly follows the steps but misses one detail."
}}
**

JSON:
"#
    )
}

/// Asks the model to justify a final score from the full execution trace.
pub fn final_reason(verbose_steps: &[String], score: f64, metric_name: &str) -> String {
    let trace = verbose_steps.join("\n\n");
    format!(
        r#"The "{metric_name}" metric evaluated a test case by walking a decision tree. Below is the trace of every decision that was taken, in order.

{trace}

The final score is {score:.2} on a scale from 0 to 1, derived from the last verdict reached.

Give a concise reason for this score, referring to the decisions above. Do not mention the tree or node names.

**
IMPORTANT: Please make sure to only return in JSON format, with the "reason" key providing the reason.
Example JSON:
{{
    "reason": "The score is <score> because <your_reason>."
}}
**

JSON:
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_binary_lists_every_option() {
        let prompt = non_binary_verdict(
            "How complete is the answer?",
            "Actual Output:\nParis\n",
            &["complete".into(), "partial".into()],
        );
        assert!(prompt.contains(r#"["complete", "partial"]"#));
        assert!(prompt.starts_with("How complete is the answer?"));
    }

    #[test]
    fn final_reason_embeds_trace_and_score() {
        let prompt = final_reason(&["step one".into(), "step two".into()], 0.7, "Correctness");
        assert!(prompt.contains("step one\n\nstep two"));
        assert!(prompt.contains("The final score is 0.70"));
        assert!(prompt.contains("\"Correctness\""));
    }
}
