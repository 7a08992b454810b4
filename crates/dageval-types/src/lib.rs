use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::Tabled;

/// A tool invocation made (or expected to be made) by the application under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Arguments the tool was called with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_parameters: Option<Value>,

    /// What the tool returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_parameters: None,
            output: None,
        }
    }

    pub fn input_parameters(mut self, params: Value) -> Self {
        self.input_parameters = Some(params);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

/// A single interaction with the application under test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_called: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_tools: Option<Vec<ToolCall>>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, actual_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            actual_output: Some(actual_output.into()),
            ..Self::default()
        }
    }

    pub fn with_id(id: impl Into<String>, input: impl Into<String>, actual_output: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(input, actual_output)
        }
    }

    pub fn expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn context(mut self, context: Vec<String>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn retrieval_context(mut self, context: Vec<String>) -> Self {
        self.retrieval_context = Some(context);
        self
    }

    pub fn tools_called(mut self, tools: Vec<ToolCall>) -> Self {
        self.tools_called = Some(tools);
        self
    }

    pub fn expected_tools(mut self, tools: Vec<ToolCall>) -> Self {
        self.expected_tools = Some(tools);
        self
    }

    /// Render one field as prompt text. Absent fields render as `None`,
    /// lists and tool calls as JSON.
    pub fn param_text(&self, param: TestCaseParam) -> String {
        fn list(v: &Option<Vec<String>>) -> String {
            match v {
                Some(items) => serde_json::to_string(items).unwrap_or_default(),
                None => "None".to_string(),
            }
        }
        fn tools(v: &Option<Vec<ToolCall>>) -> String {
            match v {
                Some(calls) => serde_json::to_string(calls).unwrap_or_default(),
                None => "None".to_string(),
            }
        }

        match param {
            TestCaseParam::Input => self.input.clone(),
            TestCaseParam::ActualOutput => self.actual_output.clone().unwrap_or_else(|| "None".to_string()),
            TestCaseParam::ExpectedOutput => self.expected_output.clone().unwrap_or_else(|| "None".to_string()),
            TestCaseParam::Context => list(&self.context),
            TestCaseParam::RetrievalContext => list(&self.retrieval_context),
            TestCaseParam::ToolsCalled => tools(&self.tools_called),
            TestCaseParam::ExpectedTools => tools(&self.expected_tools),
        }
    }
}

/// Selects a field of a [`TestCase`] to embed in a node's prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseParam {
    Input,
    ActualOutput,
    ExpectedOutput,
    Context,
    RetrievalContext,
    ToolsCalled,
    ExpectedTools,
}

impl TestCaseParam {
    /// Heading used when the field is embedded in a prompt.
    pub fn display_name(&self) -> &'static str {
        match self {
            TestCaseParam::Input => "Input",
            TestCaseParam::ActualOutput => "Actual Output",
            TestCaseParam::ExpectedOutput => "Expected Output",
            TestCaseParam::Context => "Context",
            TestCaseParam::RetrievalContext => "Retrieval Context",
            TestCaseParam::ToolsCalled => "Tools Called",
            TestCaseParam::ExpectedTools => "Expected Tools",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
	pub name: String,
	pub value: f64,
	pub passed: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(default)]
	pub evaluation_cost: f64,
	/// Execution trace of the metric that produced this score
	#[serde(skip_serializing_if = "Option::is_none")]
	pub verbose_logs: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

impl Score {
	/// A failed score recording why the metric could not run.
	pub fn failed(name: impl Into<String>, error: impl std::fmt::Display) -> Self {
		Self {
			name: name.into(),
			value: 0.0,
			passed: false,
			reason: None,
			evaluation_cost: 0.0,
			verbose_logs: None,
			details: Some(serde_json::json!({ "error": error.to_string() })),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
	pub case: TestCase,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub scores: Vec<Score>,
}

impl CaseResult {
	pub fn all_passed(&self) -> bool {
		!self.scores.is_empty() && self.scores.iter().all(|s| s.passed)
	}

	pub fn avg_score(&self) -> f64 {
		if self.scores.is_empty() {
			return 0.0;
		}
		let sum: f64 = self.scores.iter().map(|s| s.value).sum();
		sum / (self.scores.len() as f64)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
	pub total: usize,
	pub passed: usize,
	pub pass_rate: f64,
	pub avg_score: f64,
	pub evaluation_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
	pub cases: Vec<CaseResult>,
	pub summary: EvalSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SummaryRow {
	id: String,
	passed: String,
	avg_score: f64,
	input: String,
	actual_output: String,
	reason: String,
}

impl EvalResult {
	pub fn summarize(cases: &[CaseResult]) -> EvalSummary {
		let total = cases.len();
		let mut passed = 0usize;
		let mut score_sum = 0.0f64;
		let mut score_count = 0usize;
		let mut evaluation_cost = 0.0f64;

		for cr in cases {
			if cr.all_passed() {
				passed += 1;
			}
			for s in &cr.scores {
				score_sum += s.value;
				score_count += 1;
				evaluation_cost += s.evaluation_cost;
			}
		}

		let pass_rate = if total == 0 { 0.0 } else { passed as f64 / total as f64 };
		let avg_score = if score_count == 0 { 0.0 } else { score_sum / score_count as f64 };

		EvalSummary { total, passed, pass_rate, avg_score, evaluation_cost }
	}

	pub fn summary_table(&self) -> String {
		use tabled::Table;
		let rows: Vec<SummaryRow> = self.cases.iter().map(|cr| {
			let id = cr.case.id.clone().unwrap_or_else(|| "-".to_string());
			let passed = if cr.all_passed() { "✓" } else { " " };
			let reason = match (&cr.error, cr.scores.iter().find_map(|s| s.reason.as_deref())) {
				(Some(err), _) => format!("error: {err}"),
				(None, Some(reason)) => reason.to_string(),
				(None, None) => "-".to_string(),
			};

			SummaryRow {
				id,
				passed: passed.to_string(),
				avg_score: cr.avg_score(),
				input: truncate(cr.case.input.clone(), 48),
				actual_output: truncate(cr.case.actual_output.clone().unwrap_or_default(), 48),
				reason: truncate(reason, 64),
			}
		}).collect();

		let table = Table::new(rows);
		let table_str = table.to_string();

		let summary_text = format!(
			"Total: {}  Passed: {}  Pass rate: {:.1}%  Avg score: {:.3}  Cost: {:.4}",
			self.summary.total,
			self.summary.passed,
			self.summary.pass_rate * 100.0,
			self.summary.avg_score,
			self.summary.evaluation_cost
		);

		format!("{}\n\n{}\n", table_str, summary_text)
	}
}

fn truncate(s: String, max_len: usize) -> String {
	let s = s.replace('\n', " ");
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn param_text_renders_missing_fields_as_none() {
		let case = TestCase::new("What is 2 + 2?", "4");
		assert_eq!(case.param_text(TestCaseParam::Input), "What is 2 + 2?");
		assert_eq!(case.param_text(TestCaseParam::ActualOutput), "4");
		assert_eq!(case.param_text(TestCaseParam::ExpectedOutput), "None");
		assert_eq!(case.param_text(TestCaseParam::RetrievalContext), "None");
	}

	#[test]
	fn param_text_serializes_tool_calls() {
		let case = TestCase::new("weather?", "sunny").tools_called(vec![
			ToolCall::new("get_weather").input_parameters(json!({"city": "Paris"})),
		]);
		let text = case.param_text(TestCaseParam::ToolsCalled);
		assert_eq!(text, r#"[{"name":"get_weather","input_parameters":{"city":"Paris"}}]"#);
	}

	#[test]
	fn test_case_deserializes_with_defaults() {
		let case: TestCase = serde_json::from_value(json!({
			"input": "hi",
			"actual_output": "hello",
			"context": ["greeting"]
		}))
		.unwrap();
		assert_eq!(case.id, None);
		assert_eq!(case.context, Some(vec!["greeting".to_string()]));
		assert!(case.tools_called.is_none());
	}

	#[test]
	fn summarize_counts_passes_and_cost() {
		let score = |value: f64, passed: bool| Score {
			name: "dag".into(),
			value,
			passed,
			reason: None,
			evaluation_cost: 0.5,
			verbose_logs: None,
			details: None,
		};
		let cases = vec![
			CaseResult { case: TestCase::new("a", "b"), error: None, scores: vec![score(1.0, true)] },
			CaseResult { case: TestCase::new("c", "d"), error: None, scores: vec![score(0.0, false)] },
		];
		let summary = EvalResult::summarize(&cases);
		assert_eq!(summary.total, 2);
		assert_eq!(summary.passed, 1);
		assert_eq!(summary.pass_rate, 0.5);
		assert_eq!(summary.avg_score, 0.5);
		assert_eq!(summary.evaluation_cost, 1.0);
	}
}
