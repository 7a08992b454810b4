pub use dageval_types::{
	CaseResult, EvalResult, EvalSummary, Score, TestCase, TestCaseParam, ToolCall,
};
