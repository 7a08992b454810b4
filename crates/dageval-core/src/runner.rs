use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::datasource::DataSource;
use crate::scorer::Scorer;
use crate::task::Task;
use crate::types::{CaseResult, EvalResult, Score, TestCase};

pub struct EvalBuilder {
	data_source: Option<Arc<dyn DataSource>>,
	task: Option<Arc<dyn Task>>,
	scorers: Vec<Arc<dyn Scorer>>,
	concurrency: usize,
}

impl EvalBuilder {
	pub fn new() -> Self {
		Self {
			data_source: None,
			task: None,
			scorers: Vec::new(),
			concurrency: 8,
		}
	}

	pub fn data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
		self.data_source = Some(data_source);
		self
	}

	/// Produce each case's actual output live instead of reading it from the data.
	pub fn task(mut self, task: Arc<dyn Task>) -> Self {
		self.task = Some(task);
		self
	}

	pub fn scorers<I>(mut self, scorers: I) -> Self
	where
		I: IntoIterator<Item = Arc<dyn Scorer>>,
	{
		self.scorers = scorers.into_iter().collect();
		self
	}

	pub fn add_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
		self.scorers.push(scorer);
		self
	}

	pub fn concurrency(mut self, n: usize) -> Self {
		self.concurrency = n.max(1);
		self
	}

	pub fn build(self) -> Result<Eval> {
		if self.scorers.is_empty() {
			anyhow::bail!("at least one scorer must be set");
		}
		Ok(Eval {
			data_source: self.data_source.ok_or_else(|| anyhow::anyhow!("data_source must be set"))?,
			task: self.task,
			scorers: self.scorers,
			concurrency: self.concurrency,
		})
	}
}

impl Default for EvalBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Runs every scorer over every test case, `concurrency` cases at a time.
pub struct Eval {
	data_source: Arc<dyn DataSource>,
	task: Option<Arc<dyn Task>>,
	scorers: Vec<Arc<dyn Scorer>>,
	concurrency: usize,
}

impl Eval {
	pub fn builder() -> EvalBuilder {
		EvalBuilder::new()
	}

	pub async fn run(&self) -> Result<EvalResult> {
		let cases = self.data_source.load().await?;
		info!(cases = cases.len(), scorers = self.scorers.len(), concurrency = self.concurrency, "starting evaluation");
		let results = self.run_cases(cases).await?;
		let summary = EvalResult::summarize(&results);
		info!(passed = summary.passed, total = summary.total, cost = summary.evaluation_cost, "evaluation finished");
		Ok(EvalResult { cases: results, summary })
	}

	async fn run_cases(&self, cases: Vec<TestCase>) -> Result<Vec<CaseResult>> {
		let task = self.task.clone();
		let scorers = self.scorers.clone();
		let stream = stream::iter(cases.into_iter()).map(move |mut case| {
			let task = task.clone();
			let scorers = scorers.clone();
			async move {
				if let Some(task) = task {
					match task.run(&case.input).await {
						Ok(output) => case.actual_output = Some(output),
						Err(err) => {
							warn!(case = ?case.id, error = %err, "task failed");
							return CaseResult {
								case,
								error: Some(err.to_string()),
								scores: Vec::new(),
							};
						}
					}
				}

				let mut scores = Vec::with_capacity(scorers.len());
				for s in &scorers {
					match s.score(&case).await {
						Ok(score) => scores.push(score),
						Err(err) => {
							warn!(case = ?case.id, scorer = s.name(), error = %err, "scorer failed");
							scores.push(Score::failed(s.name(), err));
						}
					}
				}
				CaseResult {
					case,
					error: None,
					scores,
				}
			}
		});

		let results: Vec<CaseResult> = stream
			.buffer_unordered(self.concurrency)
			.collect()
			.await;
		Ok(results)
	}
}
