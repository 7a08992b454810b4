use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::error::{DagError, EvalError};
use crate::evaluator::Measurement;
use crate::model::{self, JudgeModel};
use crate::types::{TestCase, TestCaseParam};

use super::counter::{Arrival, DependencyCounter, DepthTracker};
use super::graph::{Dag, Entry};
use super::node::{NodeId, VerdictChild, VerdictNode, VerdictTarget, VerdictValue};
use super::schema::{
    BinaryJudgmentVerdict, ConstrainedChoice, MetricScoreReason, ResultShape, TaskNodeOutput,
};
use super::templates;
use super::verbose::{self, NestedRun};

/// What one run of a DAG accumulated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub score: Option<f64>,
    pub reason: Option<String>,
    pub evaluation_cost: f64,
    pub verbose_steps: Vec<String>,
}

#[derive(Debug)]
struct NodeState {
    pending: DependencyCounter,
    depth: DepthTracker,
    output: OnceLock<String>,
    verdict: OnceLock<VerdictValue>,
}

struct Prompt {
    text: String,
    shape: ResultShape,
}

/// The outcome plus how many times a score has been set. A reason is kept
/// only if no other leaf scored after the one it was asked for.
#[derive(Debug, Default)]
struct Tally {
    outcome: RunOutcome,
    scored: usize,
}

/// Execution state for one DAG against one test case.
///
/// Pending counts start from the edge counts recorded at construction, so
/// each node's payload runs at most once per run: when its last parent
/// arrives. [`execute`](Self::execute) walks the graph depth-first;
/// [`a_execute`](Self::a_execute) fans out to children concurrently and
/// joins them before returning.
pub struct DagRun<'d> {
    dag: &'d Dag,
    model: Arc<dyn JudgeModel>,
    metric_name: String,
    include_reason: bool,
    nodes: Vec<NodeState>,
    tally: Mutex<Tally>,
}

impl<'d> DagRun<'d> {
    pub fn new(
        dag: &'d Dag,
        model: Arc<dyn JudgeModel>,
        metric_name: impl Into<String>,
        include_reason: bool,
    ) -> Self {
        let nodes = dag
            .indegree
            .iter()
            .map(|&edges| NodeState {
                pending: DependencyCounter::new(edges),
                depth: DepthTracker::default(),
                output: OnceLock::new(),
                verdict: OnceLock::new(),
            })
            .collect();
        Self {
            dag,
            model,
            metric_name: metric_name.into(),
            include_reason,
            nodes,
            tally: Mutex::new(Tally::default()),
        }
    }

    /// Arrivals `id` still waits for.
    pub fn pending(&self, id: NodeId) -> usize {
        self.nodes.get(id.0).map_or(0, |n| n.pending.remaining())
    }

    /// Output of a task node, once it has run.
    pub fn output(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0)?.output.get().map(String::as_str)
    }

    /// Resolved verdict of a judgment node, once it has run.
    pub fn verdict(&self, id: NodeId) -> Option<&VerdictValue> {
        self.nodes.get(id.0)?.verdict.get()
    }

    pub fn snapshot(&self) -> RunOutcome {
        self.with_outcome(|o| o.clone())
    }

    pub fn into_outcome(self) -> RunOutcome {
        self.tally.into_inner().unwrap_or_else(PoisonError::into_inner).outcome
    }

    pub fn execute(&self, id: NodeId, case: &TestCase, depth: usize) -> Result<(), EvalError> {
        let entry = self.dag.entry(id)?;
        let Some(depth) = self.admit(id, entry, depth) else {
            return Ok(());
        };
        match entry {
            Entry::Verdict { node, .. } => match &node.target {
                VerdictTarget::Score(score) => {
                    if let Some((seq, prompt)) = self.settle(node, depth, *score) {
                        let (value, cost) = model::generate_value(self.model.as_ref(), &prompt.text, &prompt.shape)?;
                        self.record_reason(seq, &prompt.shape, value, cost)?;
                    }
                }
                VerdictTarget::Child(VerdictChild::Node(child)) => self.execute(*child, case, depth)?,
                VerdictTarget::Child(VerdictChild::Evaluator(evaluator)) => {
                    let measurement = evaluator.fork(self.model.clone()).measure(case)?;
                    self.adopt(node, depth, evaluator.name(), measurement);
                }
            },
            _ => {
                let prompt = self.prompt(entry, case);
                let (value, cost) = model::generate_value(self.model.as_ref(), &prompt.text, &prompt.shape)?;
                self.record(id, entry, depth, &prompt.shape, value, cost)?;
                for &child in entry.children() {
                    self.execute(child, case, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    pub fn a_execute<'s>(
        &'s self,
        id: NodeId,
        case: &'s TestCase,
        depth: usize,
    ) -> BoxFuture<'s, Result<(), EvalError>> {
        async move {
            let entry = self.dag.entry(id)?;
            let Some(depth) = self.admit(id, entry, depth) else {
                return Ok(());
            };
            match entry {
                Entry::Verdict { node, .. } => match &node.target {
                    VerdictTarget::Score(score) => {
                        if let Some((seq, prompt)) = self.settle(node, depth, *score) {
                            let (value, cost) =
                                model::a_generate_value(self.model.as_ref(), &prompt.text, &prompt.shape).await?;
                            self.record_reason(seq, &prompt.shape, value, cost)?;
                        }
                    }
                    VerdictTarget::Child(VerdictChild::Node(child)) => {
                        self.a_execute(*child, case, depth).await?
                    }
                    VerdictTarget::Child(VerdictChild::Evaluator(evaluator)) => {
                        let forked = evaluator.fork(self.model.clone());
                        let measurement = forked.a_measure(case).await?;
                        self.adopt(node, depth, evaluator.name(), measurement);
                    }
                },
                _ => {
                    let prompt = self.prompt(entry, case);
                    let (value, cost) =
                        model::a_generate_value(self.model.as_ref(), &prompt.text, &prompt.shape).await?;
                    self.record(id, entry, depth, &prompt.shape, value, cost)?;

                    let children = entry
                        .children()
                        .iter()
                        .map(|&child| self.a_execute(child, case, depth + 1));
                    join_all(children)
                        .await
                        .into_iter()
                        .collect::<Result<Vec<()>, EvalError>>()?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Registers one arrival at `id`. Returns the resolved depth when this
    /// arrival owns the payload and the node's branch was taken.
    fn admit(&self, id: NodeId, entry: &Entry, depth: usize) -> Option<usize> {
        let state = self.nodes.get(id.0)?;
        state.depth.raise(depth);
        match state.pending.arrive() {
            Arrival::Ready => {}
            Arrival::Waiting { remaining } => {
                debug!(node = %id, remaining, "waiting for remaining parents");
                return None;
            }
            Arrival::Spent => {
                debug!(node = %id, "node already executed");
                return None;
            }
        }

        if let Entry::Verdict {
            node,
            parent: Some(parent),
        } = entry
        {
            if self.verdict(*parent) != Some(&node.verdict) {
                debug!(node = %id, verdict = %node.verdict, "verdict not taken, pruning branch");
                return None;
            }
        }

        let depth = state.depth.get();
        debug!(node = %id, kind = entry.kind().as_str(), depth, "executing node");
        Some(depth)
    }

    fn context(&self, parents: &[NodeId], params: &[TestCaseParam], case: &TestCase) -> String {
        let mut text = String::new();
        for parent in parents {
            if let Ok(Entry::Task { node, .. }) = self.dag.entry(*parent) {
                let output = self.output(*parent).unwrap_or_default();
                text.push_str(&format!("{}:\n{}\n\n", node.output_label, output));
            }
        }
        text.push_str(&templates::test_case_text(case, params));
        text
    }

    fn prompt(&self, entry: &Entry, case: &TestCase) -> Prompt {
        match entry {
            Entry::Task { node, parents } => Prompt {
                text: templates::task_output(
                    &node.instructions,
                    &self.context(parents, &node.evaluation_params, case),
                ),
                shape: TaskNodeOutput::shape(),
            },
            Entry::Binary { node, parents } => Prompt {
                text: templates::binary_verdict(
                    &node.criteria,
                    &self.context(parents, &node.evaluation_params, case),
                ),
                shape: BinaryJudgmentVerdict::shape(),
            },
            Entry::NonBinary {
                node,
                options,
                shape,
                parents,
            } => Prompt {
                text: templates::non_binary_verdict(
                    &node.criteria,
                    &self.context(parents, &node.evaluation_params, case),
                    options,
                ),
                shape: shape.clone(),
            },
            // verdict nodes are settled without a prompt of their own
            Entry::Verdict { .. } => Prompt {
                text: String::new(),
                shape: MetricScoreReason::shape(),
            },
        }
    }

    fn record(
        &self,
        id: NodeId,
        entry: &Entry,
        depth: usize,
        shape: &ResultShape,
        value: Value,
        cost: f64,
    ) -> Result<(), EvalError> {
        let state = self.nodes.get(id.0).ok_or(DagError::UnknownNode(id))?;
        let fragment = match entry {
            Entry::Task { node, .. } => {
                let out: TaskNodeOutput = shape.from_validated(value)?;
                let fragment = verbose::task(node, depth, &out.output);
                let _ = state.output.set(out.output);
                fragment
            }
            Entry::Binary { node, .. } => {
                let out: BinaryJudgmentVerdict = shape.from_validated(value)?;
                let _ = state.verdict.set(VerdictValue::Bool(out.verdict));
                verbose::binary_judgment(node, depth, out.verdict, &out.reason)
            }
            Entry::NonBinary { node, options, .. } => {
                let out = shape.from_validated::<ConstrainedChoice>(value)?.check(options)?;
                let fragment = verbose::non_binary_judgment(node, depth, &out.verdict, &out.reason);
                let _ = state.verdict.set(VerdictValue::Text(out.verdict));
                fragment
            }
            Entry::Verdict { .. } => return Ok(()),
        };
        self.with_outcome(|o| {
            o.evaluation_cost += cost;
            o.verbose_steps.push(fragment);
        });
        debug!(node = %id, kind = entry.kind().as_str(), cost, "node resolved");
        Ok(())
    }

    /// Records a terminal score. Returns the reason prompt when reasons are
    /// wanted, built from the trace as it stands once this leaf is logged,
    /// with the sequence number of this score.
    fn settle(&self, node: &VerdictNode, depth: usize, score: u8) -> Option<(usize, Prompt)> {
        let fragment = verbose::verdict(node, depth, None);
        let score = f64::from(score) / 10.0;
        debug!(verdict = %node.verdict, score, "reached scoring verdict");
        self.with_tally(|t| {
            t.scored += 1;
            t.outcome.verbose_steps.push(fragment);
            t.outcome.score = Some(score);
            self.include_reason.then(|| {
                let prompt = Prompt {
                    text: templates::final_reason(&t.outcome.verbose_steps, score, &self.metric_name),
                    shape: MetricScoreReason::shape(),
                };
                (t.scored, prompt)
            })
        })
    }

    fn record_reason(&self, seq: usize, shape: &ResultShape, value: Value, cost: f64) -> Result<(), EvalError> {
        let out: MetricScoreReason = shape.from_validated(value)?;
        self.with_tally(|t| {
            t.outcome.evaluation_cost += cost;
            if t.scored == seq {
                t.outcome.reason = Some(out.reason);
            } else {
                debug!(seq, latest = t.scored, "dropping reason for a superseded score");
            }
        });
        Ok(())
    }

    /// Takes over a nested evaluator's result as the result of the whole run.
    fn adopt(&self, node: &VerdictNode, depth: usize, name: &str, measurement: Measurement) {
        let fragment = verbose::verdict(
            node,
            depth,
            Some(NestedRun {
                name,
                details: &measurement.details,
            }),
        );
        debug!(evaluator = name, score = measurement.score, "adopting nested evaluation");
        self.with_tally(|t| {
            t.scored += 1;
            t.outcome.verbose_steps.push(fragment);
            t.outcome.score = Some(measurement.score);
            t.outcome.evaluation_cost += measurement.evaluation_cost;
            if self.include_reason {
                t.outcome.reason = measurement.reason.clone();
            }
        });
    }

    fn with_outcome<R>(&self, f: impl FnOnce(&mut RunOutcome) -> R) -> R {
        self.with_tally(|t| f(&mut t.outcome))
    }

    fn with_tally<R>(&self, f: impl FnOnce(&mut Tally) -> R) -> R {
        let mut guard = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{BinaryJudgmentNode, DagBuilder, NonBinaryJudgmentNode, TaskNode};
    use crate::model::ScriptedModel;
    use serde_json::json;

    fn correctness_dag() -> (Dag, NodeId, NodeId, NodeId) {
        let mut b = DagBuilder::new();
        let yes = b.add_verdict(VerdictNode::with_score(true, 10).unwrap()).unwrap();
        let no = b.add_verdict(VerdictNode::with_score(false, 0).unwrap()).unwrap();
        let root = b
            .add_binary_judgment(
                BinaryJudgmentNode::new("Is the answer correct?", [yes, no])
                    .evaluation_params([TestCaseParam::Input, TestCaseParam::ActualOutput]),
            )
            .unwrap();
        (b.build(root).unwrap(), root, yes, no)
    }

    #[test]
    fn taken_branch_scores_and_untaken_branch_is_pruned() {
        let (dag, root, yes, no) = correctness_dag();
        let model = Arc::new(
            ScriptedModel::new().respond("Is the answer correct?", json!({"verdict": true, "reason": "Paris is right"})),
        );
        let run = DagRun::new(&dag, model.clone(), "Correctness", false);
        let case = TestCase::new("Capital of France?", "Paris");
        run.execute(root, &case, 0).unwrap();

        assert_eq!(run.verdict(root), Some(&VerdictValue::Bool(true)));
        assert_eq!(run.pending(yes), 0);
        assert_eq!(run.pending(no), 0);

        let outcome = run.into_outcome();
        assert_eq!(outcome.score, Some(1.0));
        assert_eq!(outcome.reason, None);
        assert_eq!(outcome.verbose_steps.len(), 2);
        assert!(outcome.verbose_steps[0].contains("| BinaryJudgmentNode | Level == 0 |"));
        assert!(outcome.verbose_steps[1].contains("| VerdictNode | Level == 1 |"));
        assert!(outcome.verbose_steps[1].contains("Verdict: true"));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn prompt_embeds_params_and_parent_task_output() {
        let mut b = DagBuilder::new();
        let yes = b.add_verdict(VerdictNode::with_score(true, 10).unwrap()).unwrap();
        let no = b.add_verdict(VerdictNode::with_score(false, 0).unwrap()).unwrap();
        let judge = b
            .add_binary_judgment(BinaryJudgmentNode::new("Are all facts supported?", [yes, no]))
            .unwrap();
        let task = b
            .add_task(
                TaskNode::new("Extract the facts.", "Extracted Facts", [judge])
                    .evaluation_params([TestCaseParam::ActualOutput]),
            )
            .unwrap();
        let dag = b.build(task).unwrap();

        let model = Arc::new(
            ScriptedModel::new()
                .respond("Extract the facts.", json!({"output": "- Paris is the capital"}))
                .respond("Are all facts supported?", json!({"verdict": false, "reason": "no context"})),
        );
        let run = DagRun::new(&dag, model.clone(), "Facts", false);
        run.execute(task, &TestCase::new("q", "Paris is the capital of France."), 0)
            .unwrap();

        let prompts = model.prompts();
        assert!(prompts[0].contains("Actual Output:\nParis is the capital of France.\n"));
        assert!(prompts[1].contains("Extracted Facts:\n- Paris is the capital\n\n"));
        assert_eq!(run.output(task), Some("- Paris is the capital"));
        assert_eq!(run.snapshot().score, Some(0.0));
    }

    #[test]
    fn reexecuting_a_fired_node_is_a_noop() {
        let (dag, root, _, _) = correctness_dag();
        let model = Arc::new(
            ScriptedModel::new()
                .respond("Is the answer correct?", json!({"verdict": true, "reason": "ok"}))
                .cost_per_call(0.25),
        );
        let run = DagRun::new(&dag, model.clone(), "Correctness", false);
        let case = TestCase::new("q", "a");
        run.execute(root, &case, 0).unwrap();
        run.execute(root, &case, 0).unwrap();

        let outcome = run.into_outcome();
        assert_eq!(outcome.verbose_steps.len(), 2);
        assert_eq!(outcome.evaluation_cost, 0.25);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn leaf_reason_sees_whole_trace() {
        let (dag, root, _, _) = correctness_dag();
        let model = Arc::new(
            ScriptedModel::new()
                .respond("The final score is", json!({"reason": "The answer names the right city."}))
                .respond("Is the answer correct?", json!({"verdict": true, "reason": "ok"})),
        );
        let run = DagRun::new(&dag, model.clone(), "Correctness", true);
        run.execute(root, &TestCase::new("q", "a"), 0).unwrap();

        let outcome = run.into_outcome();
        assert_eq!(outcome.reason.as_deref(), Some("The answer names the right city."));
        let reason_prompt = &model.prompts()[1];
        assert!(reason_prompt.contains("| BinaryJudgmentNode | Level == 0 |"));
        assert!(reason_prompt.contains("| VerdictNode | Level == 1 |"));
        assert!(reason_prompt.contains("The final score is 1.00"));
    }

    #[test]
    fn non_binary_takes_matching_option() {
        let mut b = DagBuilder::new();
        let full = b.add_verdict(VerdictNode::with_score("complete", 10).unwrap()).unwrap();
        let part = b.add_verdict(VerdictNode::with_score("partial", 5).unwrap()).unwrap();
        let none = b.add_verdict(VerdictNode::with_score("missing", 0).unwrap()).unwrap();
        let root = b
            .add_non_binary_judgment(NonBinaryJudgmentNode::new("How complete is it?", [full, part, none]))
            .unwrap();
        let dag = b.build(root).unwrap();

        let model = Arc::new(
            ScriptedModel::new().respond("How complete", json!({"verdict": "partial", "reason": "half"})),
        );
        let run = DagRun::new(&dag, model, "Completeness", false);
        run.execute(root, &TestCase::new("q", "a"), 0).unwrap();
        assert_eq!(run.verdict(root), Some(&VerdictValue::from("partial")));
        assert_eq!(run.snapshot().score, Some(0.5));
    }

    #[test]
    fn model_errors_propagate() {
        let (dag, root, _, _) = correctness_dag();
        let run = DagRun::new(&dag, Arc::new(ScriptedModel::new()), "Correctness", false);
        let err = run.execute(root, &TestCase::new("q", "a"), 0).unwrap_err();
        assert!(matches!(err, EvalError::Model(crate::error::ModelError::Request(_))));
    }

    #[test]
    fn foreign_node_id_is_rejected() {
        let (dag, _, _, _) = correctness_dag();
        let run = DagRun::new(&dag, Arc::new(ScriptedModel::new()), "Correctness", false);
        let err = run.execute(NodeId(6), &TestCase::new("q", "a"), 0).unwrap_err();
        assert!(matches!(err, EvalError::Dag(DagError::UnknownNode(NodeId(6)))));
        assert_eq!(run.pending(NodeId(6)), 0);
    }

    #[tokio::test]
    async fn foreign_node_id_is_rejected_concurrently() {
        let (dag, _, _, _) = correctness_dag();
        let run = DagRun::new(&dag, Arc::new(ScriptedModel::new()), "Correctness", false);
        let case = TestCase::new("q", "a");
        let err = run.a_execute(NodeId(6), &case, 0).await.unwrap_err();
        assert!(matches!(err, EvalError::Dag(DagError::UnknownNode(_))));
    }

    /// Task -> {polite (true -> 10), brief (false -> 3)}: the last leaf to
    /// settle scores 0.3 in both walks.
    fn two_leaf_dag() -> (Dag, NodeId) {
        let mut b = DagBuilder::new();
        let polite = b.add_verdict(VerdictNode::with_score(true, 10).unwrap()).unwrap();
        let rude = b.add_verdict(VerdictNode::with_score(false, 0).unwrap()).unwrap();
        let terse = b.add_verdict(VerdictNode::with_score(true, 8).unwrap()).unwrap();
        let wordy = b.add_verdict(VerdictNode::with_score(false, 3).unwrap()).unwrap();
        let tone = b
            .add_binary_judgment(BinaryJudgmentNode::new("Is the summary polite?", [polite, rude]))
            .unwrap();
        let length = b
            .add_binary_judgment(BinaryJudgmentNode::new("Is the summary brief?", [terse, wordy]))
            .unwrap();
        let root = b
            .add_task(TaskNode::new("Summarize the answer.", "Summary", [tone, length]))
            .unwrap();
        (b.build(root).unwrap(), root)
    }

    #[tokio::test]
    async fn slow_reason_for_superseded_score_is_dropped() {
        let (dag, root) = two_leaf_dag();
        let model = Arc::new(
            ScriptedModel::new()
                .respond("The final score is 1.00", json!({"reason": "reason for 1.0"}))
                .respond("The final score is 0.30", json!({"reason": "reason for 0.3"}))
                .respond("Summarize the answer.", json!({"output": "A short reply."}))
                .respond("Is the summary polite?", json!({"verdict": true, "reason": "kind"}))
                .respond("Is the summary brief?", json!({"verdict": false, "reason": "rambles"}))
                .delay_on("The final score is 1.00", std::time::Duration::from_millis(80))
                .cost_per_call(0.1),
        );
        let case = TestCase::new("q", "a");

        let sync_run = DagRun::new(&dag, model.clone(), "Summary", true);
        sync_run.execute(root, &case, 0).unwrap();
        let async_run = DagRun::new(&dag, model.clone(), "Summary", true);
        async_run.a_execute(root, &case, 0).await.unwrap();

        let sync_outcome = sync_run.into_outcome();
        let async_outcome = async_run.into_outcome();
        assert_eq!(sync_outcome.score, Some(0.3));
        assert_eq!(sync_outcome.reason.as_deref(), Some("reason for 0.3"));
        assert_eq!(async_outcome.score, Some(0.3));
        assert_eq!(async_outcome.reason.as_deref(), Some("reason for 0.3"));
        // the dropped reason call is still paid for
        assert!((async_outcome.evaluation_cost - sync_outcome.evaluation_cost).abs() < 1e-9);
    }

    #[tokio::test]
    async fn async_run_matches_sync_run() {
        let (dag, root, _, _) = correctness_dag();
        let model = Arc::new(
            ScriptedModel::new()
                .respond("The final score is", json!({"reason": "correct"}))
                .respond("Is the answer correct?", json!({"verdict": false, "reason": "wrong city"}))
                .cost_per_call(0.1),
        );
        let case = TestCase::new("q", "a");

        let sync_run = DagRun::new(&dag, model.clone(), "Correctness", true);
        sync_run.execute(root, &case, 0).unwrap();
        let async_run = DagRun::new(&dag, model.clone(), "Correctness", true);
        async_run.a_execute(root, &case, 0).await.unwrap();

        assert_eq!(sync_run.into_outcome(), async_run.into_outcome());
    }
}
