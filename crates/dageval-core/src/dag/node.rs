use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DagError;
use crate::evaluator::SubEvaluator;
use crate::types::TestCaseParam;

/// Stable identity of a node inside its [`Dag`](super::Dag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The value a judgment must resolve to for a verdict branch to be taken.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerdictValue {
    Bool(bool),
    Text(String),
}

impl fmt::Display for VerdictValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictValue::Bool(b) => write!(f, "{b}"),
            VerdictValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for VerdictValue {
    fn from(b: bool) -> Self {
        VerdictValue::Bool(b)
    }
}

impl From<&str> for VerdictValue {
    fn from(s: &str) -> Self {
        VerdictValue::Text(s.to_string())
    }
}

impl From<String> for VerdictValue {
    fn from(s: String) -> Self {
        VerdictValue::Text(s)
    }
}

/// What a verdict node nests when it does not carry a score.
#[derive(Clone)]
pub enum VerdictChild {
    Node(NodeId),
    Evaluator(Arc<dyn SubEvaluator>),
}

impl fmt::Debug for VerdictChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictChild::Node(id) => f.debug_tuple("Node").field(id).finish(),
            VerdictChild::Evaluator(e) => f.debug_tuple("Evaluator").field(&e.name()).finish(),
        }
    }
}

impl From<NodeId> for VerdictChild {
    fn from(id: NodeId) -> Self {
        VerdictChild::Node(id)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum VerdictTarget {
    Score(u8),
    Child(VerdictChild),
}

/// A branch of a judgment node: either a terminal score out of 10 or a
/// nested evaluation to continue with.
#[derive(Debug, Clone)]
pub struct VerdictNode {
    pub(crate) verdict: VerdictValue,
    pub(crate) target: VerdictTarget,
}

impl VerdictNode {
    /// Exactly one of `score` and `child` must be given.
    pub fn new(
        verdict: impl Into<VerdictValue>,
        score: Option<i64>,
        child: Option<VerdictChild>,
    ) -> Result<Self, DagError> {
        let target = match (score, child) {
            (Some(_), Some(_)) => return Err(DagError::VerdictScoreAndChild),
            (None, None) => return Err(DagError::VerdictMissingScoreOrChild),
            (Some(score), None) => match u8::try_from(score) {
                Ok(s) if s <= 10 => VerdictTarget::Score(s),
                _ => return Err(DagError::ScoreOutOfRange(score)),
            },
            (None, Some(child)) => VerdictTarget::Child(child),
        };
        Ok(Self {
            verdict: verdict.into(),
            target,
        })
    }

    pub fn with_score(verdict: impl Into<VerdictValue>, score: i64) -> Result<Self, DagError> {
        Self::new(verdict, Some(score), None)
    }

    pub fn with_child(verdict: impl Into<VerdictValue>, child: NodeId) -> Self {
        Self {
            verdict: verdict.into(),
            target: VerdictTarget::Child(VerdictChild::Node(child)),
        }
    }

    pub fn with_evaluator(verdict: impl Into<VerdictValue>, evaluator: Arc<dyn SubEvaluator>) -> Self {
        Self {
            verdict: verdict.into(),
            target: VerdictTarget::Child(VerdictChild::Evaluator(evaluator)),
        }
    }

    pub fn verdict(&self) -> &VerdictValue {
        &self.verdict
    }

    pub fn score(&self) -> Option<u8> {
        match self.target {
            VerdictTarget::Score(s) => Some(s),
            VerdictTarget::Child(_) => None,
        }
    }

    pub(crate) fn nested_node(&self) -> Option<NodeId> {
        match self.target {
            VerdictTarget::Child(VerdictChild::Node(id)) => Some(id),
            _ => None,
        }
    }
}

/// Produces an intermediate text artifact for downstream nodes.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub instructions: String,
    /// Heading for the output, both in logs and in descendants' prompts.
    pub output_label: String,
    pub children: Vec<NodeId>,
    pub evaluation_params: Vec<TestCaseParam>,
    pub label: Option<String>,
}

impl TaskNode {
    pub fn new(
        instructions: impl Into<String>,
        output_label: impl Into<String>,
        children: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            output_label: output_label.into(),
            children: children.into_iter().collect(),
            evaluation_params: Vec::new(),
            label: None,
        }
    }

    pub fn evaluation_params(mut self, params: impl IntoIterator<Item = TestCaseParam>) -> Self {
        self.evaluation_params = params.into_iter().collect();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Asks a yes/no question; exactly one of its two verdict children is taken.
#[derive(Debug, Clone)]
pub struct BinaryJudgmentNode {
    pub criteria: String,
    pub children: Vec<NodeId>,
    pub evaluation_params: Vec<TestCaseParam>,
    pub label: Option<String>,
}

impl BinaryJudgmentNode {
    pub fn new(criteria: impl Into<String>, children: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            criteria: criteria.into(),
            children: children.into_iter().collect(),
            evaluation_params: Vec::new(),
            label: None,
        }
    }

    pub fn evaluation_params(mut self, params: impl IntoIterator<Item = TestCaseParam>) -> Self {
        self.evaluation_params = params.into_iter().collect();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Asks a multiple-choice question whose options are its children's verdicts.
#[derive(Debug, Clone)]
pub struct NonBinaryJudgmentNode {
    pub criteria: String,
    pub children: Vec<NodeId>,
    pub evaluation_params: Vec<TestCaseParam>,
    pub label: Option<String>,
}

impl NonBinaryJudgmentNode {
    pub fn new(criteria: impl Into<String>, children: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            criteria: criteria.into(),
            children: children.into_iter().collect(),
            evaluation_params: Vec::new(),
            label: None,
        }
    }

    pub fn evaluation_params(mut self, params: impl IntoIterator<Item = TestCaseParam>) -> Self {
        self.evaluation_params = params.into_iter().collect();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Task,
    BinaryJudgment,
    NonBinaryJudgment,
    Verdict,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Task => "TaskNode",
            NodeKind::BinaryJudgment => "BinaryJudgmentNode",
            NodeKind::NonBinaryJudgment => "NonBinaryJudgmentNode",
            NodeKind::Verdict => "VerdictNode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_score_bounds() {
        assert!(VerdictNode::with_score(true, 0).is_ok());
        assert!(VerdictNode::with_score(true, 10).is_ok());
        assert_eq!(
            VerdictNode::with_score(true, 11).unwrap_err(),
            DagError::ScoreOutOfRange(11)
        );
        assert_eq!(
            VerdictNode::with_score(true, -1).unwrap_err(),
            DagError::ScoreOutOfRange(-1)
        );
    }

    #[test]
    fn verdict_needs_exactly_one_target() {
        assert_eq!(
            VerdictNode::new(true, Some(5), Some(VerdictChild::Node(NodeId(0)))).unwrap_err(),
            DagError::VerdictScoreAndChild
        );
        assert_eq!(
            VerdictNode::new(true, None, None).unwrap_err(),
            DagError::VerdictMissingScoreOrChild
        );
        let nested = VerdictNode::new("ok", None, Some(NodeId(3).into())).unwrap();
        assert_eq!(nested.nested_node(), Some(NodeId(3)));
        assert_eq!(nested.score(), None);
    }

    #[test]
    fn verdict_value_display() {
        assert_eq!(VerdictValue::from(true).to_string(), "true");
        assert_eq!(VerdictValue::from("partial").to_string(), "partial");
    }
}
