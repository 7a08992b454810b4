use thiserror::Error;

use crate::dag::NodeId;

/// Graph-shape violations, raised while a DAG is being assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("a verdict node can have either a score or a child, but not both")]
    VerdictScoreAndChild,

    #[error("a verdict node must have either a score or a child")]
    VerdictMissingScoreOrChild,

    #[error("verdict score must be between 0 and 10 inclusive, got {0}")]
    ScoreOutOfRange(i64),

    #[error("binary judgment node must have exactly 2 children, got {0}")]
    BinaryChildCount(usize),

    #[error("binary judgment node must have one true and one false verdict child")]
    BinaryVerdictPair,

    #[error("non-binary judgment node must have at least one child")]
    NonBinaryNoChildren,

    #[error("duplicate verdict `{0}` among non-binary judgment children")]
    DuplicateVerdict(String),

    #[error("node {0} is not a verdict node; judgment children must be verdict nodes")]
    NotAVerdictNode(NodeId),

    #[error("verdict node {node} must have a {expected} verdict")]
    VerdictTypeMismatch { node: NodeId, expected: &'static str },

    #[error("task node must not have verdict node {0} as a child")]
    TaskVerdictChild(NodeId),

    #[error("verdict node {0} cannot wrap another verdict node")]
    NestedVerdict(NodeId),

    #[error("verdict node {0} already belongs to judgment node {1}")]
    VerdictAlreadyOwned(NodeId, NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

/// Failures of the judge model capability.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model cannot honour a result shape; callers retry without one.
    #[error("model does not support schema-constrained generation")]
    SchemaUnsupported,

    #[error("invalid model configuration: {0}")]
    Config(String),

    #[error("model request failed: {0}")]
    Request(String),

    #[error("could not extract JSON from model output: {0}")]
    Parse(String),

    #[error("model output does not match `{shape}`: {message}")]
    InvalidOutput { shape: String, message: String },
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Request(err.to_string())
    }
}

/// Errors surfaced while executing a DAG against a test case.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("sub-evaluator `{name}` failed: {message}")]
    SubEvaluator { name: String, message: String },

    #[error("metric `{0}` finished without reaching a scoring verdict")]
    NoScore(String),
}
