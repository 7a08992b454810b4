//! Evaluation DAGs: task, judgment and verdict nodes wired into a
//! converging graph and executed against a single test case.
//!
//! A node may be reached from several parents; it runs once, when the
//! last of them arrives. Verdict nodes whose value differs from their
//! judgment's answer are pruned together with everything below them.

pub mod counter;
mod execute;
mod graph;
mod node;
pub mod schema;
pub mod templates;
pub mod verbose;

pub use counter::{Arrival, DependencyCounter};
pub use execute::{DagRun, RunOutcome};
pub use graph::{Dag, DagBuilder};
pub use node::{
    BinaryJudgmentNode, NodeId, NodeKind, NonBinaryJudgmentNode, TaskNode, VerdictChild,
    VerdictNode, VerdictValue,
};
