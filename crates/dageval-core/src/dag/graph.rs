use std::collections::HashSet;

use crate::error::DagError;

use super::node::{
    BinaryJudgmentNode, NodeId, NodeKind, NonBinaryJudgmentNode, TaskNode, VerdictNode,
    VerdictValue,
};
use super::schema::{ConstrainedChoice, ResultShape};

/// A node as stored in the arena, together with its parent links.
///
/// Verdict nodes have a single owning judgment; every other kind may be
/// shared by several parents.
#[derive(Debug, Clone)]
pub(crate) enum Entry {
    Task {
        node: TaskNode,
        parents: Vec<NodeId>,
    },
    Binary {
        node: BinaryJudgmentNode,
        parents: Vec<NodeId>,
    },
    NonBinary {
        node: NonBinaryJudgmentNode,
        options: Vec<String>,
        shape: ResultShape,
        parents: Vec<NodeId>,
    },
    Verdict {
        node: VerdictNode,
        parent: Option<NodeId>,
    },
}

impl Entry {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Entry::Task { .. } => NodeKind::Task,
            Entry::Binary { .. } => NodeKind::BinaryJudgment,
            Entry::NonBinary { .. } => NodeKind::NonBinaryJudgment,
            Entry::Verdict { .. } => NodeKind::Verdict,
        }
    }

    pub(crate) fn children(&self) -> &[NodeId] {
        match self {
            Entry::Task { node, .. } => &node.children,
            Entry::Binary { node, .. } => &node.children,
            Entry::NonBinary { node, .. } => &node.children,
            Entry::Verdict { .. } => &[],
        }
    }

    fn push_parent(&mut self, parent: NodeId) {
        match self {
            Entry::Task { parents, .. }
            | Entry::Binary { parents, .. }
            | Entry::NonBinary { parents, .. } => parents.push(parent),
            Entry::Verdict { parent: slot, .. } => *slot = Some(parent),
        }
    }
}

/// Assembles a [`Dag`] bottom-up. Every `add_*` call validates the new node
/// and wires it into its children before returning its id, so an invalid
/// shape is never stored.
///
/// ```
/// use dageval_core::dag::{BinaryJudgmentNode, DagBuilder, VerdictNode};
///
/// let mut builder = DagBuilder::new();
/// let yes = builder.add_verdict(VerdictNode::with_score(true, 10)?)?;
/// let no = builder.add_verdict(VerdictNode::with_score(false, 0)?)?;
/// let root = builder.add_binary_judgment(BinaryJudgmentNode::new("Is the answer correct?", [yes, no]))?;
/// let dag = builder.build(root)?;
/// assert_eq!(dag.len(), 3);
/// # Ok::<(), dageval_core::DagError>(())
/// ```
#[derive(Debug, Default)]
pub struct DagBuilder {
    entries: Vec<Entry>,
    indegree: Vec<usize>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_verdict(&mut self, node: VerdictNode) -> Result<NodeId, DagError> {
        if let Some(nested) = node.nested_node() {
            if self.entry(nested)?.kind() == NodeKind::Verdict {
                return Err(DagError::NestedVerdict(nested));
            }
        }
        Ok(self.push(Entry::Verdict { node, parent: None }))
    }

    pub fn add_task(&mut self, node: TaskNode) -> Result<NodeId, DagError> {
        for &child in &node.children {
            if self.entry(child)?.kind() == NodeKind::Verdict {
                return Err(DagError::TaskVerdictChild(child));
            }
        }
        let children = node.children.clone();
        let id = self.push(Entry::Task {
            node,
            parents: Vec::new(),
        });
        self.wire(id, &children, false);
        Ok(id)
    }

    pub fn add_binary_judgment(&mut self, node: BinaryJudgmentNode) -> Result<NodeId, DagError> {
        if node.children.len() != 2 {
            return Err(DagError::BinaryChildCount(node.children.len()));
        }
        let mut trues = 0;
        let mut falses = 0;
        for &child in &node.children {
            match self.unowned_verdict(child)?.verdict() {
                VerdictValue::Bool(true) => trues += 1,
                VerdictValue::Bool(false) => falses += 1,
                VerdictValue::Text(_) => {
                    return Err(DagError::VerdictTypeMismatch {
                        node: child,
                        expected: "boolean",
                    })
                }
            }
        }
        if trues != 1 || falses != 1 {
            return Err(DagError::BinaryVerdictPair);
        }

        let children = node.children.clone();
        let id = self.push(Entry::Binary {
            node,
            parents: Vec::new(),
        });
        self.wire(id, &children, true);
        Ok(id)
    }

    pub fn add_non_binary_judgment(&mut self, node: NonBinaryJudgmentNode) -> Result<NodeId, DagError> {
        if node.children.is_empty() {
            return Err(DagError::NonBinaryNoChildren);
        }
        let mut seen = HashSet::new();
        let mut options = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            match self.unowned_verdict(child)?.verdict() {
                VerdictValue::Text(option) => {
                    if !seen.insert(option.clone()) {
                        return Err(DagError::DuplicateVerdict(option.clone()));
                    }
                    options.push(option.clone());
                }
                VerdictValue::Bool(_) => {
                    return Err(DagError::VerdictTypeMismatch {
                        node: child,
                        expected: "string",
                    })
                }
            }
        }

        let shape = ConstrainedChoice::shape(&options);
        let children = node.children.clone();
        let id = self.push(Entry::NonBinary {
            node,
            options,
            shape,
            parents: Vec::new(),
        });
        self.wire(id, &children, true);
        Ok(id)
    }

    /// Freezes the graph with `root` as the entry point of every run.
    pub fn build(self, root: NodeId) -> Result<Dag, DagError> {
        if root.0 >= self.entries.len() {
            return Err(DagError::UnknownNode(root));
        }
        Ok(Dag {
            entries: self.entries,
            indegree: self.indegree,
            root,
        })
    }

    fn push(&mut self, entry: Entry) -> NodeId {
        self.entries.push(entry);
        self.indegree.push(0);
        NodeId(self.entries.len() - 1)
    }

    fn entry(&self, id: NodeId) -> Result<&Entry, DagError> {
        self.entries.get(id.0).ok_or(DagError::UnknownNode(id))
    }

    fn unowned_verdict(&self, id: NodeId) -> Result<&VerdictNode, DagError> {
        match self.entry(id)? {
            Entry::Verdict {
                parent: Some(owner),
                ..
            } => Err(DagError::VerdictAlreadyOwned(id, *owner)),
            Entry::Verdict { node, parent: None } => Ok(node),
            _ => Err(DagError::NotAVerdictNode(id)),
        }
    }

    /// Registers `parent` on each child and counts the edge. Judgment nodes
    /// also count an edge into whatever graph node a verdict child wraps.
    fn wire(&mut self, parent: NodeId, children: &[NodeId], count_nested: bool) {
        for &child in children {
            self.entries[child.0].push_parent(parent);
            self.indegree[child.0] += 1;
            if count_nested {
                if let Entry::Verdict { node, .. } = &self.entries[child.0] {
                    if let Some(nested) = node.nested_node() {
                        self.indegree[nested.0] += 1;
                    }
                }
            }
        }
    }
}

/// A validated evaluation graph. Immutable; every run gets its own
/// execution state, so one `Dag` can score any number of test cases.
#[derive(Debug, Clone)]
pub struct Dag {
    pub(crate) entries: Vec<Entry>,
    pub(crate) indegree: Vec<usize>,
    root: NodeId,
}

impl Dag {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.entries.get(id.0).map(Entry::kind)
    }

    /// Number of incoming edges counted for `id` at construction.
    pub fn indegree(&self, id: NodeId) -> Option<usize> {
        self.indegree.get(id.0).copied()
    }

    /// Parents registered on `id`, in registration order.
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        match self.entries.get(id.0) {
            Some(Entry::Task { parents, .. })
            | Some(Entry::Binary { parents, .. })
            | Some(Entry::NonBinary { parents, .. }) => parents.clone(),
            Some(Entry::Verdict { parent, .. }) => parent.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Options a non-binary judgment node chooses from.
    pub fn verdict_options(&self, id: NodeId) -> Option<&[String]> {
        match self.entries.get(id.0) {
            Some(Entry::NonBinary { options, .. }) => Some(options),
            _ => None,
        }
    }

    pub(crate) fn entry(&self, id: NodeId) -> Result<&Entry, DagError> {
        self.entries.get(id.0).ok_or(DagError::UnknownNode(id))
    }
}
