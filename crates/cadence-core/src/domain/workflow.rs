//! Workflow graph: explicit tagged-variant composition.
//!
//! A workflow is a DAG of nodes rooted at one node; leaves are single
//! invocations. Composition is explicit data, not deferred call chaining:
//! the coordinator interprets the graph, nothing is lazily captured.

use super::invocation::Invocation;

/// One node of a workflow graph.
#[derive(Debug, Clone)]
pub enum WorkflowNode {
    /// Leaf: one invocation.
    Single(Invocation),

    /// Sequential: each step's result feeds the next as leading argument.
    /// Aborts on first failure.
    Chain(Vec<WorkflowNode>),

    /// Parallel fan-out: members run independently, no ordering guarantee
    /// on execution; the collected outcome preserves declaration order.
    Group(Vec<WorkflowNode>),

    /// Fan-out + join: `header` members run as a group; once every member
    /// reaches a terminal state, `body` runs exactly once with the ordered
    /// header results as leading argument.
    Chord {
        header: Vec<WorkflowNode>,
        body: Box<WorkflowNode>,
    },
}

impl WorkflowNode {
    pub fn single(invocation: Invocation) -> Self {
        Self::Single(invocation)
    }

    pub fn chain(steps: Vec<WorkflowNode>) -> Self {
        Self::Chain(steps)
    }

    pub fn group(members: Vec<WorkflowNode>) -> Self {
        Self::Group(members)
    }

    pub fn chord(header: Vec<WorkflowNode>, body: WorkflowNode) -> Self {
        Self::Chord {
            header,
            body: Box::new(body),
        }
    }

    /// Number of leaf invocations under this node.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Chain(steps) => steps.iter().map(WorkflowNode::leaf_count).sum(),
            Self::Group(members) => members.iter().map(WorkflowNode::leaf_count).sum(),
            Self::Chord { header, body } => {
                header.iter().map(WorkflowNode::leaf_count).sum::<usize>() + body.leaf_count()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn inv(name: &str) -> Invocation {
        Invocation::new(name, vec![], Map::new())
    }

    #[test]
    fn leaf_count_walks_the_whole_graph() {
        let node = WorkflowNode::chord(
            vec![
                WorkflowNode::single(inv("a")),
                WorkflowNode::single(inv("b")),
                WorkflowNode::group(vec![
                    WorkflowNode::single(inv("c")),
                    WorkflowNode::single(inv("d")),
                ]),
            ],
            WorkflowNode::chain(vec![
                WorkflowNode::single(inv("collect")),
                WorkflowNode::single(inv("report")),
            ]),
        );
        assert_eq!(node.leaf_count(), 6);
    }
}
