//! Workflow coordinator: interprets Chain/Group/Chord graphs.
//!
//! The graph is compiled once at launch into a flat node table; from then
//! on the coordinator is driven purely by terminal signals from the worker
//! runtime. Chain and group bookkeeping lives in coordinator memory; the
//! chord join counter lives in the result store, because header members may
//! finish on worker runtimes in other processes and the
//! increment-and-compare must be atomic across all of them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::dispatcher::publish_invocation;
use crate::domain::{
    ChordId, EngineError, Invocation, InvocationId, TaskResult, WorkflowNode,
};
use crate::ports::{CompletionSink, ResultStore, TerminalOutcome, Transport};

type NodeId = InvocationId;

/// Where a node sits inside its parent.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Root,
    ChainStep { chain: NodeId, index: usize },
    GroupMember { group: NodeId, index: usize },
    ChordHeader { chord: NodeId, index: usize },
    ChordBody { chord: NodeId },
}

enum NodeKind {
    Leaf {
        invocation: Invocation,
    },
    Chain {
        steps: Vec<NodeId>,
        /// Index of the step currently awaited. Signals for earlier steps
        /// are duplicates (at-least-once delivery) and are ignored.
        next_index: usize,
        aborted: bool,
    },
    Group {
        members: Vec<NodeId>,
        arrived: usize,
        /// Outcomes at declared member index, not arrival index.
        slots: Vec<Option<Value>>,
    },
    Chord {
        chord_id: ChordId,
        header: Vec<NodeId>,
        body: NodeId,
    },
}

struct NodeState {
    kind: NodeKind,
    slot: Slot,
    root: NodeId,
}

#[derive(Default)]
struct CoordinatorState {
    nodes: HashMap<NodeId, NodeState>,
    /// Node ids per live workflow, for cleanup once the root completes.
    workflows: HashMap<NodeId, Vec<NodeId>>,
}

/// What to do after examining one terminal signal under the lock.
enum Action {
    Done,
    /// Dispatch the next chain step with the previous step's result.
    StartNode { node: NodeId, input: Option<Value> },
    /// A composite node completed: record its synthetic result, then treat
    /// it as a completed child of its own parent.
    Climb { parent: NodeId, outcome: TerminalOutcome },
    /// A chord header member completed: record the arrival in the store.
    ChordArrive {
        chord_id: ChordId,
        index: usize,
        value: Value,
        body: NodeId,
    },
}

/// What to do when starting one node of the frontier.
enum StartAction {
    Dispatch(Invocation),
    Descend(Vec<(NodeId, Option<Value>)>),
    Skip,
}

pub struct WorkflowCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ResultStore>,
    state: Mutex<CoordinatorState>,
}

impl WorkflowCoordinator {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            transport,
            store,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Number of workflows still in flight. Observability/test hook.
    pub async fn live_workflows(&self) -> usize {
        self.state.lock().await.workflows.len()
    }

    /// Compile and launch a workflow graph; returns the root node id.
    pub async fn launch(&self, node: WorkflowNode) -> Result<NodeId, EngineError> {
        let root_id = node_id_for(&node);
        let mut nodes = Vec::new();
        let mut chords = Vec::new();
        compile_into(node, root_id, Slot::Root, root_id, &mut nodes, &mut chords)?;

        // Chord counters exist before any header member can possibly
        // finish.
        for (chord_id, expected) in &chords {
            self.store.init_chord(*chord_id, *expected).await?;
        }

        // Composite nodes are pollable like any invocation; leaves get
        // their PENDING row when dispatched.
        for (id, state) in &nodes {
            if !matches!(state.kind, NodeKind::Leaf { .. }) {
                self.store.set(TaskResult::pending(*id)).await?;
            }
        }

        {
            let mut st = self.state.lock().await;
            st.workflows
                .insert(root_id, nodes.iter().map(|(id, _)| *id).collect());
            for (id, node_state) in nodes {
                st.nodes.insert(id, node_state);
            }
        }

        self.start(root_id, None).await?;
        Ok(root_id)
    }

    /// Dispatch the first executable frontier under `node`: a chain starts
    /// its first step only, a group or chord header starts every member.
    async fn start(&self, node: NodeId, input: Option<Value>) -> Result<(), EngineError> {
        let mut work = VecDeque::from([(node, input)]);
        while let Some((id, input)) = work.pop_front() {
            let action = {
                let st = self.state.lock().await;
                match st.nodes.get(&id) {
                    None => StartAction::Skip,
                    Some(ns) => match &ns.kind {
                        NodeKind::Leaf { invocation } => {
                            let mut inv = invocation.clone();
                            if let Some(value) = input {
                                inv.prepend_arg(value);
                            }
                            StartAction::Dispatch(inv)
                        }
                        NodeKind::Chain { steps, .. } => {
                            StartAction::Descend(vec![(steps[0], input)])
                        }
                        NodeKind::Group { members, .. } => StartAction::Descend(
                            members.iter().map(|m| (*m, input.clone())).collect(),
                        ),
                        NodeKind::Chord { header, .. } => StartAction::Descend(
                            header.iter().map(|h| (*h, input.clone())).collect(),
                        ),
                    },
                }
            };

            match action {
                StartAction::Dispatch(invocation) => {
                    publish_invocation(
                        self.transport.as_ref(),
                        self.store.as_ref(),
                        &invocation,
                        None,
                    )
                    .await?;
                }
                StartAction::Descend(children) => work.extend(children),
                StartAction::Skip => {}
            }
        }
        Ok(())
    }

    /// Walk a terminal signal up the graph, dispatching downstream stages
    /// along the way.
    async fn propagate(
        &self,
        node: NodeId,
        outcome: TerminalOutcome,
    ) -> Result<(), EngineError> {
        let mut current = (node, outcome);
        loop {
            let (id, outcome) = current;
            let action = {
                let mut st = self.state.lock().await;
                next_action(&mut st, id, outcome)
            };

            match action {
                Action::Done => return Ok(()),
                Action::StartNode { node, input } => {
                    self.start(node, input).await?;
                    return Ok(());
                }
                Action::Climb { parent, outcome } => {
                    let synthetic = match &outcome {
                        TerminalOutcome::Success(value) => {
                            TaskResult::success(parent, value.clone())
                        }
                        TerminalOutcome::Failure(error) => TaskResult::failure(parent, error),
                    };
                    self.store.set(synthetic).await?;
                    current = (parent, outcome);
                }
                Action::ChordArrive {
                    chord_id,
                    index,
                    value,
                    body,
                } => {
                    // The atomic increment-and-compare: exactly one arrival
                    // gets the collected results back and dispatches the
                    // body.
                    let fired = self
                        .store
                        .record_chord_arrival(chord_id, index, value)
                        .await?;
                    if let Some(collected) = fired {
                        self.start(body, Some(Value::Array(collected))).await?;
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl CompletionSink for WorkflowCoordinator {
    async fn on_terminal(&self, id: InvocationId, outcome: TerminalOutcome) {
        if let Err(error) = self.propagate(id, outcome).await {
            tracing::error!(%id, %error, "workflow propagation failed");
        }
    }
}

/// Decide what a terminal signal for `id` means, mutating in-memory chain
/// and group bookkeeping. Pure state-machine step: no I/O, runs under the
/// coordinator lock.
fn next_action(st: &mut CoordinatorState, id: NodeId, outcome: TerminalOutcome) -> Action {
    let Some(child) = st.nodes.get(&id) else {
        // Plain task outside any workflow, or a workflow already torn down.
        return Action::Done;
    };
    let slot = child.slot;
    let root = child.root;

    match slot {
        Slot::Root => {
            // Whole workflow finished; drop its node table.
            if let Some(ids) = st.workflows.remove(&root) {
                for node_id in ids {
                    st.nodes.remove(&node_id);
                }
            }
            Action::Done
        }

        Slot::ChainStep { chain, index } => {
            let Some(parent) = st.nodes.get_mut(&chain) else {
                return Action::Done;
            };
            let NodeKind::Chain {
                steps,
                next_index,
                aborted,
            } = &mut parent.kind
            else {
                return Action::Done;
            };
            if *aborted || index != *next_index {
                // Stale or duplicate signal.
                return Action::Done;
            }
            match outcome {
                TerminalOutcome::Failure(error) => {
                    *aborted = true;
                    Action::Climb {
                        parent: chain,
                        outcome: TerminalOutcome::Failure(format!(
                            "chain aborted at step {index}: {error}"
                        )),
                    }
                }
                TerminalOutcome::Success(value) => {
                    *next_index += 1;
                    if let Some(next) = steps.get(*next_index).copied() {
                        Action::StartNode {
                            node: next,
                            input: Some(value),
                        }
                    } else {
                        Action::Climb {
                            parent: chain,
                            outcome: TerminalOutcome::Success(value),
                        }
                    }
                }
            }
        }

        Slot::GroupMember { group, index } => {
            let Some(parent) = st.nodes.get_mut(&group) else {
                return Action::Done;
            };
            let NodeKind::Group {
                members,
                arrived,
                slots,
            } = &mut parent.kind
            else {
                return Action::Done;
            };
            if slots[index].is_some() {
                // Duplicate signal for this member.
                return Action::Done;
            }
            slots[index] = Some(outcome.into_value());
            *arrived += 1;
            if *arrived < members.len() {
                return Action::Done;
            }
            // Every member terminal: complete with outcomes in declaration
            // order; failed members appear as error markers, they never
            // block completion.
            let collected: Vec<Value> = slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or(Value::Null))
                .collect();
            Action::Climb {
                parent: group,
                outcome: TerminalOutcome::Success(Value::Array(collected)),
            }
        }

        Slot::ChordHeader { chord, index } => {
            let Some(parent) = st.nodes.get(&chord) else {
                return Action::Done;
            };
            let NodeKind::Chord { chord_id, body, .. } = &parent.kind else {
                return Action::Done;
            };
            Action::ChordArrive {
                chord_id: *chord_id,
                index,
                value: outcome.into_value(),
                body: *body,
            }
        }

        Slot::ChordBody { chord } => Action::Climb {
            parent: chord,
            outcome,
        },
    }
}

/// Id of a node: a leaf reuses its invocation's id, composites mint one.
fn node_id_for(node: &WorkflowNode) -> NodeId {
    match node {
        WorkflowNode::Single(invocation) => invocation.id(),
        _ => NodeId::generate(),
    }
}

/// Flatten a workflow graph into the node table.
fn compile_into(
    node: WorkflowNode,
    id: NodeId,
    slot: Slot,
    root: NodeId,
    out: &mut Vec<(NodeId, NodeState)>,
    chords: &mut Vec<(ChordId, usize)>,
) -> Result<(), EngineError> {
    match node {
        WorkflowNode::Single(invocation) => {
            out.push((
                id,
                NodeState {
                    kind: NodeKind::Leaf {
                        invocation: invocation.with_parent_workflow(root),
                    },
                    slot,
                    root,
                },
            ));
            Ok(())
        }

        WorkflowNode::Chain(steps) => {
            if steps.is_empty() {
                return Err(EngineError::EmptyWorkflow("chain"));
            }
            let ids: Vec<NodeId> = steps.iter().map(node_id_for).collect();
            for (index, (step, step_id)) in steps.into_iter().zip(ids.iter()).enumerate() {
                compile_into(
                    step,
                    *step_id,
                    Slot::ChainStep { chain: id, index },
                    root,
                    out,
                    chords,
                )?;
            }
            out.push((
                id,
                NodeState {
                    kind: NodeKind::Chain {
                        steps: ids,
                        next_index: 0,
                        aborted: false,
                    },
                    slot,
                    root,
                },
            ));
            Ok(())
        }

        WorkflowNode::Group(members) => {
            if members.is_empty() {
                return Err(EngineError::EmptyWorkflow("group"));
            }
            let ids: Vec<NodeId> = members.iter().map(node_id_for).collect();
            for (index, (member, member_id)) in members.into_iter().zip(ids.iter()).enumerate() {
                compile_into(
                    member,
                    *member_id,
                    Slot::GroupMember { group: id, index },
                    root,
                    out,
                    chords,
                )?;
            }
            let len = ids.len();
            out.push((
                id,
                NodeState {
                    kind: NodeKind::Group {
                        members: ids,
                        arrived: 0,
                        slots: vec![None; len],
                    },
                    slot,
                    root,
                },
            ));
            Ok(())
        }

        WorkflowNode::Chord { header, body } => {
            if header.is_empty() {
                return Err(EngineError::EmptyWorkflow("chord header"));
            }
            let chord_id = ChordId::generate();
            let header_ids: Vec<NodeId> = header.iter().map(node_id_for).collect();
            for (index, (member, member_id)) in header.into_iter().zip(header_ids.iter()).enumerate()
            {
                compile_into(
                    member,
                    *member_id,
                    Slot::ChordHeader { chord: id, index },
                    root,
                    out,
                    chords,
                )?;
            }
            let body_id = node_id_for(&body);
            compile_into(*body, body_id, Slot::ChordBody { chord: id }, root, out, chords)?;

            chords.push((chord_id, header_ids.len()));
            out.push((
                id,
                NodeState {
                    kind: NodeKind::Chord {
                        chord_id,
                        header: header_ids,
                        body: body_id,
                    },
                    slot,
                    root,
                },
            ));
            Ok(())
        }
    }
}
