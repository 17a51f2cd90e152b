//! Node arena, connections and the evaluation-order scheduler.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::node::{Node, NodeBehavior, NodeId};
use crate::types::RawValue;

/// Directed edge from an output socket to an input socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source: NodeId,
    pub source_output: usize,
    pub destination: NodeId,
    pub destination_input: usize,
}

impl Connection {
    pub fn new(
        source: NodeId,
        source_output: usize,
        destination: NodeId,
        destination_input: usize,
    ) -> Self {
        Self {
            source,
            source_output,
            destination,
            destination_input,
        }
    }
}

/// Owns every node and connection of one graph.
///
/// Node ids are arena indices handed out by [`NodeGraph::create`]; nodes live as
/// long as the graph does.
#[derive(Clone, Debug)]
pub struct NodeGraph<B> {
    nodes: Vec<Node<B>>,
    connections: Vec<Connection>,
    order: Option<Vec<NodeId>>,
}

impl<B> Default for NodeGraph<B> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            connections: Vec::new(),
            order: None,
        }
    }
}

impl<B: NodeBehavior> NodeGraph<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and run its setup hook.
    pub fn create(&mut self, behavior: B) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut node = Node::new(id, behavior);
        B::setup(&mut node);
        self.nodes.push(node);
        self.order = None;
        id
    }

    /// Generic value pass: solve each node once in evaluation order and copy
    /// every output payload into the inputs it feeds.
    pub fn solve(&mut self) -> Result<(), GraphError> {
        let order = self.evaluation_order()?.to_vec();
        for node in &mut self.nodes {
            node.set_solved(false);
        }

        for id in order {
            let node = &mut self.nodes[id.index()];
            if node.is_solved() {
                continue;
            }
            B::solve(node);
            node.set_solved(true);

            let payloads: Vec<(Connection, RawValue)> = self
                .connections
                .iter()
                .filter(|c| c.source == id)
                .filter_map(|c| {
                    self.nodes[id.index()]
                        .output(c.source_output)
                        .map(|s| (*c, s.value))
                })
                .collect();
            for (c, value) in payloads {
                if let Some(input) =
                    self.nodes[c.destination.index()].input_mut(c.destination_input)
                {
                    input.value = value;
                }
            }
        }
        Ok(())
    }
}

impl<B> NodeGraph<B> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node<B>] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<B>> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<B>> {
        self.nodes.get_mut(id.index())
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Add a connection and mark both endpoint sockets connected.
    ///
    /// An input accepts at most one connection.
    pub fn connect(
        &mut self,
        source: NodeId,
        source_output: usize,
        destination: NodeId,
        destination_input: usize,
    ) -> Result<Connection, GraphError> {
        let src = self.node(source).ok_or(GraphError::UnknownNode(source))?;
        if src.output(source_output).is_none() {
            return Err(GraphError::SocketOutOfRange {
                node: source,
                direction: "output",
                index: source_output,
            });
        }
        let dst = self
            .node(destination)
            .ok_or(GraphError::UnknownNode(destination))?;
        if dst.input(destination_input).is_none() {
            return Err(GraphError::SocketOutOfRange {
                node: destination,
                direction: "input",
                index: destination_input,
            });
        }
        if self.input_connection(destination, destination_input).is_some() {
            return Err(GraphError::InputAlreadyConnected {
                node: destination,
                input: destination_input,
            });
        }

        let connection = Connection::new(source, source_output, destination, destination_input);
        self.connections.push(connection);
        self.refresh_connected(source);
        self.refresh_connected(destination);
        self.order = None;
        Ok(connection)
    }

    /// Remove an exact connection. Returns false and changes nothing when the
    /// tuple is not present.
    pub fn remove_connection(&mut self, connection: &Connection) -> bool {
        let Some(pos) = self.connections.iter().position(|c| c == connection) else {
            return false;
        };
        self.connections.remove(pos);
        self.refresh_connected(connection.source);
        self.refresh_connected(connection.destination);
        self.order = None;
        true
    }

    /// The connection feeding `input` of `node`, if any.
    pub fn input_connection(&self, node: NodeId, input: usize) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.destination == node && c.destination_input == input)
    }

    fn refresh_connected(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id.index()) else {
            return;
        };
        let mut inputs = vec![false; node.inputs().len()];
        let mut outputs = vec![false; node.outputs().len()];
        for c in &self.connections {
            if c.destination == id {
                if let Some(flag) = inputs.get_mut(c.destination_input) {
                    *flag = true;
                }
            }
            if c.source == id {
                if let Some(flag) = outputs.get_mut(c.source_output) {
                    *flag = true;
                }
            }
        }
        self.nodes[id.index()].set_connected(&inputs, &outputs);
    }

    /// Kahn's algorithm over the connection set. Zero in-degree nodes are
    /// seeded in id order so the result is deterministic.
    pub fn build_evaluation_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut indeg: Vec<usize> = vec![0; self.nodes.len()];
        let mut outgoing: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for c in &self.connections {
            indeg[c.destination.index()] += 1;
            outgoing.entry(c.source).or_default().push(c.destination);
        }

        let mut q: VecDeque<NodeId> = indeg
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| NodeId(i as u32))
            .collect();
        let mut order: Vec<NodeId> = Vec::with_capacity(self.nodes.len());

        while let Some(n) = q.pop_front() {
            order.push(n);
            if let Some(nexts) = outgoing.get(&n) {
                for m in nexts {
                    let entry = &mut indeg[m.index()];
                    *entry -= 1;
                    if *entry == 0 {
                        q.push_back(*m);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = indeg
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| NodeId(i as u32))
                .collect();
            return Err(GraphError::CycleDetected(stuck));
        }
        Ok(order)
    }

    /// Cached evaluation order, rebuilt after any connection change.
    pub fn evaluation_order(&mut self) -> Result<&[NodeId], GraphError> {
        if self.order.is_none() {
            let order = self.build_evaluation_order()?;
            tracing::debug!(nodes = order.len(), "rebuilt evaluation order");
            self.order = Some(order);
        }
        Ok(self.order.as_deref().unwrap_or_default())
    }

    /// Nodes strictly upstream of `start`.
    pub fn upstream_of(&self, start: NodeId) -> BTreeSet<NodeId> {
        let mut incoming: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for c in &self.connections {
            incoming.entry(c.destination).or_default().push(c.source);
        }

        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let mut stack: Vec<NodeId> = incoming.get(&start).cloned().unwrap_or_default();
        while let Some(n) = stack.pop() {
            if n == start || !visited.insert(n) {
                continue;
            }
            if let Some(prevs) = incoming.get(&n) {
                stack.extend(prevs.iter().copied());
            }
        }
        visited
    }

    pub fn set_param(&mut self, id: NodeId, name: &str, value: RawValue) -> Result<(), GraphError> {
        self.node_mut(id)
            .ok_or(GraphError::UnknownNode(id))?
            .set_param(name, value)
    }

    pub fn has_changes(&self) -> bool {
        self.nodes.iter().any(|n| n.is_changed())
    }

    pub fn clear_changes(&mut self) {
        for node in &mut self.nodes {
            node.clear_changed();
        }
    }
}
