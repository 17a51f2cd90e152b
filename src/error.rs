//! Typed error roots.
//!
//! Orchestration and backend code returns `anyhow::Result`; these enums are the
//! leaf errors callers can `downcast_ref` to when they need to branch.

use crate::node::NodeId;
use crate::types::ValueKind;

/// Error raised by graph editing and scheduling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node id is not part of this graph
    #[error("node not found: {0}")]
    UnknownNode(NodeId),

    /// Socket index out of range for the node
    #[error("node {node} has no {direction} socket {index}")]
    SocketOutOfRange {
        node: NodeId,
        direction: &'static str,
        index: usize,
    },

    /// A second connection into the same input
    #[error("input {input} of node {node} is already connected")]
    InputAlreadyConnected { node: NodeId, input: usize },

    /// Self-loop not allowed
    #[error("node {0} cannot be connected to itself")]
    SelfConnection(NodeId),

    #[error("node {node} has no parameter named {name:?}")]
    UnknownParam { node: NodeId, name: String },

    /// The connection set contains a cycle through the listed nodes
    #[error("cycle detected in graph through nodes {0:?}")]
    CycleDetected(Vec<NodeId>),
}

/// Error raised while assembling a shader program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderGenError {
    #[error("function {0:?} not found in library")]
    UnknownFunction(String),

    #[error("function {name:?} spans {start}..{end} outside of a {len} byte library")]
    SpanOutOfRange {
        name: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("no conversion from {from:?} to {to:?}")]
    UnsupportedConversion { from: ValueKind, to: ValueKind },

    #[error("cannot declare a value of kind {0:?}")]
    UnsupportedKind(ValueKind),

    #[error("no open code block to close")]
    NoOpenBlock,

    #[error("node {0} is not part of the graph")]
    UnknownNode(NodeId),

    #[error("graph has no nodes to generate a program from")]
    EmptyGraph,

    #[error("node {0} has no output to write to the destination image")]
    NoOutput(NodeId),
}

/// Error raised by [`TextureGraph::solve`](crate::texture::TextureGraph::solve).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolveError {
    /// The backend rejected the generated program
    #[error("program failed to compile:\n{diagnostic}")]
    Compile { diagnostic: String },
}
