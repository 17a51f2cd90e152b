//! Node, socket and parameter model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use image::Rgba32FImage;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::types::{RawValue, ValueKind};

/// Stable index of a node inside its graph's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single typed input or output slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Socket {
    pub index: usize,
    pub name: String,
    pub kind: ValueKind,
    pub value: RawValue,
    /// Maintained by the graph; true while any connection attaches here.
    pub connected: bool,
}

/// An adjustable value owned by a node.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub kind: ValueKind,
    pub value: RawValue,
    /// Pixel data for `ValueKind::Image` params.
    pub image: Option<Arc<Rgba32FImage>>,
    /// Where `image` was loaded from, kept for persistence.
    pub image_path: Option<PathBuf>,
}

/// Per-node behavior hooks.
///
/// `setup` declares sockets and default parameter values and runs exactly once,
/// when the graph creates the node. `solve` is the generic value pass; most
/// behaviors leave it empty and let the graph copy payloads along edges.
pub trait NodeBehavior: Sized {
    fn setup(node: &mut Node<Self>);

    fn solve(_node: &mut Node<Self>) {}
}

#[derive(Clone, Debug)]
pub struct Node<B> {
    id: NodeId,
    pub behavior: B,
    inputs: Vec<Socket>,
    outputs: Vec<Socket>,
    params: BTreeMap<String, Param>,
    /// Editor position, carried through persistence.
    pub position: [f32; 2],
    solved: bool,
    changed: bool,
}

impl<B> Node<B> {
    pub(crate) fn new(id: NodeId, behavior: B) -> Self {
        Self {
            id,
            behavior,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: BTreeMap::new(),
            position: [0.0, 0.0],
            solved: false,
            changed: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn add_input(&mut self, name: impl Into<String>, kind: ValueKind) -> usize {
        push_socket(&mut self.inputs, name.into(), kind)
    }

    pub fn add_output(&mut self, name: impl Into<String>, kind: ValueKind) -> usize {
        push_socket(&mut self.outputs, name.into(), kind)
    }

    /// Declare an adjustable parameter. Re-declaring a name replaces it.
    pub fn add_param(&mut self, name: impl Into<String>, kind: ValueKind, default: RawValue) {
        let name = name.into();
        self.params.insert(
            name.clone(),
            Param {
                name,
                kind,
                value: default,
                image: None,
                image_path: None,
            },
        );
    }

    pub fn inputs(&self) -> &[Socket] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Socket] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> Option<&Socket> {
        self.inputs.get(index)
    }

    pub fn input_mut(&mut self, index: usize) -> Option<&mut Socket> {
        self.inputs.get_mut(index)
    }

    pub fn output(&self, index: usize) -> Option<&Socket> {
        self.outputs.get(index)
    }

    pub fn output_mut(&mut self, index: usize) -> Option<&mut Socket> {
        self.outputs.get_mut(index)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|s| s.name == name)
    }

    pub fn input_named(&self, name: &str) -> Option<&Socket> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|s| s.name == name)
    }

    pub fn params(&self) -> impl Iterator<Item = &Param> {
        self.params.values()
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// Set a parameter payload and mark the node changed.
    pub fn set_param(&mut self, name: &str, value: RawValue) -> Result<(), GraphError> {
        let Some(param) = self.params.get_mut(name) else {
            return Err(GraphError::UnknownParam {
                node: self.id,
                name: name.to_string(),
            });
        };
        param.value = value;
        self.changed = true;
        Ok(())
    }

    /// Attach pixel data to an image parameter and mark the node changed.
    pub fn set_image(
        &mut self,
        name: &str,
        image: Option<Arc<Rgba32FImage>>,
        path: Option<PathBuf>,
    ) -> Result<(), GraphError> {
        let Some(param) = self.params.get_mut(name) else {
            return Err(GraphError::UnknownParam {
                node: self.id,
                name: name.to_string(),
            });
        };
        param.image = image;
        param.image_path = path;
        self.changed = true;
        Ok(())
    }

    pub fn is_solved(&self) -> bool {
        self.solved
    }

    pub(crate) fn set_solved(&mut self, solved: bool) {
        self.solved = solved;
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub(crate) fn set_connected(&mut self, inputs: &[bool], outputs: &[bool]) {
        for (s, c) in self.inputs.iter_mut().zip(inputs) {
            s.connected = *c;
        }
        for (s, c) in self.outputs.iter_mut().zip(outputs) {
            s.connected = *c;
        }
    }
}

fn push_socket(sockets: &mut Vec<Socket>, name: String, kind: ValueKind) -> usize {
    let index = sockets.len();
    sockets.push(Socket {
        index,
        name,
        kind,
        value: [0.0; 4],
        connected: false,
    });
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl NodeBehavior for Probe {
        fn setup(node: &mut Node<Self>) {
            node.add_input("A", ValueKind::Vec4);
            node.add_input("B", ValueKind::Scalar);
            node.add_output("Out", ValueKind::Vec4);
            node.add_param("Factor", ValueKind::Scalar, [0.5, 0.0, 0.0, 0.0]);
        }
    }

    fn probe() -> Node<Probe> {
        let mut node = Node::new(NodeId(3), Probe);
        Probe::setup(&mut node);
        node
    }

    #[test]
    fn sockets_get_sequential_indices() {
        let node = probe();
        assert_eq!(node.input(1).map(|s| s.index), Some(1));
        assert_eq!(node.input_index("B"), Some(1));
        assert_eq!(node.input_index("C"), None);
        assert_eq!(node.output(0).map(|s| s.kind), Some(ValueKind::Vec4));
    }

    #[test]
    fn set_param_marks_changed() {
        let mut node = probe();
        assert!(!node.is_changed());
        node.set_param("Factor", [0.25, 0.0, 0.0, 0.0]).unwrap();
        assert!(node.is_changed());
        assert_eq!(node.param("Factor").unwrap().value[0], 0.25);
        node.clear_changed();
        assert!(!node.is_changed());
    }

    #[test]
    fn set_unknown_param_is_an_error() {
        let mut node = probe();
        let err = node.set_param("Missing", [0.0; 4]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownParam {
                node: NodeId(3),
                name: "Missing".to_string()
            }
        );
        assert!(!node.is_changed());
    }
}
