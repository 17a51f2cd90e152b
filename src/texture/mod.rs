//! Texture-producing node graphs compiled into one compute program.

use std::collections::BTreeMap;

use crate::node::NodeBehavior;

mod graph;
pub mod nodes;
pub mod program;

pub use graph::{ProgramState, SolveReport, TextureGraph};
pub use nodes::TextureNode;
pub use program::{GeneratedProgram, UniformBinding, generate_program};

/// Placeholder a multi-pass library uses for "evaluate everything upstream of
/// me at this coordinate". It is replaced by a generated `vec4 f(vec2)`.
pub const SUBTREE_TOKEN: &str = "$subtree";

/// Input socket whose connection overrides the sampling coordinate of image
/// parameters.
pub const COORD_SOCKET: &str = "Coord";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpecialRole {
    #[default]
    None,
    /// Receives the implicit per-pixel coordinate when nothing else binds it.
    TextureCoords,
}

/// What feeds one parameter of a node's shader function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamBinding {
    /// Input socket or node parameter name.
    pub name: String,
    pub role: SpecialRole,
}

impl ParamBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: SpecialRole::None,
        }
    }

    pub fn coords(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: SpecialRole::TextureCoords,
        }
    }
}

/// Function parameter name -> binding.
pub type ParameterMap = BTreeMap<String, ParamBinding>;

/// A node that contributes a GLSL function to the generated program.
///
/// `library` must define `function_name` and may define helpers it calls.
/// Function parameters not listed in `parameters` bind to the socket or param
/// with the same name.
pub trait ShaderNode: NodeBehavior {
    fn function_name(&self) -> &str;

    fn library(&self) -> &str;

    fn parameters(&self) -> ParameterMap;

    /// The library references [`SUBTREE_TOKEN`] and needs its upstream
    /// subgraph as a callable function.
    fn multi_pass(&self) -> bool {
        false
    }

    /// Marks the node whose first output is written to the destination image.
    fn is_output(&self) -> bool {
        false
    }
}
