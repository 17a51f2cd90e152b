//! Compile texture node graphs into a single GLSL compute program.
//!
//! A [`NodeGraph`] of [`TextureNode`]s is ordered, turned into one program by
//! [`generate_program`] and run through a [`GpuBackend`] by [`TextureGraph`].

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod node;
pub mod shader;
pub mod texture;
pub mod types;
pub mod utils;

pub use backend::{GpuBackend, ValidatingBackend, WgpuBackend};
pub use config::TextureGraphConfig;
pub use document::GraphDocument;
pub use error::{GraphError, ShaderGenError, SolveError};
pub use graph::{Connection, NodeGraph};
pub use node::{Node, NodeBehavior, NodeId, Param, Socket};
pub use texture::{
    GeneratedProgram, ProgramState, ShaderNode, SolveReport, TextureGraph, TextureNode,
    generate_program,
};
pub use types::{RawValue, UniformValue, ValueKind};
