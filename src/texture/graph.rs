use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::Rgba32FImage;

use crate::backend::GpuBackend;
use crate::config::TextureGraphConfig;
use crate::error::{GraphError, SolveError};
use crate::graph::{Connection, NodeGraph};
use crate::node::NodeId;
use crate::shader::template::WORKGROUP_SIZE;
use crate::texture::program::{GeneratedProgram, UniformBinding, generate_program};
use crate::texture::{ShaderNode, TextureNode};
use crate::types::{RawValue, UniformValue};

/// Whether the compiled program reflects the current graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProgramState {
    /// Nothing compiled since the last edit.
    #[default]
    Stale,
    Ready,
    /// The last solve failed. A previously compiled program, if any, is kept.
    Failed(String),
}

/// Summary of one successful [`TextureGraph::solve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolveReport {
    pub extent: [u32; 2],
    pub workgroups: [u32; 3],
    pub nodes: usize,
    pub bindings: usize,
    pub source_len: usize,
}

type SolveListener = Box<dyn FnMut(&SolveReport)>;

/// A texture node graph bound to a GPU backend.
///
/// Every [`solve`](Self::solve) regenerates the whole program, compiles it,
/// uploads current parameter values and dispatches one invocation per output
/// texel.
pub struct TextureGraph<B: GpuBackend, N: ShaderNode = TextureNode> {
    graph: NodeGraph<N>,
    backend: B,
    config: TextureGraphConfig,
    program: Option<B::Program>,
    generated: Option<GeneratedProgram>,
    state: ProgramState,
    listeners: Vec<SolveListener>,
}

impl<B: GpuBackend, N: ShaderNode> TextureGraph<B, N> {
    pub fn new(backend: B, config: TextureGraphConfig) -> Self {
        Self::with_graph(NodeGraph::new(), backend, config)
    }

    pub fn with_graph(graph: NodeGraph<N>, backend: B, config: TextureGraphConfig) -> Self {
        Self {
            graph,
            backend,
            config,
            program: None,
            generated: None,
            state: ProgramState::Stale,
            listeners: Vec::new(),
        }
    }

    pub fn graph(&self) -> &NodeGraph<N> {
        &self.graph
    }

    /// Direct access to the graph. Edits made here mark the program stale.
    pub fn graph_mut(&mut self) -> &mut NodeGraph<N> {
        self.state = ProgramState::Stale;
        &mut self.graph
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &TextureGraphConfig {
        &self.config
    }

    pub fn set_output_size(&mut self, size: [u32; 2]) {
        self.config.output_size = size;
        self.state = ProgramState::Stale;
    }

    pub fn state(&self) -> &ProgramState {
        &self.state
    }

    pub fn program(&self) -> Option<&B::Program> {
        self.program.as_ref()
    }

    /// Last generated program, kept even when compilation failed.
    pub fn generated(&self) -> Option<&GeneratedProgram> {
        self.generated.as_ref()
    }

    pub fn source(&self) -> Option<&str> {
        self.generated.as_ref().map(|p| p.source.as_str())
    }

    pub fn create(&mut self, behavior: N) -> NodeId {
        self.state = ProgramState::Stale;
        self.graph.create(behavior)
    }

    pub fn connect(
        &mut self,
        source: NodeId,
        source_output: usize,
        destination: NodeId,
        destination_input: usize,
    ) -> Result<Connection, GraphError> {
        if source == destination {
            return Err(GraphError::SelfConnection(source));
        }
        let connection = self
            .graph
            .connect(source, source_output, destination, destination_input)?;
        self.state = ProgramState::Stale;
        Ok(connection)
    }

    pub fn remove_connection(&mut self, connection: &Connection) -> bool {
        let removed = self.graph.remove_connection(connection);
        if removed {
            self.state = ProgramState::Stale;
        }
        removed
    }

    pub fn set_param(
        &mut self,
        node: NodeId,
        name: &str,
        value: RawValue,
    ) -> Result<(), GraphError> {
        self.graph.set_param(node, name, value)
    }

    pub fn set_image(
        &mut self,
        node: NodeId,
        name: &str,
        image: Option<Arc<Rgba32FImage>>,
        path: Option<PathBuf>,
    ) -> Result<(), GraphError> {
        self.graph
            .node_mut(node)
            .ok_or(GraphError::UnknownNode(node))?
            .set_image(name, image, path)
    }

    /// Decode an image file into an image parameter.
    pub fn load_image(&mut self, node: NodeId, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgba32f();
        tracing::debug!(node = %node, param = name, path = %path.display(), "loaded image");
        self.set_image(node, name, Some(Arc::new(image)), Some(path.to_path_buf()))?;
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        self.graph.has_changes()
    }

    pub fn clear_changes(&mut self) {
        self.graph.clear_changes();
    }

    /// Register a hook fired after every successful solve.
    pub fn on_solved(&mut self, listener: impl FnMut(&SolveReport) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Generate the program without compiling it.
    pub fn generate_program(&mut self) -> Result<&GeneratedProgram> {
        let generated = generate_program(&mut self.graph)?;
        if let Some(path) = &self.config.dump_source {
            std::fs::write(path, &generated.source)
                .with_context(|| format!("failed to write program source to {}", path.display()))?;
        }
        let generated = &*self.generated.insert(generated);
        Ok(generated)
    }

    /// Regenerate, compile and run the whole graph.
    pub fn solve(&mut self) -> Result<SolveReport> {
        match self.try_solve() {
            Ok(report) => {
                self.state = ProgramState::Ready;
                for listener in &mut self.listeners {
                    listener(&report);
                }
                Ok(report)
            }
            Err(err) => {
                self.state = ProgramState::Failed(format!("{err:#}"));
                Err(err)
            }
        }
    }

    fn try_solve(&mut self) -> Result<SolveReport> {
        self.graph.solve()?;
        self.generate_program()?;
        let generated = self
            .generated
            .take()
            .context("program generation produced nothing")?;
        let result = self.run(&generated);
        self.generated = Some(generated);
        result
    }

    fn run(&mut self, generated: &GeneratedProgram) -> Result<SolveReport> {
        let extent = self.config.output_size;
        let mut program = match self.backend.compile_program(&generated.source) {
            Ok(program) => program,
            Err(err) => {
                let diagnostic = format!("{err:#}");
                tracing::warn!(%diagnostic, "texture program failed to compile");
                return Err(SolveError::Compile { diagnostic }.into());
            }
        };
        // The previous output survives a failed compile.
        self.backend.resize_output(extent)?;

        for binding in &generated.bindings {
            self.bind(&mut program, binding)?;
        }

        let workgroups = [
            extent[0].div_ceil(WORKGROUP_SIZE),
            extent[1].div_ceil(WORKGROUP_SIZE),
            1,
        ];
        self.backend.dispatch(&mut program, workgroups)?;
        self.backend.memory_barrier()?;
        self.program = Some(program);

        tracing::debug!(
            width = extent[0],
            height = extent[1],
            groups_x = workgroups[0],
            groups_y = workgroups[1],
            "dispatched texture program"
        );
        Ok(SolveReport {
            extent,
            workgroups,
            nodes: generated.order.len(),
            bindings: generated.bindings.len(),
            source_len: generated.source.len(),
        })
    }

    fn bind(&mut self, program: &mut B::Program, binding: &UniformBinding) -> Result<()> {
        match binding {
            UniformBinding::Value {
                uniform,
                node,
                param,
                kind,
            } => {
                let raw = self
                    .graph
                    .node(*node)
                    .and_then(|n| n.param(param))
                    .map(|p| p.value)
                    .ok_or(GraphError::UnknownNode(*node))?;
                let Some(value) = UniformValue::from_raw(*kind, raw) else {
                    return Ok(());
                };
                self.backend.set_uniform(program, uniform, value)
            }
            UniformBinding::Image {
                flag,
                slot,
                node,
                param,
                ..
            } => {
                let image = self
                    .graph
                    .node(*node)
                    .and_then(|n| n.param(param))
                    .ok_or(GraphError::UnknownNode(*node))?
                    .image
                    .clone();
                self.backend
                    .bind_input_image(program, *slot, image.as_deref())?;
                self.backend
                    .set_uniform(program, flag, UniformValue::Int(i32::from(image.is_some())))
            }
        }
    }

    /// Read the destination image of the last dispatch.
    pub fn read_output(&mut self) -> Result<Rgba32FImage> {
        self.backend.read_output()
    }
}
