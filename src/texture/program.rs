//! Whole-graph program generation.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::error::ShaderGenError;
use crate::graph::NodeGraph;
use crate::node::{Node, NodeId};
use crate::shader::scanner::{Qualifier, replace_identifier};
use crate::shader::template::{OUTPUT_NAME, UV};
use crate::shader::{ShaderGen, Target, convert_expr, zero_literal};
use crate::texture::{COORD_SOCKET, ParamBinding, SUBTREE_TOKEN, ShaderNode, SpecialRole};
use crate::types::ValueKind;
use crate::utils::to_camel_case;

/// How one node parameter reaches the program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UniformBinding {
    /// Scalar/vector param uploaded to a parameter-block member.
    Value {
        uniform: String,
        node: NodeId,
        param: String,
        kind: ValueKind,
    },
    /// Image param bound at `slot`, with an `int` flag telling the program
    /// whether anything is bound.
    Image {
        uniform: String,
        flag: String,
        slot: u32,
        node: NodeId,
        param: String,
    },
}

impl UniformBinding {
    pub fn uniform(&self) -> &str {
        match self {
            UniformBinding::Value { uniform, .. } | UniformBinding::Image { uniform, .. } => {
                uniform
            }
        }
    }
}

/// Result of [`generate_program`].
#[derive(Clone, Debug)]
pub struct GeneratedProgram {
    pub source: String,
    pub uniforms: String,
    pub definitions: String,
    pub body: String,
    pub bindings: Vec<UniformBinding>,
    pub order: Vec<NodeId>,
    /// Node whose first output is written to the destination image.
    pub output_node: NodeId,
}

pub fn uniform_name(node: NodeId, param: &str) -> String {
    format!("param_{node}_{}", to_camel_case(param))
}

pub fn output_var(node: NodeId, index: usize) -> String {
    format!("out_{node}_{index}")
}

pub fn subtree_name(node: NodeId) -> String {
    format!("subtree_{node}")
}

/// Translate the whole graph into one compute program.
pub fn generate_program<N: ShaderNode>(graph: &mut NodeGraph<N>) -> Result<GeneratedProgram> {
    let order = graph.evaluation_order()?.to_vec();
    let program = ProgramBuilder::new(graph, order).build()?;
    tracing::debug!(
        nodes = program.order.len(),
        bindings = program.bindings.len(),
        bytes = program.source.len(),
        "generated texture program"
    );
    Ok(program)
}

struct ProgramBuilder<'a, N> {
    graph: &'a NodeGraph<N>,
    order: Vec<NodeId>,
    code: ShaderGen,
    library: String,
    included: HashSet<String>,
    /// Multi-pass node -> name of its specialised function.
    specialized: HashMap<NodeId, String>,
    bindings: Vec<UniformBinding>,
    next_slot: u32,
}

impl<'a, N: ShaderNode> ProgramBuilder<'a, N> {
    fn new(graph: &'a NodeGraph<N>, order: Vec<NodeId>) -> Self {
        Self {
            graph,
            order,
            code: ShaderGen::new(),
            library: String::new(),
            included: HashSet::new(),
            specialized: HashMap::new(),
            bindings: Vec::new(),
            // Slot 0 is the destination image.
            next_slot: 1,
        }
    }

    fn build(mut self) -> Result<GeneratedProgram> {
        let Some(&last) = self.order.last() else {
            return Err(ShaderGenError::EmptyGraph.into());
        };
        let output_node = self
            .order
            .iter()
            .rev()
            .copied()
            .find(|id| self.graph.node(*id).is_some_and(|n| n.behavior.is_output()))
            .unwrap_or(last);

        let order = self.order.clone();
        for &id in &order {
            self.collect_library(id);
            self.declare_uniforms(id)?;
            self.declare_outputs(id)?;
        }

        self.code.scan_library(&self.library);

        for &id in &order {
            self.emit_call(id)?;
        }

        let node = self.graph.node(output_node).ok_or(ShaderGenError::NoOutput(output_node))?;
        let first = node.output(0).ok_or(ShaderGenError::NoOutput(output_node))?;
        let color = convert_expr(first.kind, ValueKind::Vec4, &output_var(output_node, 0))?;
        self.code
            .append(&format!("\timageStore({OUTPUT_NAME}, cCoords, {color});\n"));

        Ok(GeneratedProgram {
            source: self.code.generate(),
            uniforms: self.code.uniforms(),
            definitions: self.code.definitions().to_string(),
            body: self.code.body().to_string(),
            bindings: self.bindings,
            order,
            output_node,
        })
    }

    fn node(&self, id: NodeId) -> Result<&'a Node<N>, ShaderGenError> {
        let graph: &'a NodeGraph<N> = self.graph;
        graph.node(id).ok_or(ShaderGenError::UnknownNode(id))
    }

    fn collect_library(&mut self, id: NodeId) {
        let Some(node) = self.graph.node(id) else {
            return;
        };
        if node.behavior.multi_pass() {
            return;
        }
        let name = node.behavior.function_name();
        if self.included.insert(name.to_string()) {
            self.library.push_str(node.behavior.library());
            self.library.push('\n');
        }
    }

    fn declare_uniforms(&mut self, id: NodeId) -> Result<(), ShaderGenError> {
        let node = self.node(id)?;
        for param in node.params() {
            let uniform = uniform_name(id, &param.name);
            match param.kind {
                ValueKind::Image => {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    let flag = format!("{uniform}_conn");
                    self.code.append_uniform(ValueKind::Image, &uniform, slot)?;
                    self.code.append_flag_uniform(&flag);
                    self.bindings.push(UniformBinding::Image {
                        uniform,
                        flag,
                        slot,
                        node: id,
                        param: param.name.clone(),
                    });
                }
                kind => {
                    self.code.append_uniform(kind, &uniform, 0)?;
                    self.bindings.push(UniformBinding::Value {
                        uniform,
                        node: id,
                        param: param.name.clone(),
                        kind,
                    });
                }
            }
        }
        Ok(())
    }

    fn declare_outputs(&mut self, id: NodeId) -> Result<(), ShaderGenError> {
        let node = self.node(id)?;
        for socket in node.outputs() {
            self.code.append_variable(socket.kind, &output_var(id, socket.index))?;
        }
        Ok(())
    }

    /// Paste the node's function and append its call to the current block.
    fn emit_call(&mut self, id: NodeId) -> Result<(), ShaderGenError> {
        let node = self.node(id)?;
        let function_name = if node.behavior.multi_pass() {
            self.specialize(id)?
        } else {
            node.behavior.function_name().to_string()
        };

        self.code.paste_function(&function_name, &self.library)?;
        let function = self
            .code
            .function(&function_name)
            .cloned()
            .ok_or_else(|| ShaderGenError::UnknownFunction(function_name.clone()))?;

        let bindings = node.behavior.parameters();
        let mut args = Vec::with_capacity(function.parameter_order.len());
        let mut next_output = 0;
        for (name, param) in function.ordered_params() {
            if param.qualifier == Qualifier::Out {
                if next_output >= node.outputs().len() {
                    return Err(ShaderGenError::NoOutput(id));
                }
                args.push(output_var(id, next_output));
                next_output += 1;
                continue;
            }
            let binding = bindings
                .get(name)
                .cloned()
                .unwrap_or_else(|| ParamBinding::new(name));
            args.push(self.argument(id, &binding, param.kind)?);
        }

        self.code
            .append(&format!("\t{function_name}({});\n", args.join(", ")));
        Ok(())
    }

    /// Expression for one `in` argument: connected input, then node param,
    /// then the implicit coordinate, then zero.
    fn argument(
        &self,
        id: NodeId,
        binding: &ParamBinding,
        kind: ValueKind,
    ) -> Result<String, ShaderGenError> {
        let node = self.node(id)?;

        if let Some(expr) = self.upstream(id, &binding.name, kind)? {
            return Ok(expr);
        }

        if let Some(param) = node.param(&binding.name) {
            let uniform = uniform_name(id, &param.name);
            if param.kind == ValueKind::Image {
                let coord = self
                    .upstream(id, COORD_SOCKET, ValueKind::Vec2)?
                    .unwrap_or_else(|| UV.to_string());
                let sample = format!(
                    "(imageLoad({uniform}, uv_to_texel({coord}, imageSize({uniform}))) * float({uniform}_conn))"
                );
                return convert_expr(ValueKind::Image, kind, &sample);
            }
            return convert_expr(param.kind, kind, &uniform);
        }

        if binding.role == SpecialRole::TextureCoords {
            return convert_expr(ValueKind::Vec2, kind, UV);
        }

        zero_literal(kind)
    }

    /// The upstream variable feeding input `socket` of `id`, converted to `kind`.
    fn upstream(
        &self,
        id: NodeId,
        socket: &str,
        kind: ValueKind,
    ) -> Result<Option<String>, ShaderGenError> {
        let node = self.node(id)?;
        let Some(index) = node.input_index(socket) else {
            return Ok(None);
        };
        let Some(connection) = self.graph.input_connection(id, index) else {
            return Ok(None);
        };
        let source = self.node(connection.source)?;
        let Some(output) = source.output(connection.source_output) else {
            return Ok(None);
        };
        let var = output_var(connection.source, connection.source_output);
        convert_expr(output.kind, kind, &var).map(Some)
    }

    /// Build `vec4 subtree_{id}(vec2 cUV)` from the nodes strictly upstream of
    /// `id`, then add the node's library with the placeholder and function name
    /// specialised. Cached per node for this generation.
    fn specialize(&mut self, id: NodeId) -> Result<String, ShaderGenError> {
        if let Some(name) = self.specialized.get(&id) {
            return Ok(name.clone());
        }
        let node = self.node(id)?;
        let subtree = subtree_name(id);

        let upstream = self.graph.upstream_of(id);
        let sub_order: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|n| upstream.contains(n))
            .collect();

        self.code
            .begin_function_block(&format!("vec4 {subtree}(vec2 {UV})"));
        for &n in &sub_order {
            self.declare_outputs(n)?;
        }
        for &n in &sub_order {
            self.emit_call(n)?;
        }
        let result = node
            .inputs()
            .iter()
            .find_map(|s| self.graph.input_connection(id, s.index))
            .map(|c| -> Result<String, ShaderGenError> {
                let kind = self
                    .node(c.source)?
                    .output(c.source_output)
                    .map_or(ValueKind::None, |s| s.kind);
                convert_expr(kind, ValueKind::Vec4, &output_var(c.source, c.source_output))
            })
            .transpose()?
            .unwrap_or_else(|| "vec4(0.0)".to_string());
        self.code.append(&format!("\treturn {result};\n"));
        self.code.end_function_block(Target::Definitions)?;

        let base = node.behavior.function_name();
        let specialized = format!("{base}_{id}");
        let text = replace_identifier(node.behavior.library(), SUBTREE_TOKEN, &subtree);
        let text = replace_identifier(&text, base, &specialized);
        self.library.push_str(&text);
        self.library.push('\n');
        self.code.scan_library(&self.library);

        tracing::debug!(node = %id, upstream = sub_order.len(), "specialised multi-pass node");
        self.specialized.insert(id, specialized.clone());
        Ok(specialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureNode;

    fn chain(kinds: &[TextureNode]) -> (NodeGraph<TextureNode>, Vec<NodeId>) {
        let mut g = NodeGraph::new();
        let ids: Vec<_> = kinds.iter().map(|k| g.create(*k)).collect();
        for pair in ids.windows(2) {
            g.connect(pair[0], 0, pair[1], 0).unwrap();
        }
        (g, ids)
    }

    #[test]
    fn color_to_output_body() {
        let (mut g, ids) = chain(&[TextureNode::Color, TextureNode::Output]);
        g.set_param(ids[0], "Color", [1.0, 0.0, 0.0, 1.0]).unwrap();
        let p = generate_program(&mut g).unwrap();

        assert_eq!(p.body.matches("color_node(").count(), 1);
        assert_eq!(p.body.matches("imageStore(").count(), 1);
        assert!(p.body.contains("\tvec4 out_0_0;\n"));
        assert!(p.body.contains("\tcolor_node(param_0_color, out_0_0);\n"));
        assert!(p.body.contains("\ttexture_output(out_0_0, out_1_0);\n"));
        assert!(p.body.ends_with("\timageStore(uOutput, cCoords, out_1_0);\n"));
        assert_eq!(p.output_node, ids[1]);
        assert_eq!(
            p.bindings,
            vec![UniformBinding::Value {
                uniform: "param_0_color".to_string(),
                node: ids[0],
                param: "Color".to_string(),
                kind: ValueKind::Vec4,
            }]
        );
    }

    #[test]
    fn unconnected_inputs_fall_back_to_params_then_zero() {
        let mut g = NodeGraph::new();
        let mix = g.create(TextureNode::Mix);
        let p = generate_program(&mut g).unwrap();
        assert!(p.body.contains(&format!(
            "\tmix_node(vec4(0.0), vec4(0.0), param_{mix}_factor, out_{mix}_0);\n"
        )));
    }

    #[test]
    fn connected_input_beats_param_and_is_converted() {
        let mut g = NodeGraph::new();
        let noise = g.create(TextureNode::ValueNoise);
        let mix = g.create(TextureNode::Mix);
        g.connect(noise, 0, mix, 2).unwrap();
        let p = generate_program(&mut g).unwrap();
        assert!(p.body.contains("\tvalue_noise(cUV, param_0_scale, param_0_seed, out_0_0);\n"));
        assert!(p.uniforms.contains("\tfloat param_1_factor;\n"));
        assert!(p.body.contains("\tmix_node(vec4(0.0), vec4(0.0), out_0_0, out_1_0);\n"));
        // No output node: last node is written.
        assert!(p.body.ends_with("\timageStore(uOutput, cCoords, out_1_0);\n"));
        // Helpers are pasted ahead of their caller.
        let defs = &p.definitions;
        assert!(defs.find("float hash21(").unwrap() < defs.find("float value_noise_at(").unwrap());
        let noise_at = defs.find("float value_noise_at(").unwrap();
        assert!(noise_at < defs.find("void value_noise(").unwrap());
    }

    #[test]
    fn scalar_output_is_widened_for_the_destination() {
        let mut g = NodeGraph::new();
        g.create(TextureNode::ValueNoise);
        let p = generate_program(&mut g).unwrap();
        assert!(p.body.ends_with("\timageStore(uOutput, cCoords, vec4(vec3(out_0_0), 1.0));\n"));
    }

    #[test]
    fn image_params_reserve_slots_and_sample() {
        let mut g = NodeGraph::new();
        let a = g.create(TextureNode::ImageInput);
        let uv = g.create(TextureNode::UvTransform);
        let b = g.create(TextureNode::ImageInput);
        g.connect(uv, 0, b, 0).unwrap();
        let p = generate_program(&mut g).unwrap();

        let uniforms = &p.uniforms;
        assert!(uniforms.contains("binding = 1, rgba32f) readonly uniform image2D param_0_image;"));
        assert!(uniforms.contains("binding = 2, rgba32f) readonly uniform image2D param_2_image;"));
        assert!(p.uniforms.contains("\tint param_0_image_conn;\n"));
        assert!(p.body.contains(&format!(
            "image_input((imageLoad(param_{a}_image, uv_to_texel(cUV, imageSize(param_{a}_image))) * float(param_{a}_image_conn)), out_{a}_0)"
        )));
        assert!(p.body.contains(&format!("uv_to_texel(out_{uv}_0, imageSize(param_{b}_image))")));
        let slots: Vec<u32> = p
            .bindings
            .iter()
            .filter_map(|b| match b {
                UniformBinding::Image { slot, .. } => Some(*slot),
                UniformBinding::Value { .. } => None,
            })
            .collect();
        assert_eq!(slots, vec![1, 2]);
    }

    #[test]
    fn multi_pass_synthesises_subtree() {
        let (mut g, ids) = chain(&[
            TextureNode::Color,
            TextureNode::HeightGradient,
            TextureNode::Output,
        ]);
        let p = generate_program(&mut g).unwrap();
        let (color, grad) = (ids[0], ids[1]);

        let sub = format!("vec4 subtree_{grad}(vec2 cUV) {{\n\tvec4 out_{color}_0;\n\tcolor_node(param_{color}_color, out_{color}_0);\n\treturn out_{color}_0;\n}}");
        assert!(p.definitions.contains(&sub), "{}", p.definitions);
        assert!(p.definitions.contains(&format!("void height_gradient_{grad}(")));
        assert!(p.definitions.contains(&format!("rgb_to_float(subtree_{grad}(uv + dx).xyz)")));
        assert!(!p.source.contains(SUBTREE_TOKEN));
        let gradient_at = p.definitions.find("void height_gradient_").unwrap();
        assert!(p.definitions.find(&sub).unwrap() < gradient_at);
        assert!(p.body.contains(&format!(
            "\theight_gradient_{grad}(cUV, param_{grad}_strength, param_{grad}_step, out_{grad}_0);\n"
        )));
        assert_eq!(p.definitions.matches("void color_node(").count(), 1);
    }

    #[test]
    fn multi_pass_without_input_returns_zero() {
        let mut g = NodeGraph::new();
        let grad = g.create(TextureNode::HeightGradient);
        let p = generate_program(&mut g).unwrap();
        assert!(p
            .definitions
            .contains(&format!("vec4 subtree_{grad}(vec2 cUV) {{\n\treturn vec4(0.0);\n}}")));
    }

    #[test]
    fn empty_graph_is_an_error() {
        let mut g: NodeGraph<TextureNode> = NodeGraph::new();
        let err = generate_program(&mut g).unwrap_err();
        assert_eq!(err.downcast_ref::<ShaderGenError>(), Some(&ShaderGenError::EmptyGraph));
    }

    #[test]
    fn cycle_is_an_error() {
        let mut g = NodeGraph::new();
        let a = g.create(TextureNode::Mix);
        let b = g.create(TextureNode::Mix);
        g.connect(a, 0, b, 0).unwrap();
        g.connect(b, 0, a, 0).unwrap();
        let err = generate_program(&mut g).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::GraphError>(),
            Some(crate::error::GraphError::CycleDetected(_))
        ));
    }
}
