//! Program assembly buffers with nested blocks, type coercion and function pasting.

use std::collections::{HashMap, HashSet};

use crate::error::ShaderGenError;
use crate::shader::scanner::{ShaderFunction, scan_library};
use crate::shader::template::{self, PARAMS_BLOCK};
use crate::types::ValueKind;

/// Buffer a closed block is appended to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Definitions,
    Body,
}

#[derive(Clone, Debug)]
struct Block {
    signature: Option<String>,
    text: String,
}

/// A uniform recorded by [`ShaderGen::append_uniform`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UniformDecl {
    /// Read-only storage image at `binding` in set 0.
    Image { name: String, binding: u32 },
    /// Member of the std140 parameter block.
    Member { name: String, type_name: &'static str },
}

/// Rewrite `expr`, known to be of kind `from`, into an expression of kind `to`.
///
/// Vec4 values are read as color plus alpha; luminance uses Rec. 709 weights.
pub fn convert_expr(from: ValueKind, to: ValueKind, expr: &str) -> Result<String, ShaderGenError> {
    use ValueKind::*;

    let unsupported = ShaderGenError::UnsupportedConversion { from, to };
    let source = match from {
        None => return Err(unsupported),
        Image => Vec4,
        other => other,
    };
    if source == to {
        return Ok(expr.to_string());
    }

    let v = operand(expr);
    let out = match (source, to) {
        (Vec2, Scalar) => format!("{v}.x"),
        (Vec3, Scalar) => format!("rgb_to_float({expr})"),
        (Vec4, Scalar) => format!("rgba_to_float({expr})"),

        (Scalar, Vec2) => format!("vec2({expr}, 1.0)"),
        (Vec3, Vec2) => format!("vec2(rgb_to_float({expr}), 1.0)"),
        (Vec4, Vec2) => format!("vec2(rgb_to_float({v}.xyz), {v}.w)"),

        (Scalar, Vec3) => format!("vec3({expr})"),
        (Vec2, Vec3) => format!("vec3({v}.x)"),
        (Vec4, Vec3) => format!("{v}.xyz"),

        (Scalar, Vec4) => format!("vec4(vec3({expr}), 1.0)"),
        (Vec2, Vec4) => format!("vec4(vec3({v}.x), {v}.y)"),
        (Vec3, Vec4) => format!("vec4({expr}, 1.0)"),

        _ => return Err(unsupported),
    };
    Ok(out)
}

/// `expr` as a swizzle operand: bare identifiers stay, anything else is parenthesized.
fn operand(expr: &str) -> String {
    let simple = expr.bytes().next().is_some_and(|b| !b.is_ascii_digit())
        && expr
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
    if simple {
        expr.to_string()
    } else {
        format!("({expr})")
    }
}

/// Zero literal of a numeric kind.
pub fn zero_literal(kind: ValueKind) -> Result<String, ShaderGenError> {
    match kind.local() {
        ValueKind::Scalar => Ok("0.0".to_string()),
        k if k.is_numeric() => Ok(format!("{}(0.0)", k.type_name())),
        k => Err(ShaderGenError::UnsupportedKind(k)),
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShaderGen {
    uniforms: Vec<UniformDecl>,
    definitions: String,
    body: String,
    blocks: Vec<Block>,
    functions: HashMap<String, ShaderFunction>,
    pasted: HashSet<String>,
}

impl ShaderGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the function table with the functions found in `library`.
    pub fn scan_library(&mut self, library: &str) {
        self.functions = scan_library(library)
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();
    }

    pub fn function(&self, name: &str) -> Option<&ShaderFunction> {
        self.functions.get(name)
    }

    pub fn is_pasted(&self, name: &str) -> bool {
        self.pasted.contains(name)
    }

    /// Copy `name`'s definition out of `library` into the definitions buffer,
    /// after every library function it calls. A function is pasted at most once
    /// per generator.
    pub fn paste_function(&mut self, name: &str, library: &str) -> Result<(), ShaderGenError> {
        if self.pasted.contains(name) {
            return Ok(());
        }
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| ShaderGenError::UnknownFunction(name.to_string()))?;
        self.pasted.insert(name.to_string());

        for callee in &function.calls {
            if self.functions.contains_key(callee) {
                self.paste_function(callee, library)?;
            }
        }

        let text = function
            .definition_text(library)
            .ok_or_else(|| ShaderGenError::SpanOutOfRange {
                name: name.to_string(),
                start: function.definition.start,
                end: function.definition.end,
                len: library.len(),
            })?;
        self.definitions.push_str(text);
        self.definitions.push_str("\n\n");
        Ok(())
    }

    /// Declare a uniform. Images become read-only storage images at `slot`;
    /// numeric kinds become members of the parameter block.
    pub fn append_uniform(
        &mut self,
        kind: ValueKind,
        name: &str,
        slot: u32,
    ) -> Result<(), ShaderGenError> {
        let decl = match kind {
            ValueKind::Image => UniformDecl::Image {
                name: name.to_string(),
                binding: slot,
            },
            k if k.is_numeric() => UniformDecl::Member {
                name: name.to_string(),
                type_name: k.type_name(),
            },
            k => return Err(ShaderGenError::UnsupportedKind(k)),
        };
        self.uniforms.push(decl);
        Ok(())
    }

    /// Declare an `int` parameter-block member used as a boolean flag.
    pub fn append_flag_uniform(&mut self, name: &str) {
        self.uniforms.push(UniformDecl::Member {
            name: name.to_string(),
            type_name: "int",
        });
    }

    pub fn uniform_decls(&self) -> &[UniformDecl] {
        &self.uniforms
    }

    /// Declare a local variable in the current block.
    pub fn append_variable(&mut self, kind: ValueKind, name: &str) -> Result<(), ShaderGenError> {
        let kind = kind.local();
        if !kind.is_numeric() {
            return Err(ShaderGenError::UnsupportedKind(kind));
        }
        self.append(&format!("\t{} {};\n", kind.type_name(), name));
        Ok(())
    }

    /// Append raw text to the open block, or to the body when none is open.
    pub fn append(&mut self, text: &str) {
        match self.blocks.last_mut() {
            Some(block) => block.text.push_str(text),
            None => self.body.push_str(text),
        }
    }

    /// Append `expr` converted from `from` to `to`.
    pub fn convert_type(
        &mut self,
        from: ValueKind,
        to: ValueKind,
        expr: &str,
    ) -> Result<(), ShaderGenError> {
        let converted = convert_expr(from, to, expr)?;
        self.append(&converted);
        Ok(())
    }

    pub fn begin_code_block(&mut self) {
        self.blocks.push(Block {
            signature: None,
            text: String::new(),
        });
    }

    pub fn end_code_block(&mut self, target: Target) -> Result<(), ShaderGenError> {
        self.end_block(target)
    }

    /// Open a function body; `signature` is everything before the `{`.
    pub fn begin_function_block(&mut self, signature: &str) {
        self.blocks.push(Block {
            signature: Some(signature.to_string()),
            text: String::new(),
        });
    }

    pub fn end_function_block(&mut self, target: Target) -> Result<(), ShaderGenError> {
        self.end_block(target)
    }

    fn end_block(&mut self, target: Target) -> Result<(), ShaderGenError> {
        let block = self.blocks.pop().ok_or(ShaderGenError::NoOpenBlock)?;
        let text = match block.signature {
            Some(signature) => format!("{signature} {{\n{}}}\n\n", block.text),
            None => block.text,
        };
        match target {
            Target::Definitions => self.definitions.push_str(&text),
            Target::Body => self.body.push_str(&text),
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Rendered uniform declarations.
    pub fn uniforms(&self) -> String {
        let mut out = String::new();
        for decl in &self.uniforms {
            if let UniformDecl::Image { name, binding } = decl {
                out.push_str(&format!(
                    "layout(set = 0, binding = {binding}, rgba32f) readonly uniform image2D {name};\n"
                ));
            }
        }

        let members: Vec<_> = self
            .uniforms
            .iter()
            .filter_map(|d| match d {
                UniformDecl::Member { name, type_name } => Some((name, type_name)),
                UniformDecl::Image { .. } => None,
            })
            .collect();
        if !members.is_empty() {
            out.push_str(&format!(
                "layout(std140, set = 1, binding = 0) uniform {PARAMS_BLOCK} {{\n"
            ));
            for (name, type_name) in members {
                out.push_str(&format!("\t{type_name} {name};\n"));
            }
            out.push_str("};\n");
        }
        out
    }

    pub fn definitions(&self) -> &str {
        &self.definitions
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Assemble the final program source.
    pub fn generate(&self) -> String {
        template::assemble(&self.uniforms(), &self.definitions, &self.body)
    }
}
