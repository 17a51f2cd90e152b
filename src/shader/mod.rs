//! GLSL library scanning and program assembly.

pub mod codegen;
pub mod scanner;
pub mod template;

pub use codegen::{ShaderGen, Target, UniformDecl, convert_expr, zero_literal};
pub use scanner::{FunctionParam, Qualifier, ShaderFunction, replace_identifier, scan_library};
