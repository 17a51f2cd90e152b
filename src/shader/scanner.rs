//! Function-signature extractor for GLSL library text.
//!
//! This is not a GLSL parser. It recognises `<type> <name>(<params>) { ... }`
//! at any nesting depth outside of braces, records each parameter's kind and
//! direction, the byte spans of the definition and its body, and the
//! identifiers the body calls. Comments and preprocessor lines are skipped.

use std::collections::HashMap;
use std::ops::Range;

use crate::types::ValueKind;
use crate::utils::{is_ident_byte, is_ident_start};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Qualifier {
    #[default]
    None,
    In,
    Out,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionParam {
    pub kind: ValueKind,
    pub qualifier: Qualifier,
    /// Type as written; kept for diagnostics when `kind` is `None`.
    pub type_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderFunction {
    pub name: String,
    pub return_type: String,
    /// Positional order of the parameters at a call site.
    pub parameter_order: Vec<String>,
    pub parameters: HashMap<String, FunctionParam>,
    /// Return type through closing brace.
    pub definition: Range<usize>,
    /// Opening through closing brace.
    pub body: Range<usize>,
    /// Identifiers invoked as `name(` inside the body, first use first.
    pub calls: Vec<String>,
}

impl ShaderFunction {
    pub fn param(&self, name: &str) -> Option<&FunctionParam> {
        self.parameters.get(name)
    }

    /// Parameters in call order.
    pub fn ordered_params(&self) -> impl Iterator<Item = (&str, &FunctionParam)> {
        self.parameter_order
            .iter()
            .filter_map(|n| self.parameters.get(n).map(|p| (n.as_str(), p)))
    }

    pub fn definition_text<'a>(&self, source: &'a str) -> Option<&'a str> {
        source.get(self.definition.clone())
    }

    pub fn body_text<'a>(&self, source: &'a str) -> Option<&'a str> {
        source.get(self.body.clone())
    }
}

const NOT_CALLS: &[&str] = &[
    "if", "for", "while", "switch", "return", "int", "uint", "bool", "float", "vec2", "vec3",
    "vec4", "ivec2", "ivec3", "ivec4", "uvec2", "uvec3", "uvec4", "bvec2", "bvec3", "bvec4",
    "mat2", "mat3", "mat4",
];

/// Scan `source` and return every function definition in source order.
pub fn scan_library(source: &str) -> Vec<ShaderFunction> {
    let mut scanner = Scanner::new(source);
    let mut out = Vec::new();

    loop {
        scanner.skip_trivia();
        let Some(b) = scanner.peek() else {
            break;
        };

        if is_ident_start(b) {
            let start = scanner.pos;
            let first = scanner.ident();
            let after_first = scanner.pos;
            scanner.skip_trivia();
            if scanner.peek().is_some_and(is_ident_start) {
                let second = scanner.ident();
                scanner.skip_trivia();
                if scanner.peek() == Some(b'(') {
                    if let Some(f) = scanner.function(start, first, second) {
                        out.push(f);
                    }
                    continue;
                }
            }
            scanner.pos = after_first;
        } else if b == b'{' {
            scanner.skip_block();
        } else {
            scanner.pos += 1;
        }
    }
    out
}

/// Replace whole-identifier occurrences of `from` with `to`.
pub fn replace_identifier(source: &str, from: &str, to: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < bytes.len() {
        if is_ident_start(bytes[i]) || bytes[i] == b'$' {
            let start = i;
            i += 1;
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            let word = &source[start..i];
            if word == from {
                out.push_str(to);
            } else {
                out.push_str(word);
            }
        } else if bytes[i].is_ascii_digit() {
            // Keep numeric suffixes like `1.0f` away from identifier matching.
            let start = i;
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            out.push_str(&source[start..i]);
        } else {
            let ch_len = source[i..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&source[i..i + ch_len]);
            i += ch_len;
        }
    }
    out
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn at_line_start(&self) -> bool {
        self.bytes[..self.pos]
            .iter()
            .rev()
            .take_while(|b| **b != b'\n')
            .all(|b| b.is_ascii_whitespace())
    }

    fn skip_to_line_end(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'/' && self.peek_at(1) == Some(b'/') {
                self.skip_to_line_end();
            } else if b == b'/' && self.peek_at(1) == Some(b'*') {
                self.pos += 2;
                while self.pos < self.bytes.len()
                    && !(self.bytes[self.pos] == b'*' && self.peek_at(1) == Some(b'/'))
                {
                    self.pos += 1;
                }
                self.pos = (self.pos + 2).min(self.bytes.len());
            } else if b == b'#' && self.at_line_start() {
                self.skip_to_line_end();
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// Skip a balanced `{ ... }` starting at the current `{`. Returns false
    /// if the text ends before the braces balance.
    fn skip_block(&mut self) -> bool {
        let mut depth = 0usize;
        loop {
            self.skip_trivia();
            let Some(b) = self.peek() else {
                return false;
            };
            self.pos += 1;
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return true;
                    }
                }
                _ => {}
            }
        }
    }

    /// Parse a parameter list and body. `self.pos` is at `(`.
    fn function(&mut self, start: usize, return_type: &str, name: &str) -> Option<ShaderFunction> {
        self.pos += 1;
        let mut groups: Vec<Vec<&'a str>> = Vec::new();
        let mut tokens: Vec<&'a str> = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek()? {
                b')' => {
                    self.pos += 1;
                    if !tokens.is_empty() {
                        groups.push(std::mem::take(&mut tokens));
                    }
                    break;
                }
                b',' => {
                    self.pos += 1;
                    groups.push(std::mem::take(&mut tokens));
                }
                b if is_ident_start(b) => tokens.push(self.ident()),
                _ => {
                    // Not a parameter list (expression, array size, ...).
                    return None;
                }
            }
        }

        self.skip_trivia();
        match self.peek() {
            Some(b'{') => {}
            Some(b';') => {
                self.pos += 1;
                return None;
            }
            _ => return None,
        }

        let body_start = self.pos;
        if !self.skip_block() {
            return None;
        }
        let body = body_start..self.pos;

        let mut parameter_order = Vec::new();
        let mut parameters = HashMap::new();
        let only_void = groups.len() == 1 && groups[0].as_slice() == ["void"];
        if !only_void {
            for group in &groups {
                let Some((param_name, param)) = parse_param(name, group) else {
                    continue;
                };
                parameter_order.push(param_name.to_string());
                parameters.insert(param_name.to_string(), param);
            }
        }

        let calls = collect_calls(&self.src[body.clone()], name);

        Some(ShaderFunction {
            name: name.to_string(),
            return_type: return_type.to_string(),
            parameter_order,
            parameters,
            definition: start..self.pos,
            body,
            calls,
        })
    }
}

fn parse_param<'a>(function: &str, group: &[&'a str]) -> Option<(&'a str, FunctionParam)> {
    if group.len() < 2 {
        tracing::warn!(function, ?group, "ignoring malformed parameter");
        return None;
    }
    let name = group[group.len() - 1];
    let type_name = group[group.len() - 2];
    let qualifiers = &group[..group.len() - 2];
    let qualifier = if qualifiers.contains(&"out") {
        Qualifier::Out
    } else if qualifiers.contains(&"in") {
        Qualifier::In
    } else {
        Qualifier::None
    };

    let kind = match ValueKind::from_type_name(type_name) {
        Some(kind) => kind,
        None => {
            tracing::warn!(function, param = name, type_name, "unrecognised parameter type");
            ValueKind::None
        }
    };

    Some((
        name,
        FunctionParam {
            kind,
            qualifier,
            type_name: type_name.to_string(),
        },
    ))
}

fn collect_calls(body: &str, this: &str) -> Vec<String> {
    let mut scanner = Scanner::new(body);
    let mut calls: Vec<String> = Vec::new();
    let mut prev: Option<u8> = None;

    loop {
        scanner.skip_trivia();
        let Some(b) = scanner.peek() else {
            break;
        };
        if is_ident_start(b) {
            let member = prev == Some(b'.');
            let ident = scanner.ident();
            let save = scanner.pos;
            scanner.skip_trivia();
            let called = scanner.peek() == Some(b'(');
            scanner.pos = save;
            if called
                && !member
                && ident != this
                && !NOT_CALLS.contains(&ident)
                && !calls.iter().any(|c| c == ident)
            {
                calls.push(ident.to_string());
            }
            prev = Some(b'a');
        } else if b.is_ascii_digit() {
            while scanner.peek().is_some_and(|c| is_ident_byte(c) || c == b'.') {
                scanner.pos += 1;
            }
            prev = Some(b'0');
        } else {
            prev = Some(b);
            scanner.pos += 1;
        }
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_signature_and_body() {
        let src = "void f(in vec2 a, out float b) { b = a.x; }";
        let fns = scan_library(src);
        assert_eq!(fns.len(), 1);
        let f = &fns[0];
        assert_eq!(f.name, "f");
        assert_eq!(f.return_type, "void");
        assert_eq!(f.parameter_order, vec!["a", "b"]);
        let kinds: Vec<_> = f.ordered_params().map(|(_, p)| p.kind).collect();
        assert_eq!(kinds, vec![ValueKind::Vec2, ValueKind::Scalar]);
        let quals: Vec<_> = f.ordered_params().map(|(_, p)| p.qualifier).collect();
        assert_eq!(quals, vec![Qualifier::In, Qualifier::Out]);
        assert_eq!(f.body_text(src), Some("{ b = a.x; }"));
        assert_eq!(f.definition_text(src), Some(src));
    }

    #[test]
    fn two_token_params_have_no_qualifier() {
        let fns = scan_library("float g(vec4 c, float k) { return c.x * k; }");
        let g = &fns[0];
        assert_eq!(g.param("c").unwrap().qualifier, Qualifier::None);
        assert_eq!(g.param("k").unwrap().kind, ValueKind::Scalar);
    }

    #[test]
    fn void_parameter_list_is_empty() {
        let fns = scan_library("float one(void) { return 1.0; }\nfloat two() { return 2.0; }");
        assert_eq!(fns.len(), 2);
        assert!(fns.iter().all(|f| f.parameter_order.is_empty()));
    }

    #[test]
    fn skips_prototypes_comments_and_directives() {
        let src = "#define FOO 1\n\
                   // void commented(float x) { }\n\
                   float proto(float x);\n\
                   /* vec4 hidden(vec4 c) { return c; } */\n\
                   float real(float x) { /* } */ return x; // }\n}\n";
        let fns = scan_library(src);
        let names: Vec<_> = fns.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["real"]);
        assert!(fns[0].body_text(src).unwrap().ends_with("\n}"));
    }

    #[test]
    fn nested_braces_are_balanced() {
        let src = "void a(out float r) { if (true) { r = 1.0; } else { r = 0.0; } }\nvoid b(out float r) { r = 2.0; }";
        let fns = scan_library(src);
        assert_eq!(fns.len(), 2);
        assert_eq!(fns[1].definition_text(src), Some("void b(out float r) { r = 2.0; }"));
    }

    #[test]
    fn unknown_types_are_kept_as_none() {
        let fns = scan_library("void m(in mat3 t, out vec3 r) { r = t[0]; }");
        let m = &fns[0];
        assert_eq!(m.parameter_order, vec!["t", "r"]);
        assert_eq!(m.param("t").unwrap().kind, ValueKind::None);
        assert_eq!(m.param("t").unwrap().type_name, "mat3");
    }

    #[test]
    fn records_calls_at_scan_time() {
        let src = "float h(vec2 p) { return fract(sin(dot(p, vec2(12.9898, 78.233))) * 43758.5453); }\n\
                   void n(in vec2 uv, out float r) { float v = h(floor(uv)); r = v + p.length(); }";
        let fns = scan_library(src);
        assert_eq!(fns[0].calls, vec!["fract", "sin", "dot"]);
        assert_eq!(fns[1].calls, vec!["h", "floor"]);
    }

    #[test]
    fn replaces_whole_identifiers_only() {
        let src = "vec4 s = $subtree(uv) + $subtree_x(uv); float subtree = 1.0;";
        let out = replace_identifier(src, "$subtree", "subtree_4");
        assert_eq!(out, "vec4 s = subtree_4(uv) + $subtree_x(uv); float subtree = 1.0;");
        assert_eq!(replace_identifier("f(f1, ff)", "f", "g"), "g(f1, ff)");
    }
}
