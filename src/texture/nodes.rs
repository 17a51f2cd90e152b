//! Built-in texture node set.
//!
//! Every library below is plain GLSL 450 that naga's front end accepts: no
//! overloads, no macros, float literals in float math and no `__` in names.

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeBehavior};
use crate::texture::{COORD_SOCKET, ParamBinding, ParameterMap, ShaderNode};
use crate::types::ValueKind;

/// Default step used by [`TextureNode::HeightGradient`], one texel at 512px.
pub const DEFAULT_GRADIENT_STEP: f32 = 1.0 / 512.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureNode {
    /// Constant color.
    Color,
    /// Two-color gradient along an angle in degrees.
    LinearGradient,
    /// `mix(A, B, Factor)`.
    Mix,
    /// Photoshop-style blend: Mode 0 multiply, 1 screen, 2 add, 3 difference.
    Blend,
    /// Smooth value noise.
    ValueNoise,
    /// Samples a loaded image at the pixel or at a connected `Coord`.
    ImageInput,
    /// Offset/scale/rotate texture coordinates around the center.
    UvTransform,
    /// Finite-difference gradient of the upstream subgraph's luminance.
    HeightGradient,
    /// Graph output; its first output is written to the destination image.
    Output,
}

impl TextureNode {
    pub const ALL: [TextureNode; 9] = [
        TextureNode::Color,
        TextureNode::LinearGradient,
        TextureNode::Mix,
        TextureNode::Blend,
        TextureNode::ValueNoise,
        TextureNode::ImageInput,
        TextureNode::UvTransform,
        TextureNode::HeightGradient,
        TextureNode::Output,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TextureNode::Color => "Color",
            TextureNode::LinearGradient => "Linear Gradient",
            TextureNode::Mix => "Mix",
            TextureNode::Blend => "Blend",
            TextureNode::ValueNoise => "Value Noise",
            TextureNode::ImageInput => "Image",
            TextureNode::UvTransform => "UV Transform",
            TextureNode::HeightGradient => "Height Gradient",
            TextureNode::Output => "Output",
        }
    }
}

const COLOR_LIB: &str = r#"
void color_node(in vec4 color, out vec4 result) {
    result = color;
}
"#;

const LINEAR_GRADIENT_LIB: &str = r#"
void linear_gradient(in vec2 uv, in float angle, in vec4 color_a, in vec4 color_b, out vec4 result) {
    float rad = angle * PI / 180.0;
    vec2 dir = vec2(cos(rad), sin(rad));
    float t = clamp(dot(uv - vec2(0.5), dir) + 0.5, 0.0, 1.0);
    result = mix(color_a, color_b, t);
}
"#;

const MIX_LIB: &str = r#"
void mix_node(in vec4 a, in vec4 b, in float factor, out vec4 result) {
    result = mix(a, b, clamp(factor, 0.0, 1.0));
}
"#;

const BLEND_LIB: &str = r#"
vec3 blend_multiply(vec3 a, vec3 b) {
    return a * b;
}

vec3 blend_screen(vec3 a, vec3 b) {
    return vec3(1.0) - (vec3(1.0) - a) * (vec3(1.0) - b);
}

vec3 blend_rgb(vec3 a, vec3 b, float mode) {
    if (mode < 0.5) {
        return blend_multiply(a, b);
    }
    if (mode < 1.5) {
        return blend_screen(a, b);
    }
    if (mode < 2.5) {
        return min(a + b, vec3(1.0));
    }
    return abs(a - b);
}

void blend_node(in vec4 base, in vec4 layer, in float mode, in float opacity, out vec4 result) {
    vec3 blended = blend_rgb(base.xyz, layer.xyz, mode);
    float amount = clamp(opacity * layer.w, 0.0, 1.0);
    result = vec4(mix(base.xyz, blended, amount), base.w);
}
"#;

const VALUE_NOISE_LIB: &str = r#"
float hash21(vec2 p, float seed) {
    vec3 p3 = fract(vec3(p.x, p.y, p.x) * 0.1031 + vec3(seed * 0.013));
    p3 = p3 + vec3(dot(p3, p3.yzx + vec3(33.33)));
    return fract((p3.x + p3.y) * p3.z);
}

float value_noise_at(vec2 p, float seed) {
    vec2 cell = floor(p);
    vec2 f = fract(p);
    vec2 u = f * f * (vec2(3.0) - 2.0 * f);
    float a = hash21(cell, seed);
    float b = hash21(cell + vec2(1.0, 0.0), seed);
    float c = hash21(cell + vec2(0.0, 1.0), seed);
    float d = hash21(cell + vec2(1.0, 1.0), seed);
    return mix(mix(a, b, u.x), mix(c, d, u.x), u.y);
}

void value_noise(in vec2 uv, in float scale, in float seed, out float result) {
    result = value_noise_at(uv * scale, seed);
}
"#;

const IMAGE_INPUT_LIB: &str = r#"
void image_input(in vec4 pixel, out vec4 result) {
    result = pixel;
}
"#;

const UV_TRANSFORM_LIB: &str = r#"
void uv_transform(in vec2 uv, in vec2 offset, in vec2 scale, in float rotation, out vec2 result) {
    float rad = rotation * PI / 180.0;
    float c = cos(rad);
    float s = sin(rad);
    vec2 p = (uv - vec2(0.5)) * scale;
    result = vec2(p.x * c - p.y * s, p.x * s + p.y * c) + vec2(0.5) + offset;
}
"#;

const HEIGHT_GRADIENT_LIB: &str = r#"
void height_gradient(in vec2 uv, in float strength, in float step_size, out vec2 result) {
    float h = max(step_size, 0.000001);
    vec2 dx = vec2(h, 0.0);
    vec2 dy = vec2(0.0, h);
    float gx = rgb_to_float($subtree(uv + dx).xyz) - rgb_to_float($subtree(uv - dx).xyz);
    float gy = rgb_to_float($subtree(uv + dy).xyz) - rgb_to_float($subtree(uv - dy).xyz);
    result = vec2(gx, gy) * (strength / (2.0 * h));
}
"#;

const OUTPUT_LIB: &str = r#"
void texture_output(in vec4 color, out vec4 result) {
    result = color;
}
"#;

fn map(entries: &[(&str, ParamBinding)]) -> ParameterMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

impl NodeBehavior for TextureNode {
    fn setup(node: &mut Node<Self>) {
        use ValueKind::*;

        let kind = node.behavior;
        match kind {
            TextureNode::Color => {
                node.add_output("Color", Vec4);
                node.add_param("Color", Vec4, [1.0, 1.0, 1.0, 1.0]);
            }
            TextureNode::LinearGradient => {
                node.add_input("UV", Vec2);
                node.add_output("Color", Vec4);
                node.add_param("Angle", Scalar, [0.0; 4]);
                node.add_param("Color A", Vec4, [0.0, 0.0, 0.0, 1.0]);
                node.add_param("Color B", Vec4, [1.0, 1.0, 1.0, 1.0]);
            }
            TextureNode::Mix => {
                node.add_input("A", Vec4);
                node.add_input("B", Vec4);
                node.add_input("Factor", Scalar);
                node.add_output("Color", Vec4);
                node.add_param("Factor", Scalar, [0.5, 0.0, 0.0, 0.0]);
            }
            TextureNode::Blend => {
                node.add_input("Base", Vec4);
                node.add_input("Layer", Vec4);
                node.add_input("Opacity", Scalar);
                node.add_output("Color", Vec4);
                node.add_param("Mode", Scalar, [0.0; 4]);
                node.add_param("Opacity", Scalar, [1.0, 0.0, 0.0, 0.0]);
            }
            TextureNode::ValueNoise => {
                node.add_input("UV", Vec2);
                node.add_output("Value", Scalar);
                node.add_param("Scale", Scalar, [8.0, 0.0, 0.0, 0.0]);
                node.add_param("Seed", Scalar, [0.0; 4]);
            }
            TextureNode::ImageInput => {
                node.add_input(COORD_SOCKET, Vec2);
                node.add_output("Color", Vec4);
                node.add_param("Image", Image, [0.0; 4]);
            }
            TextureNode::UvTransform => {
                node.add_input("UV", Vec2);
                node.add_output("UV", Vec2);
                node.add_param("Offset", Vec2, [0.0; 4]);
                node.add_param("Scale", Vec2, [1.0, 1.0, 0.0, 0.0]);
                node.add_param("Rotation", Scalar, [0.0; 4]);
            }
            TextureNode::HeightGradient => {
                node.add_input("Height", Vec4);
                node.add_output("Gradient", Vec2);
                node.add_param("Strength", Scalar, [1.0, 0.0, 0.0, 0.0]);
                node.add_param("Step", Scalar, [DEFAULT_GRADIENT_STEP, 0.0, 0.0, 0.0]);
            }
            TextureNode::Output => {
                node.add_input("Color", Vec4);
                node.add_output("Color", Vec4);
            }
        }
    }

    /// CPU-side pass used by the generic solve: constants publish their value
    /// and the output node forwards what it receives.
    fn solve(node: &mut Node<Self>) {
        let kind = node.behavior;
        let value = match kind {
            TextureNode::Color => node.param("Color").map(|p| p.value),
            TextureNode::Output => node.input(0).map(|s| s.value),
            _ => None,
        };
        if let (Some(value), Some(out)) = (value, node.output_mut(0)) {
            out.value = value;
        }
    }
}

impl ShaderNode for TextureNode {
    fn function_name(&self) -> &str {
        match self {
            TextureNode::Color => "color_node",
            TextureNode::LinearGradient => "linear_gradient",
            TextureNode::Mix => "mix_node",
            TextureNode::Blend => "blend_node",
            TextureNode::ValueNoise => "value_noise",
            TextureNode::ImageInput => "image_input",
            TextureNode::UvTransform => "uv_transform",
            TextureNode::HeightGradient => "height_gradient",
            TextureNode::Output => "texture_output",
        }
    }

    fn library(&self) -> &str {
        match self {
            TextureNode::Color => COLOR_LIB,
            TextureNode::LinearGradient => LINEAR_GRADIENT_LIB,
            TextureNode::Mix => MIX_LIB,
            TextureNode::Blend => BLEND_LIB,
            TextureNode::ValueNoise => VALUE_NOISE_LIB,
            TextureNode::ImageInput => IMAGE_INPUT_LIB,
            TextureNode::UvTransform => UV_TRANSFORM_LIB,
            TextureNode::HeightGradient => HEIGHT_GRADIENT_LIB,
            TextureNode::Output => OUTPUT_LIB,
        }
    }

    fn parameters(&self) -> ParameterMap {
        match self {
            TextureNode::Color => map(&[("color", ParamBinding::new("Color"))]),
            TextureNode::LinearGradient => map(&[
                ("uv", ParamBinding::coords("UV")),
                ("angle", ParamBinding::new("Angle")),
                ("color_a", ParamBinding::new("Color A")),
                ("color_b", ParamBinding::new("Color B")),
            ]),
            TextureNode::Mix => map(&[
                ("a", ParamBinding::new("A")),
                ("b", ParamBinding::new("B")),
                ("factor", ParamBinding::new("Factor")),
            ]),
            TextureNode::Blend => map(&[
                ("base", ParamBinding::new("Base")),
                ("layer", ParamBinding::new("Layer")),
                ("mode", ParamBinding::new("Mode")),
                ("opacity", ParamBinding::new("Opacity")),
            ]),
            TextureNode::ValueNoise => map(&[
                ("uv", ParamBinding::coords("UV")),
                ("scale", ParamBinding::new("Scale")),
                ("seed", ParamBinding::new("Seed")),
            ]),
            TextureNode::ImageInput => map(&[("pixel", ParamBinding::new("Image"))]),
            TextureNode::UvTransform => map(&[
                ("uv", ParamBinding::coords("UV")),
                ("offset", ParamBinding::new("Offset")),
                ("scale", ParamBinding::new("Scale")),
                ("rotation", ParamBinding::new("Rotation")),
            ]),
            TextureNode::HeightGradient => map(&[
                ("uv", ParamBinding::coords("UV")),
                ("strength", ParamBinding::new("Strength")),
                ("step_size", ParamBinding::new("Step")),
            ]),
            TextureNode::Output => map(&[("color", ParamBinding::new("Color"))]),
        }
    }

    fn multi_pass(&self) -> bool {
        matches!(self, TextureNode::HeightGradient)
    }

    fn is_output(&self) -> bool {
        matches!(self, TextureNode::Output)
    }
}
