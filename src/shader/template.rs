//! Fixed program boilerplate around the generated sections.

pub const UNIFORMS_MARKER: &str = "<uniforms>";
pub const DEFS_MARKER: &str = "<defs>";
pub const BODY_MARKER: &str = "<body>";

/// Workgroup edge length declared by the template.
pub const WORKGROUP_SIZE: u32 = 16;

/// Destination image binding (set 0).
pub const OUTPUT_BINDING: u32 = 0;
pub const OUTPUT_NAME: &str = "uOutput";

/// Name of the std140 block holding scalar/vector uniforms (set 1, binding 0).
pub const PARAMS_BLOCK: &str = "Params";

/// Implicit per-pixel coordinate in [0, 1].
pub const UV: &str = "cUV";
pub const COORDS: &str = "cCoords";

const TEMPLATE: &str = r#"#version 450
layout(local_size_x = 16, local_size_y = 16, local_size_z = 1) in;

layout(set = 0, binding = 0, rgba32f) writeonly uniform image2D uOutput;
<uniforms>
const float PI = 3.141592654;

float rgb_to_float(vec3 color) {
    return color.x * 0.2126 + color.y * 0.7152 + color.z * 0.0722;
}

float rgba_to_float(vec4 color) {
    return rgb_to_float(color.xyz) * color.w;
}

ivec2 uv_to_texel(vec2 uv, ivec2 size) {
    return clamp(ivec2(floor(uv * vec2(size))), ivec2(0), size - ivec2(1));
}

<defs>
void main() {
    ivec2 cCoords = ivec2(gl_GlobalInvocationID.xy);
    ivec2 cSize = imageSize(uOutput);
    if (cCoords.x >= cSize.x || cCoords.y >= cSize.y) {
        return;
    }
    vec2 cUV = (vec2(cCoords) + vec2(0.5)) / vec2(cSize);
<body>}
"#;

/// Substitute the three generated sections into the program template.
pub fn assemble(uniforms: &str, definitions: &str, body: &str) -> String {
    TEMPLATE
        .replacen(UNIFORMS_MARKER, uniforms, 1)
        .replacen(DEFS_MARKER, definitions, 1)
        .replacen(BODY_MARKER, body, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sections_still_validate() {
        let src = assemble("", "", "");
        assert!(!src.contains('<'));
        let module = naga::front::glsl::Frontend::default()
            .parse(
                &naga::front::glsl::Options {
                    stage: naga::ShaderStage::Compute,
                    defines: Default::default(),
                },
                &src,
            )
            .unwrap_or_else(|e| panic!("template failed to parse: {e:?}\n{src}"));
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap();
    }

    #[test]
    fn sections_land_in_order() {
        let src = assemble("U;\n", "D\n", "\tB;\n");
        let u = src.find("U;").unwrap();
        let d = src.find("D\n").unwrap();
        let b = src.find("\tB;").unwrap();
        assert!(u < d && d < b);
        assert!(src.trim_end().ends_with('}'));
    }
}
