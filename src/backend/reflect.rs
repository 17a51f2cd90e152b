//! GLSL compilation and resource reflection using the naga library.

use anyhow::{Result, anyhow};

/// One member of the std140 parameter block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamMember {
    pub name: String,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageAccess {
    Read,
    Write,
}

/// A storage image declared by the program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSlot {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub access: ImageAccess,
}

/// Resources a compiled program expects, as reported by naga.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramLayout {
    pub params: Vec<ParamMember>,
    /// Byte size of the parameter block, 0 when the program declares none.
    pub params_size: u32,
    /// `(group, binding)` of the parameter block.
    pub params_binding: Option<(u32, u32)>,
    /// Sorted by `(group, binding)`.
    pub images: Vec<ImageSlot>,
}

impl ProgramLayout {
    pub fn member(&self, name: &str) -> Option<&ParamMember> {
        self.params.iter().find(|m| m.name == name)
    }

    pub fn image(&self, group: u32, binding: u32) -> Option<&ImageSlot> {
        self.images
            .iter()
            .find(|s| s.group == group && s.binding == binding)
    }
}

/// Parse and validate a GLSL compute program.
pub fn compile_glsl(source: &str) -> Result<(naga::Module, naga::valid::ModuleInfo)> {
    let mut parser = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: naga::ShaderStage::Compute,
        defines: Default::default(),
    };

    let module = parser
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}"))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("GLSL validation failed: {e:?}"))?;

    Ok((module, info))
}

/// Translate a validated module to WGSL.
pub fn module_to_wgsl(module: &naga::Module, info: &naga::valid::ModuleInfo) -> Result<String> {
    naga::back::wgsl::write_string(module, info, naga::back::wgsl::WriterFlags::EXPLICIT_TYPES)
        .map_err(|e| anyhow!("WGSL writer failed: {e:?}"))
}

pub fn reflect_layout(module: &naga::Module) -> ProgramLayout {
    let mut layout = ProgramLayout::default();

    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        match var.space {
            naga::AddressSpace::Uniform => {
                if let naga::TypeInner::Struct { members, span } = &module.types[var.ty].inner {
                    layout.params = members
                        .iter()
                        .filter_map(|m| {
                            m.name.clone().map(|name| ParamMember {
                                name,
                                offset: m.offset,
                            })
                        })
                        .collect();
                    layout.params_size = *span;
                    layout.params_binding = Some((binding.group, binding.binding));
                }
            }
            naga::AddressSpace::Handle => {
                if let naga::TypeInner::Image {
                    class: naga::ImageClass::Storage { access, .. },
                    ..
                } = module.types[var.ty].inner
                {
                    let access = if access.contains(naga::StorageAccess::STORE) {
                        ImageAccess::Write
                    } else {
                        ImageAccess::Read
                    };
                    layout.images.push(ImageSlot {
                        name: var.name.clone().unwrap_or_default(),
                        group: binding.group,
                        binding: binding.binding,
                        access,
                    });
                }
            }
            _ => {}
        }
    }

    layout.images.sort_by_key(|s| (s.group, s.binding));
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::template::assemble;

    #[test]
    fn reflects_block_members_and_images() {
        let uniforms = "layout(set = 0, binding = 1, rgba32f) readonly uniform image2D param_0_image;\n\
                        layout(std140, set = 1, binding = 0) uniform Params {\n\
                        \tvec3 param_1_tint;\n\
                        \tfloat param_1_gain;\n\
                        \tint param_0_image_conn;\n\
                        };\n";
        let body = "\tvec4 px = imageLoad(param_0_image, uv_to_texel(cUV, imageSize(param_0_image))) * float(param_0_image_conn);\n\
                    \timageStore(uOutput, cCoords, vec4(px.xyz * param_1_tint * param_1_gain, 1.0));\n";
        let src = assemble(uniforms, "", body);
        let (module, _) = compile_glsl(&src).unwrap_or_else(|e| panic!("{e:#}\n{src}"));
        let layout = reflect_layout(&module);

        let names: Vec<_> = layout.params.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["param_1_tint", "param_1_gain", "param_0_image_conn"]);
        assert_eq!(layout.member("param_1_tint").unwrap().offset, 0);
        assert_eq!(layout.member("param_1_gain").unwrap().offset, 12);
        assert_eq!(layout.member("param_0_image_conn").unwrap().offset, 16);
        assert_eq!(layout.params_binding, Some((1, 0)));
        assert!(layout.params_size >= 20);

        assert_eq!(layout.images.len(), 2);
        assert_eq!(layout.image(0, 0).unwrap().access, ImageAccess::Write);
        assert_eq!(layout.image(0, 1).unwrap().access, ImageAccess::Read);
    }

    #[test]
    fn invalid_source_reports_a_diagnostic() {
        let src = assemble("", "", "\tundefined_call(cUV);\n");
        let err = compile_glsl(&src).unwrap_err();
        assert!(format!("{err}").starts_with("GLSL parse failed"));
    }

    #[test]
    fn translates_to_wgsl() {
        let src = assemble("", "", "\timageStore(uOutput, cCoords, vec4(cUV, 0.0, 1.0));\n");
        let (module, info) = compile_glsl(&src).unwrap();
        let wgsl = module_to_wgsl(&module, &info).unwrap();
        assert!(wgsl.contains("@compute"));
        assert!(wgsl.contains("texture_storage_2d<rgba32float"));
    }
}
