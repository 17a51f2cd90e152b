//! Headless backend that validates programs with naga and records every call.
//!
//! Nothing is executed: `read_output` returns a cleared image of the current
//! extent. Useful for tests and for checking generated programs without a GPU.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use image::Rgba32FImage;

use crate::backend::{GpuBackend, check_extent};
use crate::backend::reflect::{ImageAccess, ProgramLayout, compile_glsl, reflect_layout};
use crate::types::UniformValue;

#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    Compile,
    ResizeOutput([u32; 2]),
    BindImage { slot: u32, present: bool },
    SetUniform { name: String, value: UniformValue },
    Dispatch([u32; 3]),
    Barrier,
}

#[derive(Clone, Debug)]
pub struct ValidatedProgram {
    pub layout: ProgramLayout,
    pub uniforms: BTreeMap<String, UniformValue>,
    pub images: BTreeMap<u32, bool>,
}

#[derive(Clone, Debug)]
pub struct ValidatingBackend {
    extent: [u32; 2],
    max_dimension: u32,
    calls: Vec<BackendCall>,
}

impl Default for ValidatingBackend {
    fn default() -> Self {
        Self {
            extent: [0, 0],
            max_dimension: wgpu::Limits::default().max_texture_dimension_2d,
            calls: Vec::new(),
        }
    }
}

impl ValidatingBackend {
    /// Enforces the default wgpu texture size limit.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }
}

impl GpuBackend for ValidatingBackend {
    type Program = ValidatedProgram;

    fn compile_program(&mut self, source: &str) -> Result<ValidatedProgram> {
        self.calls.push(BackendCall::Compile);
        let (module, _) = compile_glsl(source)?;
        let layout = reflect_layout(&module);
        tracing::debug!(
            params = layout.params.len(),
            images = layout.images.len(),
            "validated program"
        );
        Ok(ValidatedProgram {
            layout,
            uniforms: BTreeMap::new(),
            images: BTreeMap::new(),
        })
    }

    fn resize_output(&mut self, extent: [u32; 2]) -> Result<()> {
        check_extent("output", extent, self.max_dimension)?;
        self.calls.push(BackendCall::ResizeOutput(extent));
        self.extent = extent;
        Ok(())
    }

    fn bind_input_image(
        &mut self,
        program: &mut ValidatedProgram,
        slot: u32,
        image: Option<&Rgba32FImage>,
    ) -> Result<()> {
        match program.layout.image(0, slot) {
            Some(s) if s.access == ImageAccess::Read => {}
            _ => bail!("program has no input image at binding {slot}"),
        }
        if let Some(image) = image {
            let (width, height) = image.dimensions();
            check_extent("input image", [width, height], self.max_dimension)?;
        }
        self.calls.push(BackendCall::BindImage {
            slot,
            present: image.is_some(),
        });
        program.images.insert(slot, image.is_some());
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: &mut ValidatedProgram,
        name: &str,
        value: UniformValue,
    ) -> Result<()> {
        if program.layout.member(name).is_none() {
            bail!("program has no uniform named {name:?}");
        }
        self.calls.push(BackendCall::SetUniform {
            name: name.to_string(),
            value,
        });
        program.uniforms.insert(name.to_string(), value);
        Ok(())
    }

    fn dispatch(&mut self, program: &mut ValidatedProgram, workgroups: [u32; 3]) -> Result<()> {
        let inputs = program
            .layout
            .images
            .iter()
            .filter(|s| s.access == ImageAccess::Read)
            .count();
        if program.images.len() != inputs {
            bail!(
                "{} of {} input images bound before dispatch",
                program.images.len(),
                inputs
            );
        }
        self.calls.push(BackendCall::Dispatch(workgroups));
        Ok(())
    }

    fn memory_barrier(&mut self) -> Result<()> {
        self.calls.push(BackendCall::Barrier);
        Ok(())
    }

    fn read_output(&mut self) -> Result<Rgba32FImage> {
        Ok(Rgba32FImage::new(self.extent[0], self.extent[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::template::assemble;

    const UNIFORMS: &str = "layout(set = 0, binding = 1, rgba32f) readonly uniform image2D param_0_image;\n\
                            layout(std140, set = 1, binding = 0) uniform Params {\n\
                            \tfloat param_1_gain;\n\
                            \tint param_0_image_conn;\n\
                            };\n";
    const BODY: &str = "\timageStore(uOutput, cCoords, imageLoad(param_0_image, cCoords) * param_1_gain * float(param_0_image_conn));\n";

    #[test]
    fn rejects_unknown_uniforms_and_slots() {
        let mut backend = ValidatingBackend::new();
        let mut program = backend.compile_program(&assemble(UNIFORMS, "", BODY)).unwrap();
        backend
            .set_uniform(&mut program, "param_1_gain", UniformValue::Float(2.0))
            .unwrap();
        assert!(backend
            .set_uniform(&mut program, "missing", UniformValue::Float(2.0))
            .is_err());
        assert!(backend.bind_input_image(&mut program, 0, None).is_err());
        assert!(backend.bind_input_image(&mut program, 7, None).is_err());
    }

    #[test]
    fn dispatch_requires_every_input_bound() {
        let mut backend = ValidatingBackend::new();
        let mut program = backend.compile_program(&assemble(UNIFORMS, "", BODY)).unwrap();
        assert!(backend.dispatch(&mut program, [1, 1, 1]).is_err());
        backend.bind_input_image(&mut program, 1, None).unwrap();
        backend.dispatch(&mut program, [1, 1, 1]).unwrap();
        assert_eq!(
            backend.calls().last(),
            Some(&BackendCall::Dispatch([1, 1, 1]))
        );
    }

    #[test]
    fn read_output_matches_extent() {
        let mut backend = ValidatingBackend::new();
        backend.resize_output([3, 2]).unwrap();
        let img = backend.read_output().unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert!(backend.resize_output([0, 2]).is_err());
    }
}
