//! GPU execution contract and its implementations.

use anyhow::{Result, bail};
use image::Rgba32FImage;

use crate::types::UniformValue;

pub mod gpu;
pub mod reflect;
pub mod validating;

pub use gpu::WgpuBackend;
pub use reflect::{
    ImageAccess, ImageSlot, ParamMember, ProgramLayout, compile_glsl, module_to_wgsl,
    reflect_layout,
};
pub use validating::{BackendCall, ValidatingBackend};

/// What [`TextureGraph`](crate::texture::TextureGraph) needs from a GPU.
///
/// The destination image is owned by the backend and is always bound at set 0,
/// binding 0 with `rgba32f` format.
pub trait GpuBackend {
    type Program;

    /// Compile a compute program. The error message is the diagnostic shown
    /// to the user.
    fn compile_program(&mut self, source: &str) -> Result<Self::Program>;

    /// Create or resize the destination image.
    fn resize_output(&mut self, extent: [u32; 2]) -> Result<()>;

    /// Bind (or unbind with `None`) an input image at set 0, `slot`.
    fn bind_input_image(
        &mut self,
        program: &mut Self::Program,
        slot: u32,
        image: Option<&Rgba32FImage>,
    ) -> Result<()>;

    fn set_uniform(
        &mut self,
        program: &mut Self::Program,
        name: &str,
        value: UniformValue,
    ) -> Result<()>;

    fn dispatch(&mut self, program: &mut Self::Program, workgroups: [u32; 3]) -> Result<()>;

    /// Wait until dispatched work is visible to [`GpuBackend::read_output`].
    fn memory_barrier(&mut self) -> Result<()>;

    fn read_output(&mut self) -> Result<Rgba32FImage>;
}

/// Reject image extents that are empty or larger than the device allows.
pub fn check_extent(what: &str, extent: [u32; 2], max_dimension: u32) -> Result<()> {
    let [width, height] = extent;
    if width == 0 || height == 0 {
        bail!("{what} extent must be non-zero, got {width}x{height}");
    }
    if width > max_dimension || height > max_dimension {
        bail!(
            "{what} extent {width}x{height} exceeds the device limit of {max_dimension} texels per side"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_checks_both_sides() {
        check_extent("output", [8192, 1], 8192).unwrap();
        assert!(check_extent("output", [0, 4], 8192).is_err());
        let err = check_extent("input image", [9000, 1], 8192).unwrap_err();
        assert!(format!("{err}").contains("9000x1 exceeds the device limit of 8192"));
        assert!(check_extent("output", [1, 9000], 8192).is_err());
    }
}
