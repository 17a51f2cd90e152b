//! wgpu compute backend.
//!
//! Generated GLSL is validated and translated to WGSL with naga, then run as a
//! compute pipeline. Set 0 holds storage images (destination at binding 0),
//! set 1 the std140 parameter block.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use image::Rgba32FImage;
use wgpu::util::DeviceExt;

use crate::backend::{GpuBackend, check_extent};
use crate::backend::reflect::{
    ImageAccess, ProgramLayout, compile_glsl, module_to_wgsl, reflect_layout,
};
use crate::shader::template::OUTPUT_BINDING;
use crate::types::UniformValue;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const BYTES_PER_TEXEL: u32 = 16;
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

struct ImageTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    extent: [u32; 2],
}

pub struct WgpuProgram {
    pipeline: wgpu::ComputePipeline,
    images_layout: wgpu::BindGroupLayout,
    params_layout: Option<wgpu::BindGroupLayout>,
    layout: ProgramLayout,
    params: Vec<u8>,
    params_buffer: Option<wgpu::Buffer>,
    inputs: BTreeMap<u32, ImageTarget>,
}

impl WgpuProgram {
    pub fn layout(&self) -> &ProgramLayout {
        &self.layout
    }
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    output: Option<ImageTarget>,
    /// Bound to input slots that have no image.
    placeholder: ImageTarget,
}

impl WgpuBackend {
    /// Request an adapter and device, blocking the calling thread.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|e| anyhow!("no GPU adapter available: {e}"))?;
        let adapter_name = adapter.get_info().name;

        // Read-only rgba32float storage images are adapter specific.
        let required_features =
            adapter.features() & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("texgraph.device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .context("failed to create GPU device")?;

        tracing::info!(adapter = %adapter_name, "using GPU adapter");
        let placeholder = create_image(&device, "texgraph.input.placeholder", [1, 1], false);
        Ok(Self {
            device,
            queue,
            adapter_name,
            output: None,
            placeholder,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Largest width or height a texture may have on this device.
    pub fn max_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn wait_idle(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.queue.on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        let start = Instant::now();
        loop {
            let _ = self.device.poll(wgpu::PollType::Poll);
            if rx.try_recv().is_ok() {
                return Ok(());
            }
            if start.elapsed() > WAIT_TIMEOUT {
                bail!("timed out waiting for GPU work to finish");
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

fn create_image(device: &wgpu::Device, label: &str, extent: [u32; 2], output: bool) -> ImageTarget {
    let extent = [extent[0].max(1), extent[1].max(1)];
    let usage = if output {
        wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC
    } else {
        wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_DST
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: extent[0],
            height: extent[1],
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    ImageTarget {
        texture,
        view,
        extent,
    }
}

fn storage_entry(binding: u32, access: ImageAccess) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: match access {
                ImageAccess::Read => wgpu::StorageTextureAccess::ReadOnly,
                ImageAccess::Write => wgpu::StorageTextureAccess::WriteOnly,
            },
            format: FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

impl GpuBackend for WgpuBackend {
    type Program = WgpuProgram;

    fn compile_program(&mut self, source: &str) -> Result<WgpuProgram> {
        let (module, info) = compile_glsl(source)?;
        let layout = reflect_layout(&module);
        let wgsl = module_to_wgsl(&module, &info)?;

        if layout.image(0, OUTPUT_BINDING).map(|s| s.access) != Some(ImageAccess::Write) {
            bail!(
                "program does not declare a writable destination image at binding {OUTPUT_BINDING}"
            );
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("texgraph.program"),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        });

        let image_entries: Vec<_> = layout
            .images
            .iter()
            .filter(|s| s.group == 0)
            .map(|s| storage_entry(s.binding, s.access))
            .collect();
        let images_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texgraph.program.images.bgl"),
            entries: &image_entries,
        });

        let params_layout = layout.params_binding.map(|(_, binding)| {
            self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texgraph.program.params.bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
        });

        let mut bind_group_layouts = vec![&images_layout];
        if let Some(params_layout) = &params_layout {
            bind_group_layouts.push(params_layout);
        }
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("texgraph.program.layout"),
            bind_group_layouts: &bind_group_layouts,
            push_constant_ranges: &[],
        });

        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("texgraph.program.pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            bail!("GPU rejected program: {err}");
        }

        let params_len = (layout.params_size.max(16) as usize).next_multiple_of(16);
        let params = vec![0u8; params_len];
        let params_buffer = layout.params_binding.map(|_| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("texgraph.program.params"),
                contents: &params,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        });

        Ok(WgpuProgram {
            pipeline,
            images_layout,
            params_layout,
            layout,
            params,
            params_buffer,
            inputs: BTreeMap::new(),
        })
    }

    fn resize_output(&mut self, extent: [u32; 2]) -> Result<()> {
        check_extent("output", extent, self.max_dimension())?;
        if self.output.as_ref().is_some_and(|o| o.extent == extent) {
            return Ok(());
        }
        self.output = Some(create_image(&self.device, "texgraph.output", extent, true));
        Ok(())
    }

    fn bind_input_image(
        &mut self,
        program: &mut WgpuProgram,
        slot: u32,
        image: Option<&Rgba32FImage>,
    ) -> Result<()> {
        if program.layout.image(0, slot).map(|s| s.access) != Some(ImageAccess::Read) {
            bail!("program has no input image at binding {slot}");
        }
        let Some(image) = image else {
            program.inputs.remove(&slot);
            return Ok(());
        };

        let (width, height) = image.dimensions();
        check_extent("input image", [width, height], self.max_dimension())?;
        let target = create_image(&self.device, "texgraph.input", [width, height], false);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(image.as_raw()),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * BYTES_PER_TEXEL),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        program.inputs.insert(slot, target);
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: &mut WgpuProgram,
        name: &str,
        value: UniformValue,
    ) -> Result<()> {
        let member = program
            .layout
            .member(name)
            .ok_or_else(|| anyhow!("program has no uniform named {name:?}"))?;
        let start = member.offset as usize;
        let bytes = value.to_bytes();
        let Some(dst) = program.params.get_mut(start..start + bytes.len()) else {
            bail!("uniform {name:?} does not fit the parameter block");
        };
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn dispatch(&mut self, program: &mut WgpuProgram, workgroups: [u32; 3]) -> Result<()> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("resize_output must be called before dispatch"))?;

        if let Some(buffer) = &program.params_buffer {
            self.queue.write_buffer(buffer, 0, &program.params);
        }

        let image_entries: Vec<wgpu::BindGroupEntry> = program
            .layout
            .images
            .iter()
            .filter(|s| s.group == 0)
            .map(|s| {
                let view = if s.binding == OUTPUT_BINDING {
                    &output.view
                } else {
                    program
                        .inputs
                        .get(&s.binding)
                        .map_or(&self.placeholder.view, |t| &t.view)
                };
                wgpu::BindGroupEntry {
                    binding: s.binding,
                    resource: wgpu::BindingResource::TextureView(view),
                }
            })
            .collect();
        let images_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texgraph.program.images.bg"),
            layout: &program.images_layout,
            entries: &image_entries,
        });

        let params_group = match (
            &program.params_layout,
            &program.params_buffer,
            program.layout.params_binding,
        ) {
            (Some(layout), Some(buffer), Some((_, binding))) => {
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("texgraph.program.params.bg"),
                    layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding,
                        resource: buffer.as_entire_binding(),
                    }],
                }))
            }
            _ => None,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texgraph.dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("texgraph.dispatch.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &images_group, &[]);
            if let Some(group) = &params_group {
                pass.set_bind_group(1, group, &[]);
            }
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn memory_barrier(&mut self) -> Result<()> {
        self.wait_idle()
    }

    fn read_output(&mut self) -> Result<Rgba32FImage> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("no output image to read"))?;
        let [width, height] = output.extent;
        let unpadded_row_bytes = width * BYTES_PER_TEXEL;
        let padded_row_bytes =
            unpadded_row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let size = (padded_row_bytes * height) as u64;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texgraph.output.readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texgraph.output.readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &output.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let start = Instant::now();
        let mapped = loop {
            let _ = self.device.poll(wgpu::PollType::Poll);
            if let Ok(result) = rx.try_recv() {
                break result;
            }
            if start.elapsed() > WAIT_TIMEOUT {
                bail!("timed out mapping the output readback buffer");
            }
            std::thread::sleep(Duration::from_millis(1));
        };
        mapped.map_err(|e| anyhow!("failed to map output readback buffer: {e}"))?;

        let data = slice.get_mapped_range();
        let mut texels: Vec<f32> = Vec::with_capacity((width * height * 4) as usize);
        for row in 0..height {
            let start = (row * padded_row_bytes) as usize;
            let end = start + unpadded_row_bytes as usize;
            texels.extend_from_slice(bytemuck::cast_slice(&data[start..end]));
        }
        drop(data);
        staging.unmap();

        Rgba32FImage::from_raw(width, height, texels)
            .ok_or_else(|| anyhow!("readback size does not match {width}x{height}"))
    }
}
