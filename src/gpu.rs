//! wgpu render driver.
//!
//! Every pass draws one full-screen triangle. Bind group 0 is laid out as:
//!   - binding 0: the pass's uniform table, packed std140 (see [`UniformSet::to_std140`])
//!   - binding 1: a sampler shared by all textures
//!   - binding 2..: one texture per sampler name declared by the program, in declaration order
//!
//! Sampler names that the engine did not bind for a pass get a 1x1 transparent placeholder, so
//! a program's layout never changes between frames. Each pass is its own queue submission and
//! [`RenderDriver::fence`] blocks until that submission finished.
//!
//! [`UniformSet::to_std140`]: crate::uniforms::UniformSet::to_std140

use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use wgpu::util::DeviceExt;

use crate::config::FloatFormat;
use crate::driver::{BufferRequest, PassDraw, PixelFormat, RenderDriver, SamplerSource};
use crate::error::DriverError;
use crate::schema::Size;

/// Vertex stage shared by every program: a full-screen triangle with `uv` in `[0, 1]`, `(0, 0)`
/// at the top-left corner.
pub const FULLSCREEN_VERTEX_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    out.position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}
"#;

const TEXTURE_BINDING_START: u32 = 2;
const PIPELINE_FORMATS: [PixelFormat; 3] = [
    PixelFormat::Rgba8Unorm,
    PixelFormat::Rgba16Float,
    PixelFormat::Rgba32Float,
];

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Size,
    format: PixelFormat,
}

impl WgpuTexture {
    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn raw(&self) -> &wgpu::Texture {
        &self.texture
    }
}

/// A compiled ISF program: one pipeline per target format, sharing one bind group layout.
pub struct WgpuProgram {
    label: String,
    sampler_names: Vec<String>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: Vec<(PixelFormat, wgpu::RenderPipeline)>,
}

impl WgpuProgram {
    pub fn sampler_names(&self) -> &[String] {
        &self.sampler_names
    }

    fn pipeline(&self, format: PixelFormat) -> Option<&wgpu::RenderPipeline> {
        self.pipelines
            .iter()
            .find(|(candidate, _)| *candidate == format)
            .map(|(_, pipeline)| pipeline)
    }
}

pub struct WgpuDriver {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    /// 32-bit float textures are not filterable without an optional feature.
    filterable: bool,
    placeholder: WgpuTexture,
    pending: Option<wgpu::SubmissionIndex>,
}

impl WgpuDriver {
    pub async fn new(float_format: FloatFormat) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("isf-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        Self::from_device(device, queue, float_format)
    }

    pub fn new_blocking(float_format: FloatFormat) -> Result<Self> {
        pollster::block_on(Self::new(float_format))
    }

    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        float_format: FloatFormat,
    ) -> Result<Self> {
        let filterable = float_format != FloatFormat::Rgba32;
        let filter = if filterable {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("isf-sampler"),
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        let placeholder = create_texture(
            &device,
            "isf-placeholder",
            Size::new(1, 1),
            PixelFormat::Rgba8Unorm,
        );
        queue.write_texture(
            copy_target(&placeholder.texture),
            &[0_u8; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            extent(Size::new(1, 1)),
        );
        Ok(Self {
            device,
            queue,
            sampler,
            filterable,
            placeholder,
            pending: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Compiles a WGSL fragment stage (entry point `fs_main`) together with
    /// [`FULLSCREEN_VERTEX_WGSL`]. `sampler_names` fixes the texture binding order.
    pub fn create_program(
        &self,
        label: &str,
        fragment_wgsl: &str,
        sampler_names: &[&str],
    ) -> Result<WgpuProgram> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let source = format!("{FULLSCREEN_VERTEX_WGSL}\n{fragment_wgsl}");
        let shader_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let mut layout_entries = vec![
            // @binding(0) uniform table
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // @binding(1) sampler
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(if self.filterable {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                count: None,
            },
        ];
        for index in 0..sampler_names.len() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: TEXTURE_BINDING_START + index as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float {
                        filterable: self.filterable,
                    },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label}-bgl")),
                    entries: &layout_entries,
                });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{label}-layout")),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipelines = PIPELINE_FORMATS
            .iter()
            .map(|format| {
                let pipeline =
                    self.device
                        .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                            label: Some(&format!("{label}-{format:?}")),
                            layout: Some(&pipeline_layout),
                            vertex: wgpu::VertexState {
                                module: &shader_module,
                                entry_point: "vs_main",
                                compilation_options: wgpu::PipelineCompilationOptions::default(),
                                buffers: &[],
                            },
                            fragment: Some(wgpu::FragmentState {
                                module: &shader_module,
                                entry_point: "fs_main",
                                compilation_options: wgpu::PipelineCompilationOptions::default(),
                                targets: &[Some(wgpu::ColorTargetState {
                                    format: texture_format(*format),
                                    blend: None,
                                    write_mask: wgpu::ColorWrites::ALL,
                                })],
                            }),
                            primitive: wgpu::PrimitiveState {
                                topology: wgpu::PrimitiveTopology::TriangleList,
                                ..Default::default()
                            },
                            depth_stencil: None,
                            multisample: wgpu::MultisampleState::default(),
                            multiview: None,
                        });
                (*format, pipeline)
            })
            .collect();

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(anyhow!("failed compiling program '{label}': {error}"));
        }

        Ok(WgpuProgram {
            label: label.to_owned(),
            sampler_names: sampler_names.iter().map(|name| (*name).to_owned()).collect(),
            bind_group_layout,
            pipelines,
        })
    }

    /// Copies an 8-bit texture back to the CPU as tightly packed RGBA rows.
    pub fn read_rgba8(&self, texture: &WgpuTexture) -> Result<Vec<u8>> {
        if texture.format != PixelFormat::Rgba8Unorm {
            return Err(anyhow!(
                "readback supports Rgba8Unorm textures, got {:?}",
                texture.format
            ));
        }
        let Size { width, height } = texture.size;
        let unpadded_bytes_per_row = width * 4;
        let alignment = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(alignment) * alignment;

        let readback_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("isf-readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("isf-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            copy_target(&texture.texture),
            wgpu::ImageCopyBuffer {
                buffer: &readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(texture.size),
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let mapped = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for chunk in mapped
            .chunks(padded_bytes_per_row as usize)
            .take(height as usize)
        {
            pixels.extend_from_slice(&chunk[..unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        readback_buffer.unmap();
        Ok(pixels)
    }
}

impl RenderDriver for WgpuDriver {
    type Program = WgpuProgram;
    type Texture = WgpuTexture;
    type Image = WgpuTexture;

    fn allocate(&mut self, request: &BufferRequest) -> Result<WgpuTexture, DriverError> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if request.size.width > limit || request.size.height > limit {
            return Err(DriverError::Unsupported(format!(
                "buffer '{}' is {} but the device allows {limit}x{limit}",
                request.label(),
                request.size
            )));
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = create_texture(
            &self.device,
            &format!("isf-buffer-{}", request.label()),
            request.size,
            request.format,
        );
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(_) => Err(DriverError::OutOfMemory {
                bytes: request.byte_len(),
            }),
            None => Ok(texture),
        }
    }

    fn upload_image(
        &mut self,
        name: &str,
        image: &image::RgbaImage,
    ) -> Result<WgpuTexture, DriverError> {
        let (width, height) = image.dimensions();
        let size = Size::new(width, height);
        let texture = create_texture(
            &self.device,
            &format!("isf-image-{name}"),
            size,
            PixelFormat::Rgba8Unorm,
        );
        self.queue.write_texture(
            copy_target(&texture.texture),
            image.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            extent(size),
        );
        Ok(texture)
    }

    fn execute(&mut self, draw: &PassDraw<'_, Self>) -> Result<(), DriverError> {
        let program = draw.program;
        let pipeline = program.pipeline(draw.target.format).ok_or_else(|| {
            DriverError::Unsupported(format!("no pipeline for {:?}", draw.target.format))
        })?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{}-uniforms", program.label)),
                contents: &draw.uniforms.to_std140(),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
        ];
        for (index, name) in program.sampler_names.iter().enumerate() {
            let view = draw
                .samplers
                .iter()
                .find(|sampler| &sampler.name == name)
                .map_or(&self.placeholder.view, |sampler| match &sampler.source {
                    SamplerSource::Buffer(texture) => &texture.view,
                    SamplerSource::Image(image) => &image.view,
                });
            entries.push(wgpu::BindGroupEntry {
                binding: TEXTURE_BINDING_START + index as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}-bg-{}", program.label, draw.pass_index)),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&format!("{}-pass-{}", program.label, draw.pass_index)),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&format!("{}-pass-{}", program.label, draw.pass_index)),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &draw.target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_viewport(
                0.0,
                0.0,
                draw.viewport.width as f32,
                draw.viewport.height as f32,
                0.0,
                1.0,
            );
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.pending = Some(self.queue.submit(Some(encoder.finish())));

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(DriverError::Device(error.to_string())),
            None => Ok(()),
        }
    }

    fn fence(&mut self) -> Result<(), DriverError> {
        if let Some(index) = self.pending.take() {
            self.device
                .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        Ok(())
    }
}

fn create_texture(
    device: &wgpu::Device,
    label: &str,
    size: Size,
    format: PixelFormat,
) -> WgpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(format),
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    WgpuTexture {
        texture,
        view,
        size,
        format,
    }
}

fn copy_target(texture: &wgpu::Texture) -> wgpu::ImageCopyTexture<'_> {
    wgpu::ImageCopyTexture {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d::ZERO,
        aspect: wgpu::TextureAspect::All,
    }
}

fn extent(size: Size) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}
