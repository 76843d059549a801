//! CPU reference driver.
//!
//! Programs are Rust closures evaluated once per target pixel. Nothing here is fast; it exists
//! so the scheduler can be exercised, and rendered output inspected, without a GPU.

use std::cell::{Ref, RefCell};

use image::{Rgba, Rgba32FImage, RgbaImage};

use crate::driver::{BufferRequest, PassDraw, PixelFormat, RenderDriver, SamplerSource};
use crate::error::DriverError;
use crate::schema::Size;
use crate::uniforms::{UniformSet, UniformValue};

type Shader = dyn Fn(&Fragment<'_>) -> [f32; 4];

pub struct SoftwareProgram {
    shader: Box<Shader>,
}

impl SoftwareProgram {
    pub fn new(shader: impl Fn(&Fragment<'_>) -> [f32; 4] + 'static) -> Self {
        Self {
            shader: Box::new(shader),
        }
    }
}

enum Pixels {
    Unorm8(RgbaImage),
    Float(Rgba32FImage),
}

impl Pixels {
    fn get(&self, x: u32, y: u32) -> [f32; 4] {
        match self {
            Self::Unorm8(image) => image.get_pixel(x, y).0.map(|c| f32::from(c) / 255.0),
            Self::Float(image) => image.get_pixel(x, y).0,
        }
    }

    fn put(&mut self, x: u32, y: u32, color: [f32; 4]) {
        match self {
            Self::Unorm8(image) => {
                let pixel = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                image.put_pixel(x, y, Rgba(pixel))
            }
            Self::Float(image) => image.put_pixel(x, y, Rgba(color)),
        }
    }
}

pub struct SoftwareTexture {
    label: String,
    size: Size,
    format: PixelFormat,
    pixels: RefCell<Pixels>,
}

impl SoftwareTexture {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

pub struct SoftwareImage {
    pixels: RgbaImage,
}

enum SampleSource<'a> {
    Texture(Ref<'a, Pixels>),
    Image(&'a RgbaImage),
}

struct BoundTexture<'a> {
    name: &'a str,
    size: Size,
    source: SampleSource<'a>,
}

/// One invocation of a fragment program.
pub struct Fragment<'a> {
    /// Pixel column and row, row 0 at the top.
    pub coord: [u32; 2],
    /// Pixel center in `[0, 1]`.
    pub norm: [f32; 2],
    pub uniforms: &'a UniformSet,
    textures: &'a [BoundTexture<'a>],
}

impl Fragment<'_> {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name)
    }

    /// Scalar view of a uniform; zero when absent or not scalar.
    pub fn scalar(&self, name: &str) -> f32 {
        match self.uniforms.get(name) {
            Some(UniformValue::Float(value)) => value,
            Some(UniformValue::Int(value)) => value as f32,
            Some(UniformValue::Bool(flag)) => f32::from(u8::from(flag)),
            _ => 0.0,
        }
    }

    pub fn has_sampler(&self, name: &str) -> bool {
        self.textures.iter().any(|texture| texture.name == name)
    }

    /// Nearest-neighbour sample at normalized `uv`. Unbound samplers read transparent black.
    pub fn sample(&self, name: &str, uv: [f32; 2]) -> [f32; 4] {
        let Some(texture) = self.textures.iter().find(|texture| texture.name == name) else {
            return [0.0; 4];
        };
        let x = texel(uv[0], texture.size.width);
        let y = texel(uv[1], texture.size.height);
        match &texture.source {
            SampleSource::Texture(pixels) => pixels.get(x, y),
            SampleSource::Image(image) => image.get_pixel(x, y).0.map(|c| f32::from(c) / 255.0),
        }
    }
}

fn texel(coordinate: f32, extent: u32) -> u32 {
    let scaled = (coordinate * extent as f32).floor();
    (scaled.max(0.0) as u32).min(extent.saturating_sub(1))
}

#[derive(Default)]
pub struct SoftwareDriver {
    /// Largest single allocation accepted, in bytes.
    allocation_limit: Option<u64>,
    passes_executed: u64,
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocation_limit(bytes: u64) -> Self {
        Self {
            allocation_limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn passes_executed(&self) -> u64 {
        self.passes_executed
    }

    pub fn pixel(&self, texture: &SoftwareTexture, x: u32, y: u32) -> Option<[f32; 4]> {
        (x < texture.size.width && y < texture.size.height)
            .then(|| texture.pixels.borrow().get(x, y))
    }

    /// Every pixel in row-major order.
    pub fn pixels(&self, texture: &SoftwareTexture) -> Vec<[f32; 4]> {
        let pixels = texture.pixels.borrow();
        let mut out = Vec::with_capacity(texture.size.pixel_count() as usize);
        for y in 0..texture.size.height {
            for x in 0..texture.size.width {
                out.push(pixels.get(x, y));
            }
        }
        out
    }

    pub fn to_rgba8(&self, texture: &SoftwareTexture) -> RgbaImage {
        let pixels = texture.pixels.borrow();
        RgbaImage::from_fn(texture.size.width, texture.size.height, |x, y| {
            Rgba(pixels.get(x, y).map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        })
    }
}

impl RenderDriver for SoftwareDriver {
    type Program = SoftwareProgram;
    type Texture = SoftwareTexture;
    type Image = SoftwareImage;

    fn allocate(&mut self, request: &BufferRequest) -> Result<SoftwareTexture, DriverError> {
        let bytes = request.byte_len();
        if self.allocation_limit.is_some_and(|limit| bytes > limit) {
            return Err(DriverError::OutOfMemory { bytes });
        }
        let Size { width, height } = request.size;
        let pixels = if request.format.is_float() {
            Pixels::Float(Rgba32FImage::new(width, height))
        } else {
            Pixels::Unorm8(RgbaImage::new(width, height))
        };
        Ok(SoftwareTexture {
            label: request.label().to_owned(),
            size: request.size,
            format: request.format,
            pixels: RefCell::new(pixels),
        })
    }

    fn upload_image(
        &mut self,
        _name: &str,
        image: &RgbaImage,
    ) -> Result<SoftwareImage, DriverError> {
        Ok(SoftwareImage {
            pixels: image.clone(),
        })
    }

    fn execute(&mut self, draw: &PassDraw<'_, Self>) -> Result<(), DriverError> {
        let target_size = draw.target.size;
        if draw.viewport != target_size {
            return Err(DriverError::Device(format!(
                "viewport {} does not match target '{}' ({})",
                draw.viewport, draw.target.label, target_size
            )));
        }

        let mut textures = Vec::with_capacity(draw.samplers.len());
        for sampler in draw.samplers {
            let source = match &sampler.source {
                SamplerSource::Buffer(texture) => {
                    SampleSource::Texture(texture.pixels.try_borrow().map_err(|_| {
                        DriverError::Device(format!("texture '{}' is being written", texture.label))
                    })?)
                }
                SamplerSource::Image(image) => SampleSource::Image(&image.pixels),
            };
            textures.push(BoundTexture {
                name: &sampler.name,
                size: sampler.size,
                source,
            });
        }

        let mut target = draw.target.pixels.try_borrow_mut().map_err(|_| {
            DriverError::Device(format!("target '{}' is bound as a sampler", draw.target.label))
        })?;
        let (width, height) = (target_size.width, target_size.height);
        for y in 0..height {
            for x in 0..width {
                let fragment = Fragment {
                    coord: [x, y],
                    norm: [
                        (x as f32 + 0.5) / width as f32,
                        (y as f32 + 0.5) / height as f32,
                    ],
                    uniforms: draw.uniforms,
                    textures: &textures,
                };
                target.put(x, y, (draw.program.shader)(&fragment));
            }
        }
        self.passes_executed += 1;
        Ok(())
    }
}
