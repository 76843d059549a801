//! The render driver seam.
//!
//! The engine never touches a graphics API directly. It asks a [`RenderDriver`] to allocate
//! buffer storage, to upload images, and to execute one pass at a time.

use serde::Serialize;

use crate::config::FloatFormat;
use crate::error::DriverError;
use crate::schema::Size;
use crate::uniforms::UniformSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit normalized RGBA.
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl PixelFormat {
    pub fn for_pass(float: bool, float_format: FloatFormat) -> Self {
        match (float, float_format) {
            (false, _) => Self::Rgba8Unorm,
            (true, FloatFormat::Rgba16) => Self::Rgba16Float,
            (true, FloatFormat::Rgba32) => Self::Rgba32Float,
        }
    }

    pub fn is_float(self) -> bool {
        !matches!(self, Self::Rgba8Unorm)
    }

    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::Rgba8Unorm => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Storage the engine needs for one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRequest {
    /// Target name, or `None` for the implicit output.
    pub name: Option<String>,
    pub size: Size,
    pub format: PixelFormat,
    pub persistent: bool,
}

impl BufferRequest {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<output>")
    }

    pub fn byte_len(&self) -> u64 {
        self.size.pixel_count() * self.format.bytes_per_pixel()
    }
}

/// A texture bound to a named sampler for one pass.
pub enum SamplerSource<'a, D: RenderDriver + ?Sized> {
    Buffer(&'a D::Texture),
    Image(&'a D::Image),
}

pub struct SamplerBinding<'a, D: RenderDriver + ?Sized> {
    pub name: String,
    pub size: Size,
    pub source: SamplerSource<'a, D>,
}

/// Everything a driver needs to execute one pass.
///
/// `target` never appears among `samplers`.
pub struct PassDraw<'a, D: RenderDriver + ?Sized> {
    pub pass_index: usize,
    pub program: &'a D::Program,
    pub uniforms: &'a UniformSet,
    pub samplers: &'a [SamplerBinding<'a, D>],
    pub target: &'a D::Texture,
    pub viewport: Size,
}

pub trait RenderDriver {
    /// Compiled shader program supplied by the host.
    type Program;
    /// Storage backing one engine buffer.
    type Texture;
    /// An imported or host-registered image.
    type Image;

    fn allocate(&mut self, request: &BufferRequest) -> Result<Self::Texture, DriverError>;

    fn upload_image(
        &mut self,
        name: &str,
        image: &image::RgbaImage,
    ) -> Result<Self::Image, DriverError>;

    /// Executes one pass. Returning `Ok` means the write is recorded; ordering against the next
    /// pass is established by [`RenderDriver::fence`].
    fn execute(&mut self, draw: &PassDraw<'_, Self>) -> Result<(), DriverError>;

    /// Orders the previous pass's write before anything the next pass does.
    fn fence(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}
