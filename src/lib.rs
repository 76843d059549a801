//! Execution engine for ISF (Interactive Shader Format) documents.
//!
//! [`manifest::load_isf`] turns a `.fs` file into a validated [`schema::Descriptor`].
//! [`engine::Engine`] then renders frames through any [`driver::RenderDriver`]: the CPU
//! [`software::SoftwareDriver`] or the wgpu [`gpu::WgpuDriver`].

pub mod buffers;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod expression;
pub mod gpu;
pub mod imported;
pub mod inputs;
pub mod manifest;
pub mod schema;
pub mod software;
pub mod uniforms;

pub use config::EngineConfig;
pub use engine::{Engine, FrameRequest, RenderedFrame};
pub use error::{EngineError, Result};
pub use manifest::{load_isf, parse_isf, IsfDocument};
