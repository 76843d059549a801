#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;

use isf_engine::driver::{BufferRequest, PassDraw, PixelFormat, RenderDriver, SamplerSource};
use isf_engine::error::DriverError;
use isf_engine::schema::{Descriptor, Size};
use isf_engine::uniforms::{UniformSet, UniformValue};
use isf_engine::{parse_isf, Engine, EngineConfig};

/// Render driver that records every call. Each write stamps its target with
/// `p<PASSINDEX>f<FRAMEINDEX>`, so tests can see which write a later read observed.
#[derive(Default)]
pub struct RecordingDriver {
    pub events: Vec<DriverEvent>,
    pub executions: Vec<Execution>,
    pub fail_on_pass: Option<usize>,
    /// Largest single allocation accepted, in bytes.
    pub allocation_limit: Option<u64>,
    /// Error returned by every image upload.
    pub fail_upload: Option<DriverError>,
    next_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    Allocate { label: String, size: Size, format: PixelFormat },
    Upload { name: String },
    Execute { pass_index: usize },
    Fence,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub pass_index: usize,
    pub target: String,
    pub target_id: u64,
    pub viewport: Size,
    /// Sampler name and the stamp it read (`undefined` for never-written storage).
    pub samplers: Vec<(String, String)>,
    pub uniforms: UniformSet,
}

impl Execution {
    pub fn sampled(&self, name: &str) -> Option<&str> {
        self.samplers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, stamp)| stamp.as_str())
    }

    pub fn sampler_names(&self) -> Vec<&str> {
        self.samplers.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn int(&self, name: &str) -> i32 {
        match self.uniforms.get(name) {
            Some(UniformValue::Int(value)) => value,
            other => panic!("uniform {name} is not an int: {other:?}"),
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        match self.uniforms.get(name) {
            Some(UniformValue::Bool(value)) => value,
            other => panic!("uniform {name} is not a bool: {other:?}"),
        }
    }
}

pub struct RecordedTexture {
    pub id: u64,
    pub label: String,
    pub size: Size,
    pub stamp: RefCell<Option<String>>,
}

impl RecordedTexture {
    pub fn stamp(&self) -> Option<String> {
        self.stamp.borrow().clone()
    }
}

pub struct RecordedImage {
    pub name: String,
}

impl RecordingDriver {
    pub fn executed_passes(&self) -> Vec<usize> {
        self.executions.iter().map(|e| e.pass_index).collect()
    }

    pub fn allocations(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, DriverEvent::Allocate { .. }))
            .count()
    }
}

impl RenderDriver for RecordingDriver {
    type Program = ();
    type Texture = RecordedTexture;
    type Image = RecordedImage;

    fn allocate(&mut self, request: &BufferRequest) -> Result<RecordedTexture, DriverError> {
        if self
            .allocation_limit
            .is_some_and(|limit| request.byte_len() > limit)
        {
            return Err(DriverError::OutOfMemory {
                bytes: request.byte_len(),
            });
        }
        self.next_id += 1;
        self.events.push(DriverEvent::Allocate {
            label: request.label().to_owned(),
            size: request.size,
            format: request.format,
        });
        Ok(RecordedTexture {
            id: self.next_id,
            label: request.label().to_owned(),
            size: request.size,
            stamp: RefCell::new(None),
        })
    }

    fn upload_image(
        &mut self,
        name: &str,
        _image: &image::RgbaImage,
    ) -> Result<RecordedImage, DriverError> {
        if let Some(error) = &self.fail_upload {
            return Err(error.clone());
        }
        self.events.push(DriverEvent::Upload {
            name: name.to_owned(),
        });
        Ok(RecordedImage {
            name: name.to_owned(),
        })
    }

    fn execute(&mut self, draw: &PassDraw<'_, Self>) -> Result<(), DriverError> {
        self.events.push(DriverEvent::Execute {
            pass_index: draw.pass_index,
        });
        let samplers = draw
            .samplers
            .iter()
            .map(|sampler| {
                let stamp = match &sampler.source {
                    SamplerSource::Buffer(texture) => {
                        assert_ne!(texture.id, draw.target.id, "target bound as sampler");
                        texture.stamp().unwrap_or_else(|| "undefined".to_owned())
                    }
                    SamplerSource::Image(image) => format!("image:{}", image.name),
                };
                (sampler.name.clone(), stamp)
            })
            .collect();
        let execution = Execution {
            pass_index: draw.pass_index,
            target: draw.target.label.clone(),
            target_id: draw.target.id,
            viewport: draw.viewport,
            samplers,
            uniforms: draw.uniforms.clone(),
        };
        let frame = execution.int("FRAMEINDEX");
        self.executions.push(execution);

        if self.fail_on_pass == Some(draw.pass_index) {
            return Err(DriverError::Device("injected failure".to_owned()));
        }
        *draw.target.stamp.borrow_mut() = Some(format!("p{}f{}", draw.pass_index, frame));
        Ok(())
    }

    fn fence(&mut self) -> Result<(), DriverError> {
        self.events.push(DriverEvent::Fence);
        Ok(())
    }
}

pub fn descriptor(text: &str) -> Descriptor {
    parse_isf(text).expect("descriptor should parse").descriptor
}

pub fn engine(text: &str) -> Engine<RecordingDriver> {
    Engine::new(
        RecordingDriver::default(),
        descriptor(text),
        (),
        EngineConfig::default(),
    )
    .expect("engine should build")
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}
