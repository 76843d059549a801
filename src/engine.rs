//! Pass scheduler and host-facing API.
//!
//! One [`Engine::render_frame`] call walks the pass list in declaration order. Each pass
//! evaluates its size, resolves its target, resolves what it samples, binds uniforms, then hands
//! a [`PassDraw`] to the driver and waits on [`RenderDriver::fence`] before the next pass starts.
//! The first failure aborts the frame and rolls back the buffer writes it made; event pulses and
//! `FRAMEINDEX` only advance once every pass succeeded.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDateTime};
use image::RgbaImage;
use serde::Serialize;
use tracing::{debug, warn};

use crate::buffers::{BufferHandle, BufferInfo, BufferKey, BufferManager, Resolution};
use crate::config::EngineConfig;
use crate::driver::{PassDraw, PixelFormat, RenderDriver, SamplerBinding, SamplerSource};
use crate::error::{DriverError, EngineError, Result};
use crate::expression::evaluate_pass_size;
use crate::imported;
use crate::inputs::{
    FrameInputs, ImageSource, InputState, InputValue, InputValues, ResolvedValue, SizingScope,
};
use crate::schema::{Descriptor, PassSpec, Size};
use crate::uniforms::{self, FrameContext, SamplerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running { pass_index: usize },
    /// Terminal. Buffers and images have been released.
    Shutdown,
}

/// Host input for one output frame.
#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub render_size: Size,
    /// Seconds on the host clock, presented as `TIME`.
    pub time: f64,
    /// Wall clock for `DATE`; the local time when `None`.
    pub date: Option<NaiveDateTime>,
    pub inputs: InputValues,
}

impl FrameRequest {
    pub fn new(render_size: Size, time: f64) -> Self {
        Self {
            render_size,
            time,
            date: None,
            inputs: InputValues::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFrame {
    /// `FRAMEINDEX` the frame was rendered with.
    pub frame_index: u64,
    pub output: BufferHandle,
    pub size: Size,
}

/// What one pass would do, computed without touching the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassPlan {
    pub pass_index: usize,
    pub target: Option<String>,
    pub size: Size,
    pub format: PixelFormat,
    pub persistent: bool,
    pub output: bool,
    /// Sampler names bound for the pass, in binding order.
    pub reads: Vec<String>,
}

struct UploadedImage<I> {
    image: I,
    size: Size,
}

enum SamplerRef {
    Buffer(String),
    Imported(String),
    External(String),
}

/// A sampler the pass wants, before its storage is looked up.
struct WantedSampler {
    name: String,
    source: SamplerRef,
    /// Bound through an image input rather than implicit visibility.
    explicit: bool,
}

enum BoundSource {
    Buffer(BufferHandle),
    Imported(String),
    External(String),
}

struct BoundSampler {
    name: String,
    source: BoundSource,
}

pub struct Engine<D: RenderDriver> {
    driver: D,
    program: D::Program,
    descriptor: Descriptor,
    config: EngineConfig,
    buffers: BufferManager<D::Texture>,
    inputs: InputState,
    imported: BTreeMap<String, UploadedImage<D::Image>>,
    external: BTreeMap<String, UploadedImage<D::Image>>,
    frame_index: u64,
    last_time: Option<f64>,
    state: SchedulerState,
}

impl<D: RenderDriver> Engine<D> {
    pub fn new(
        driver: D,
        descriptor: Descriptor,
        program: D::Program,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            driver,
            program,
            descriptor,
            config,
            buffers: BufferManager::new(),
            inputs: InputState::default(),
            imported: BTreeMap::new(),
            external: BTreeMap::new(),
            frame_index: 0,
            last_time: None,
            state: SchedulerState::Idle,
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// `FRAMEINDEX` of the next frame to render.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn buffer_info(&self) -> Vec<BufferInfo> {
        self.buffers.info()
    }

    pub fn texture(&self, handle: &BufferHandle) -> Option<&D::Texture> {
        self.buffers.texture(handle)
    }

    /// Makes a host image available to `ImageSource::External(name)`. Replaces any image
    /// registered under the same name.
    pub fn register_image(&mut self, name: &str, image: &RgbaImage) -> Result<()> {
        self.ensure_running()?;
        if name.is_empty() {
            return Err(EngineError::invalid_input(name, "image name is empty"));
        }
        let uploaded = self
            .driver
            .upload_image(name, image)
            .map_err(|source| EngineError::UploadFailure {
                name: name.to_owned(),
                source,
            })?;
        let (width, height) = image.dimensions();
        self.external.insert(
            name.to_owned(),
            UploadedImage {
                image: uploaded,
                size: Size::new(width, height),
            },
        );
        Ok(())
    }

    pub fn unregister_image(&mut self, name: &str) -> bool {
        self.external.remove(name).is_some()
    }

    /// Decodes and uploads every `IMPORTED` image of the descriptor.
    pub fn load_imported_images(&mut self) -> Result<()> {
        self.ensure_running()?;
        for decoded in imported::decode_all(&self.descriptor.imported)? {
            let image = self
                .driver
                .upload_image(&decoded.name, &decoded.pixels)
                .map_err(|error| EngineError::ImportedImage {
                    name: decoded.name.clone(),
                    path: self
                        .descriptor
                        .imported_image(&decoded.name)
                        .map(|image| image.path.clone())
                        .unwrap_or_default(),
                    reason: format!("upload failed: {error}"),
                })?;
            self.imported.insert(
                decoded.name,
                UploadedImage {
                    image,
                    size: decoded.size,
                },
            );
        }
        debug!(count = self.imported.len(), "loaded imported images");
        Ok(())
    }

    /// Releases every buffer and image. Later frame requests fail with `Shutdown`.
    pub fn shutdown(&mut self) {
        self.buffers = BufferManager::new();
        self.imported.clear();
        self.external.clear();
        self.state = SchedulerState::Shutdown;
        debug!(frames = self.frame_index, "engine shut down");
    }

    pub fn render_frame(&mut self, request: &FrameRequest) -> Result<RenderedFrame> {
        self.ensure_running()?;
        let frame_index = self.frame_index;
        let inputs = self
            .inputs
            .resolve(&self.descriptor, &request.inputs, frame_index)?;
        let context = FrameContext {
            frame_index,
            time: request.time,
            time_delta: self.last_time.map_or(0.0, |last| request.time - last),
            date: request.date.unwrap_or_else(|| Local::now().naive_local()),
        };
        let output_index = self.descriptor.output_pass_index();
        debug!(
            frame_index,
            render_size = %request.render_size,
            passes = self.descriptor.passes.len(),
            "rendering frame"
        );

        let mut output = None;
        for pass_index in 0..self.descriptor.passes.len() {
            self.state = SchedulerState::Running { pass_index };
            match self.run_pass(pass_index, &context, &inputs, request.render_size) {
                Ok((handle, size)) => {
                    if pass_index == output_index {
                        output = Some((handle, size));
                    }
                }
                Err(error) => {
                    self.state = SchedulerState::Idle;
                    self.buffers.abort_frame();
                    warn!(frame_index, pass_index, %error, "frame aborted");
                    return Err(error);
                }
            }
        }
        self.state = SchedulerState::Idle;

        let Some((output, size)) = output else {
            self.buffers.abort_frame();
            return Err(EngineError::malformed("descriptor has no passes"));
        };
        self.buffers.finish_frame();
        self.inputs.commit(&inputs);
        self.last_time = Some(request.time);
        self.frame_index += 1;
        Ok(RenderedFrame {
            frame_index,
            output,
            size,
        })
    }

    /// Evaluates sizes, formats and sampler bindings of every pass for `render_size` without
    /// allocating or drawing. Reports the same usage errors a frame would.
    pub fn plan(&self, render_size: Size, values: &InputValues) -> Result<Vec<PassPlan>> {
        let inputs = self
            .inputs
            .resolve(&self.descriptor, values, self.frame_index)?;
        let scope = SizingScope {
            render_size,
            inputs: &inputs,
        };
        let output_index = self.descriptor.output_pass_index();
        let mut written: Vec<&str> = Vec::new();
        let mut plans = Vec::with_capacity(self.descriptor.passes.len());

        for (pass_index, pass) in self.descriptor.passes.iter().enumerate() {
            let size = evaluate_pass_size(pass_index, pass, &scope, self.config.max_dimension)?;
            let mut reads = Vec::new();
            for wanted in self.wanted_samplers(pass_index, pass, &inputs)? {
                let readable = match &wanted.source {
                    SamplerRef::Buffer(buffer) => {
                        written.contains(&buffer.as_str()) || self.is_persistent_target(buffer)
                    }
                    SamplerRef::Imported(_) | SamplerRef::External(_) => true,
                };
                match wanted.source {
                    _ if readable => reads.push(wanted.name),
                    SamplerRef::Buffer(buffer) if wanted.explicit => {
                        return Err(EngineError::UnwrittenBuffer { pass_index, buffer });
                    }
                    _ => {}
                }
            }
            if let Some(target) = pass.target.as_deref() {
                written.push(target);
            }
            plans.push(PassPlan {
                pass_index,
                target: pass.target.clone(),
                size,
                format: PixelFormat::for_pass(pass.float, self.config.float_format),
                persistent: pass.persistent,
                output: pass_index == output_index,
                reads,
            });
        }
        Ok(plans)
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            SchedulerState::Shutdown => Err(EngineError::Shutdown),
            _ => Ok(()),
        }
    }

    fn is_persistent_target(&self, name: &str) -> bool {
        self.descriptor
            .target_pass(name)
            .is_some_and(|(_, owner)| owner.persistent)
    }

    fn run_pass(
        &mut self,
        pass_index: usize,
        context: &FrameContext,
        inputs: &FrameInputs,
        render_size: Size,
    ) -> Result<(BufferHandle, Size)> {
        let pass = &self.descriptor.passes[pass_index];
        let scope = SizingScope {
            render_size,
            inputs,
        };
        let size = evaluate_pass_size(pass_index, pass, &scope, self.config.max_dimension)?;
        let format = PixelFormat::for_pass(pass.float, self.config.float_format);
        let key = BufferKey::for_target(pass.target.as_deref());

        let driver = &mut self.driver;
        let (target, resolution) = self
            .buffers
            .resolve(key.clone(), size, format, pass.persistent, |request| {
                driver.allocate(request)
            })
            .map_err(|source| allocation_failure(pass_index, &key, size, source))?;
        self.buffers
            .prepare_write(&target, |request| driver.allocate(request))
            .map_err(|source| allocation_failure(pass_index, &key, size, source))?;
        if resolution != Resolution::Reused {
            debug!(pass_index, buffer = %key, %size, ?resolution, "resolved pass target");
        }

        let wanted = self.wanted_samplers(pass_index, pass, inputs)?;
        let bound = self.bind_samplers(pass_index, wanted, &scope)?;

        let mut samplers: Vec<SamplerBinding<'_, D>> = Vec::with_capacity(bound.len());
        let mut infos = Vec::with_capacity(bound.len());
        for sampler in &bound {
            let (source, sampler_size) = match &sampler.source {
                BoundSource::Buffer(handle) => {
                    let texture = self.buffers.read(handle, context.frame_index, pass_index)?;
                    let buffer_size = self.buffers.size(handle.key()).unwrap_or_default();
                    (SamplerSource::Buffer(texture), buffer_size)
                }
                BoundSource::Imported(name) => {
                    let uploaded = self.imported.get(name).ok_or_else(|| {
                        EngineError::unknown_reference(name, "loaded IMPORTED images")
                    })?;
                    (SamplerSource::Image(&uploaded.image), uploaded.size)
                }
                BoundSource::External(name) => {
                    let uploaded = self
                        .external
                        .get(name)
                        .ok_or_else(|| EngineError::unknown_reference(name, "registered images"))?;
                    (SamplerSource::Image(&uploaded.image), uploaded.size)
                }
            };
            infos.push(SamplerInfo {
                name: sampler.name.clone(),
                size: sampler_size,
                flipped: false,
            });
            samplers.push(SamplerBinding {
                name: sampler.name.clone(),
                size: sampler_size,
                source,
            });
        }

        let uniforms = uniforms::bind(pass_index, context, inputs, size, &infos);
        let draw = PassDraw {
            pass_index,
            program: &self.program,
            uniforms: &uniforms,
            samplers: &samplers,
            target: self.buffers.write(&target)?,
            viewport: size,
        };
        debug!(pass_index, target = %key, samplers = samplers.len(), "executing pass");
        let outcome = self
            .driver
            .execute(&draw)
            .and_then(|()| self.driver.fence());

        match outcome {
            Ok(()) => {
                self.buffers.commit_write(&target, context.frame_index);
                Ok((target, size))
            }
            Err(source) => {
                self.buffers.discard_write(&target);
                Err(EngineError::PassExecutionFailure { pass_index, source })
            }
        }
    }

    /// Samplers of one pass: image inputs bound by the host first, in declaration order, then
    /// every `IMPORTED` image, then every named buffer the pass does not write. A persistent
    /// buffer stays visible to its own pass, which samples the previous frame's content.
    fn wanted_samplers(
        &self,
        pass_index: usize,
        pass: &PassSpec,
        inputs: &FrameInputs,
    ) -> Result<Vec<WantedSampler>> {
        let mut wanted = Vec::new();
        for input in &inputs.inputs {
            let ResolvedValue::Sampler(Some(source)) = &input.value else {
                continue;
            };
            let source = match source {
                ImageSource::Buffer(buffer) => {
                    let Some((_, owner)) = self.descriptor.target_pass(buffer) else {
                        return Err(EngineError::unknown_reference(
                            buffer,
                            format!("image input '{}'", input.name),
                        ));
                    };
                    if pass.target.as_deref() == Some(buffer.as_str()) && !owner.persistent {
                        return Err(EngineError::UnwrittenBuffer {
                            pass_index,
                            buffer: buffer.clone(),
                        });
                    }
                    SamplerRef::Buffer(buffer.clone())
                }
                ImageSource::Imported(name) => {
                    if self.descriptor.imported_image(name).is_none() {
                        return Err(EngineError::unknown_reference(
                            name,
                            format!("IMPORTED images (image input '{}')", input.name),
                        ));
                    }
                    SamplerRef::Imported(name.clone())
                }
                ImageSource::External(name) => SamplerRef::External(name.clone()),
            };
            wanted.push(WantedSampler {
                name: input.name.clone(),
                source,
                explicit: true,
            });
        }

        for image in &self.descriptor.imported {
            wanted.push(WantedSampler {
                name: image.name.clone(),
                source: SamplerRef::Imported(image.name.clone()),
                explicit: false,
            });
        }

        for target in self.descriptor.named_targets() {
            if pass.target.as_deref() == Some(target) && !pass.persistent {
                continue;
            }
            wanted.push(WantedSampler {
                name: target.to_owned(),
                source: SamplerRef::Buffer(target.to_owned()),
                explicit: false,
            });
        }
        Ok(wanted)
    }

    /// Resolves wanted samplers to storage. Implicit samplers without defined content are
    /// dropped; explicit ones are errors.
    fn bind_samplers(
        &mut self,
        pass_index: usize,
        wanted: Vec<WantedSampler>,
        scope: &SizingScope<'_>,
    ) -> Result<Vec<BoundSampler>> {
        let frame_index = scope.inputs.frame_index;
        let mut bound = Vec::with_capacity(wanted.len());
        for sampler in wanted {
            let source = match sampler.source {
                SamplerRef::Buffer(buffer) => {
                    let key = BufferKey::Named(buffer.clone());
                    let handle = match self.buffers.lookup(&key) {
                        Some(handle) => Some(handle),
                        None if self.is_persistent_target(&buffer) => {
                            Some(self.allocate_ahead(pass_index, &buffer, scope)?)
                        }
                        None => None,
                    };
                    match handle {
                        Some(handle) if self.buffers.is_readable(&key, frame_index) => {
                            BoundSource::Buffer(handle)
                        }
                        _ if sampler.explicit => {
                            return Err(EngineError::UnwrittenBuffer { pass_index, buffer });
                        }
                        _ => continue,
                    }
                }
                SamplerRef::Imported(name) => {
                    if !self.imported.contains_key(&name) {
                        if sampler.explicit {
                            return Err(EngineError::unknown_reference(
                                name,
                                "loaded IMPORTED images",
                            ));
                        }
                        continue;
                    }
                    BoundSource::Imported(name)
                }
                SamplerRef::External(name) => {
                    if !self.external.contains_key(&name) {
                        return Err(EngineError::unknown_reference(name, "registered images"));
                    }
                    BoundSource::External(name)
                }
            };
            bound.push(BoundSampler {
                name: sampler.name,
                source,
            });
        }
        Ok(bound)
    }

    /// Allocates a persistent buffer sampled before its owning pass ran, at the size the owning
    /// pass evaluates to this frame.
    fn allocate_ahead(
        &mut self,
        pass_index: usize,
        buffer: &str,
        scope: &SizingScope<'_>,
    ) -> Result<BufferHandle> {
        let Some((owner_index, owner)) = self.descriptor.target_pass(buffer) else {
            return Err(EngineError::unknown_reference(buffer, "pass targets"));
        };
        let size = evaluate_pass_size(owner_index, owner, scope, self.config.max_dimension)?;
        let format = PixelFormat::for_pass(owner.float, self.config.float_format);
        let key = BufferKey::Named(buffer.to_owned());
        let driver = &mut self.driver;
        let (handle, _) = self
            .buffers
            .resolve(key.clone(), size, format, true, |request| {
                driver.allocate(request)
            })
            .map_err(|source| allocation_failure(pass_index, &key, size, source))?;
        debug!(pass_index, buffer, %size, "allocated persistent buffer ahead of its pass");
        Ok(handle)
    }
}

fn allocation_failure(
    pass_index: usize,
    key: &BufferKey,
    size: Size,
    source: DriverError,
) -> EngineError {
    warn!(pass_index, buffer = %key, %size, %source, "buffer allocation failed");
    EngineError::AllocationFailure {
        pass_index,
        buffer: key.to_string(),
        width: size.width,
        height: size.height,
        source,
    }
}
