//! Uniform binding.
//!
//! Every pass sees the same closed set of built-ins (`RENDERSIZE`, `TIME`, `TIMEDELTA`, `DATE`,
//! `PASSINDEX`, `FRAMEINDEX`), followed by one entry per non-sampler input in declaration order,
//! followed by the `_<name>_imgSize` / `_<name>_imgRect` / `_<name>_flip` helpers of each bound
//! sampler. The table is ordered so that drivers can pack it into a single uniform block.

use std::borrow::Cow;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::inputs::{FrameInputs, ResolvedValue};
use crate::schema::Size;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinUniform {
    /// Target size of the executing pass.
    RenderSize,
    Time,
    TimeDelta,
    Date,
    PassIndex,
    FrameIndex,
}

impl BuiltinUniform {
    pub const ALL: [Self; 6] = [
        Self::RenderSize,
        Self::Time,
        Self::TimeDelta,
        Self::Date,
        Self::PassIndex,
        Self::FrameIndex,
    ];

    pub fn glsl_name(self) -> &'static str {
        match self {
            Self::RenderSize => "RENDERSIZE",
            Self::Time => "TIME",
            Self::TimeDelta => "TIMEDELTA",
            Self::Date => "DATE",
            Self::PassIndex => "PASSINDEX",
            Self::FrameIndex => "FRAMEINDEX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformName {
    Builtin(BuiltinUniform),
    Input(String),
    ImageSize(String),
    ImageRect(String),
    ImageFlip(String),
}

impl UniformName {
    pub fn glsl_name(&self) -> Cow<'_, str> {
        match self {
            Self::Builtin(builtin) => Cow::Borrowed(builtin.glsl_name()),
            Self::Input(name) => Cow::Borrowed(name.as_str()),
            Self::ImageSize(name) => Cow::Owned(format!("_{name}_imgSize")),
            Self::ImageRect(name) => Cow::Owned(format!("_{name}_imgRect")),
            Self::ImageFlip(name) => Cow::Owned(format!("_{name}_flip")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
}

impl UniformValue {
    /// std140 (size, alignment) in bytes.
    fn std140_layout(self) -> (usize, usize) {
        match self {
            Self::Bool(_) | Self::Int(_) | Self::Float(_) => (4, 4),
            Self::Vec2(_) => (8, 8),
            Self::Vec4(_) => (16, 16),
        }
    }

    fn write_std140(self, out: &mut [u8]) {
        match self {
            Self::Bool(flag) => out.copy_from_slice(bytemuck::bytes_of(&u32::from(flag))),
            Self::Int(value) => out.copy_from_slice(bytemuck::bytes_of(&value)),
            Self::Float(value) => out.copy_from_slice(bytemuck::bytes_of(&value)),
            Self::Vec2(value) => out.copy_from_slice(bytemuck::cast_slice(&value)),
            Self::Vec4(value) => out.copy_from_slice(bytemuck::cast_slice(&value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformBinding {
    pub name: UniformName,
    pub value: UniformValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformSet {
    bindings: Vec<UniformBinding>,
}

impl UniformSet {
    pub fn iter(&self) -> impl Iterator<Item = &UniformBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, glsl_name: &str) -> Option<UniformValue> {
        self.bindings
            .iter()
            .find(|binding| binding.name.glsl_name() == glsl_name)
            .map(|binding| binding.value)
    }

    pub fn builtin(&self, builtin: BuiltinUniform) -> Option<UniformValue> {
        self.bindings
            .iter()
            .find(|binding| binding.name == UniformName::Builtin(builtin))
            .map(|binding| binding.value)
    }

    fn push(&mut self, name: UniformName, value: UniformValue) {
        self.bindings.push(UniformBinding { name, value });
    }

    /// Byte offset of every binding inside a std140 block, in table order.
    pub fn std140_offsets(&self) -> Vec<(String, usize)> {
        let mut cursor = 0;
        self.bindings
            .iter()
            .map(|binding| {
                let (size, align) = binding.value.std140_layout();
                let offset = align_up(cursor, align);
                cursor = offset + size;
                (binding.name.glsl_name().into_owned(), offset)
            })
            .collect()
    }

    /// Packs the table as one std140 uniform block, padded to 16 bytes.
    pub fn to_std140(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for binding in &self.bindings {
            let (size, align) = binding.value.std140_layout();
            let offset = align_up(bytes.len(), align);
            bytes.resize(offset + size, 0);
            binding.value.write_std140(&mut bytes[offset..offset + size]);
        }
        let padded = align_up(bytes.len().max(16), 16);
        bytes.resize(padded, 0);
        bytes
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// Per-frame counters and clocks supplied by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub frame_index: u64,
    /// Seconds on the host clock.
    pub time: f64,
    /// Seconds since the previous completed frame; zero on the first frame.
    pub time_delta: f64,
    pub date: NaiveDateTime,
}

impl FrameContext {
    /// `DATE` as ISF defines it: year, month, day, seconds since midnight.
    pub fn date_vec4(&self) -> [f32; 4] {
        let seconds = f64::from(self.date.num_seconds_from_midnight())
            + f64::from(self.date.nanosecond()) / 1e9;
        [
            self.date.year() as f32,
            self.date.month() as f32,
            self.date.day() as f32,
            seconds as f32,
        ]
    }
}

/// Size and orientation of a texture bound to a named sampler, used for the helper uniforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerInfo {
    pub name: String,
    pub size: Size,
    pub flipped: bool,
}

/// Builds the uniform table for one pass.
pub fn bind(
    pass_index: usize,
    context: &FrameContext,
    inputs: &FrameInputs,
    target_size: Size,
    samplers: &[SamplerInfo],
) -> UniformSet {
    let mut set = UniformSet::default();
    for builtin in BuiltinUniform::ALL {
        let value = match builtin {
            BuiltinUniform::RenderSize => UniformValue::Vec2(target_size.as_vec2()),
            BuiltinUniform::Time => UniformValue::Float(context.time as f32),
            BuiltinUniform::TimeDelta => UniformValue::Float(context.time_delta as f32),
            BuiltinUniform::Date => UniformValue::Vec4(context.date_vec4()),
            BuiltinUniform::PassIndex => UniformValue::Int(saturating_i32(pass_index as u64)),
            BuiltinUniform::FrameIndex => UniformValue::Int(saturating_i32(context.frame_index)),
        };
        set.push(UniformName::Builtin(builtin), value);
    }

    for input in &inputs.inputs {
        let value = match &input.value {
            ResolvedValue::Event { fired_at } => {
                UniformValue::Bool(*fired_at == Some(context.frame_index))
            }
            ResolvedValue::Bool(flag) => UniformValue::Bool(*flag),
            ResolvedValue::Long { index, .. } => UniformValue::Int(*index),
            ResolvedValue::Float(value) => UniformValue::Float(*value),
            ResolvedValue::Point2D(point) => UniformValue::Vec2(*point),
            ResolvedValue::Color(color) => UniformValue::Vec4(*color),
            ResolvedValue::Sampler(_) => continue,
        };
        set.push(UniformName::Input(input.name.clone()), value);
    }

    for sampler in samplers {
        let [width, height] = sampler.size.as_vec2();
        set.push(
            UniformName::ImageSize(sampler.name.clone()),
            UniformValue::Vec2([width, height]),
        );
        set.push(
            UniformName::ImageRect(sampler.name.clone()),
            UniformValue::Vec4([0.0, 0.0, width, height]),
        );
        set.push(
            UniformName::ImageFlip(sampler.name.clone()),
            UniformValue::Bool(sampler.flipped),
        );
    }

    tracing::trace!(pass_index, uniforms = set.len(), "bound uniforms");
    set
}

fn saturating_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
