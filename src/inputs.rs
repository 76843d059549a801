use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::expression::Scope;
use crate::schema::{Descriptor, InputKind, InputSpec, Size};

/// Where an `image`/`audio` input takes its pixels from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A pass target of the same descriptor.
    Buffer(String),
    /// An `IMPORTED` image.
    Imported(String),
    /// An image registered by the host with [`crate::engine::Engine::register_image`].
    External(String),
}

/// Current host value of one input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// Level of an event input; the engine turns rising edges into one-frame pulses.
    Event(bool),
    Bool(bool),
    Long(i32),
    Float(f32),
    Point2D([f32; 2]),
    Color([f32; 4]),
    Image(ImageSource),
}

impl InputValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Bool(_) => "bool",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Point2D(_) => "point2D",
            Self::Color(_) => "color",
            Self::Image(_) => "image",
        }
    }
}

pub type InputValues = BTreeMap<String, InputValue>;

/// An input coerced to its declared type for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    /// Frame on which the event last fired.
    Event { fired_at: Option<u64> },
    Bool(bool),
    /// `index` is the position of `value` in `VALUES`, or `value` when none are declared.
    Long { value: i32, index: i32 },
    Float(f32),
    Point2D([f32; 2]),
    Color([f32; 4]),
    Sampler(Option<ImageSource>),
}

#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub name: String,
    pub value: ResolvedValue,
}

/// Every declared input resolved for one frame, in declaration order.
#[derive(Debug, Clone)]
pub struct FrameInputs {
    pub frame_index: u64,
    pub inputs: Vec<ResolvedInput>,
    event_levels: Vec<(String, bool)>,
}

impl FrameInputs {
    pub fn get(&self, name: &str) -> Option<&ResolvedValue> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| &input.value)
    }

    pub fn event_fired(&self, name: &str) -> bool {
        matches!(
            self.get(name),
            Some(ResolvedValue::Event { fired_at: Some(frame) }) if *frame == self.frame_index
        )
    }

    pub fn numeric(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            ResolvedValue::Event { fired_at } => {
                Some(if *fired_at == Some(self.frame_index) { 1.0 } else { 0.0 })
            }
            ResolvedValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            ResolvedValue::Long { value, .. } => Some(f64::from(*value)),
            ResolvedValue::Float(value) => Some(f64::from(*value)),
            _ => None,
        }
    }
}

/// Expression scope for one frame: requested render size plus numeric inputs.
pub struct SizingScope<'a> {
    pub render_size: Size,
    pub inputs: &'a FrameInputs,
}

impl Scope for SizingScope<'_> {
    fn render_size(&self) -> Size {
        self.render_size
    }

    fn numeric_input(&self, name: &str) -> Option<f64> {
        self.inputs.numeric(name)
    }
}

/// Cross-frame input bookkeeping owned by the engine.
///
/// Only event levels are remembered, so that a level held high by the host produces a single
/// pulse on the frame it rose.
#[derive(Debug, Default)]
pub struct InputState {
    event_levels: HashMap<String, bool>,
}

impl InputState {
    pub fn resolve(
        &self,
        descriptor: &Descriptor,
        values: &InputValues,
        frame_index: u64,
    ) -> Result<FrameInputs> {
        if let Some(unknown) = values.keys().find(|name| descriptor.input(name).is_none()) {
            return Err(EngineError::unknown_reference(unknown.clone(), "host inputs"));
        }

        let mut inputs = Vec::with_capacity(descriptor.inputs.len());
        let mut event_levels = Vec::new();
        for spec in &descriptor.inputs {
            let supplied = values.get(&spec.name);
            let value = match (&spec.kind, supplied) {
                (InputKind::Event, supplied) => {
                    let level = match supplied {
                        None => false,
                        Some(InputValue::Event(level)) | Some(InputValue::Bool(level)) => *level,
                        Some(other) => return Err(type_mismatch(spec, other)),
                    };
                    let previous = self.event_levels.get(&spec.name).copied().unwrap_or(false);
                    event_levels.push((spec.name.clone(), level));
                    ResolvedValue::Event {
                        fired_at: (level && !previous).then_some(frame_index),
                    }
                }
                (_, None) => default_value(&spec.kind),
                (_, Some(value)) => coerce(spec, value)?,
            };
            inputs.push(ResolvedInput {
                name: spec.name.clone(),
                value,
            });
        }

        Ok(FrameInputs {
            frame_index,
            inputs,
            event_levels,
        })
    }

    /// Records event levels once a frame completed. Failed frames are not committed, so a retry
    /// of the same frame still sees the pulse.
    pub fn commit(&mut self, frame: &FrameInputs) {
        for (name, level) in &frame.event_levels {
            self.event_levels.insert(name.clone(), *level);
        }
    }
}

fn default_value(kind: &InputKind) -> ResolvedValue {
    match kind {
        InputKind::Event => ResolvedValue::Event { fired_at: None },
        InputKind::Bool { default } => ResolvedValue::Bool(*default),
        InputKind::Long {
            default, values, ..
        } => ResolvedValue::Long {
            value: *default,
            index: long_index(values, *default).unwrap_or(*default),
        },
        InputKind::Float { default, .. } => ResolvedValue::Float(*default),
        InputKind::Point2D { default, .. } => ResolvedValue::Point2D(*default),
        InputKind::Color { default, .. } => ResolvedValue::Color(*default),
        InputKind::Image | InputKind::Audio { .. } => ResolvedValue::Sampler(None),
    }
}

fn coerce(spec: &InputSpec, value: &InputValue) -> Result<ResolvedValue> {
    let resolved = match (&spec.kind, value) {
        (InputKind::Bool { .. }, InputValue::Bool(flag)) => ResolvedValue::Bool(*flag),
        (InputKind::Long { values, .. }, InputValue::Long(long)) => {
            let index = if values.is_empty() {
                *long
            } else {
                long_index(values, *long).ok_or_else(|| {
                    EngineError::invalid_input(
                        &spec.name,
                        format!("{long} is not one of VALUES {values:?}"),
                    )
                })?
            };
            ResolvedValue::Long {
                value: *long,
                index,
            }
        }
        (InputKind::Float { .. }, InputValue::Float(float)) => {
            ensure_finite(spec, &[*float])?;
            ResolvedValue::Float(*float)
        }
        (InputKind::Point2D { .. }, InputValue::Point2D(point)) => {
            ensure_finite(spec, point)?;
            ResolvedValue::Point2D(*point)
        }
        (InputKind::Color { .. }, InputValue::Color(color)) => {
            ensure_finite(spec, color)?;
            ResolvedValue::Color(*color)
        }
        (InputKind::Image | InputKind::Audio { .. }, InputValue::Image(source)) => {
            ResolvedValue::Sampler(Some(source.clone()))
        }
        (_, other) => return Err(type_mismatch(spec, other)),
    };
    Ok(resolved)
}

fn long_index(values: &[i32], value: i32) -> Option<i32> {
    values
        .iter()
        .position(|candidate| *candidate == value)
        .map(|index| index as i32)
}

fn ensure_finite(spec: &InputSpec, components: &[f32]) -> Result<()> {
    if components.iter().all(|component| component.is_finite()) {
        Ok(())
    } else {
        Err(EngineError::invalid_input(&spec.name, "values must be finite"))
    }
}

fn type_mismatch(spec: &InputSpec, value: &InputValue) -> EngineError {
    EngineError::invalid_input(
        &spec.name,
        format!(
            "expected {} value, got {}",
            spec.kind.type_name(),
            value.type_name()
        ),
    )
}

/// A `name=value` assignment as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOverride {
    pub name: String,
    pub raw: String,
}

impl FromStr for InputOverride {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        let (name, value) = raw.split_once('=').ok_or_else(|| {
            EngineError::invalid_input(raw, "expected NAME=VALUE, e.g. --set amount=0.5")
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::invalid_input(raw, "input name is empty"));
        }
        Ok(Self {
            name: name.to_owned(),
            raw: value.trim().to_owned(),
        })
    }
}

impl InputOverride {
    /// Parses the raw text according to the declared type of the input.
    pub fn to_value(&self, descriptor: &Descriptor) -> Result<InputValue> {
        let spec = descriptor
            .input(&self.name)
            .ok_or_else(|| EngineError::unknown_reference(&self.name, "--set"))?;
        let invalid = |expected: &str| {
            EngineError::invalid_input(
                &self.name,
                format!("expected {expected}, got '{}'", self.raw),
            )
        };
        let raw = self.raw.as_str();

        let value = match &spec.kind {
            InputKind::Event => {
                InputValue::Event(parse_flag(raw).ok_or_else(|| invalid("true/false"))?)
            }
            InputKind::Bool { .. } => {
                InputValue::Bool(parse_flag(raw).ok_or_else(|| invalid("true/false"))?)
            }
            InputKind::Long { .. } => {
                InputValue::Long(raw.parse().map_err(|_| invalid("an integer"))?)
            }
            InputKind::Float { .. } => {
                let float: f32 = raw.parse().map_err(|_| invalid("a float"))?;
                if !float.is_finite() {
                    return Err(invalid("a finite float"));
                }
                InputValue::Float(float)
            }
            InputKind::Point2D { .. } => {
                let parts = parse_components(raw).ok_or_else(|| invalid("x,y"))?;
                match parts.as_slice() {
                    [x, y] => InputValue::Point2D([*x, *y]),
                    _ => return Err(invalid("x,y")),
                }
            }
            InputKind::Color { .. } => {
                let parts = parse_components(raw).ok_or_else(|| invalid("r,g,b[,a]"))?;
                match parts.as_slice() {
                    [r, g, b] => InputValue::Color([*r, *g, *b, 1.0]),
                    [r, g, b, a] => InputValue::Color([*r, *g, *b, *a]),
                    _ => return Err(invalid("r,g,b[,a]")),
                }
            }
            InputKind::Image | InputKind::Audio { .. } => {
                let source = match raw.split_once(':') {
                    Some(("buffer", name)) => ImageSource::Buffer(name.to_owned()),
                    Some(("imported", name)) => ImageSource::Imported(name.to_owned()),
                    Some(("external", name)) => ImageSource::External(name.to_owned()),
                    None if !raw.is_empty() => ImageSource::External(raw.to_owned()),
                    _ => return Err(invalid("buffer:NAME, imported:NAME or external:NAME")),
                };
                InputValue::Image(source)
            }
        };
        Ok(value)
    }
}

/// Applies command-line overrides on top of an existing value map.
pub fn apply_overrides(
    descriptor: &Descriptor,
    overrides: &[InputOverride],
    values: &mut InputValues,
) -> Result<()> {
    for item in overrides {
        let value = item.to_value(descriptor)?;
        values.insert(item.name.clone(), value);
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_components(raw: &str) -> Option<Vec<f32>> {
    raw.split(',')
        .map(|part| part.trim().parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect()
}
