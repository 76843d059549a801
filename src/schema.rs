use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::expression::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn as_vec2(self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parsed, validated metadata of one ISF document. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub description: Option<String>,
    pub credit: Option<String>,
    pub categories: Vec<String>,
    /// `ISFVSN` as written; `None` means an ISF 1.0 document.
    pub isf_version: Option<String>,
    pub inputs: Vec<InputSpec>,
    /// Never empty: a document without `PASSES` gets one implicit output pass.
    pub passes: Vec<PassSpec>,
    pub imported: Vec<ImportedImage>,
}

impl Descriptor {
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn imported_image(&self, name: &str) -> Option<&ImportedImage> {
        self.imported.iter().find(|image| image.name == name)
    }

    /// The pass writing the named buffer, with its index.
    pub fn target_pass(&self, target: &str) -> Option<(usize, &PassSpec)> {
        self.passes
            .iter()
            .enumerate()
            .find(|(_, pass)| pass.target.as_deref() == Some(target))
    }

    pub fn named_targets(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().filter_map(|pass| pass.target.as_deref())
    }

    /// Index of the pass whose target is presented as the frame output: the last pass without a
    /// `TARGET`, or the last pass when every pass names one.
    pub fn output_pass_index(&self) -> usize {
        self.passes
            .iter()
            .rposition(|pass| pass.target.is_none())
            .unwrap_or(self.passes.len().saturating_sub(1))
    }

    pub fn is_multi_pass(&self) -> bool {
        self.passes.len() > 1
    }

    /// Re-serializes the descriptor with ISF keys. Pass order and target names are preserved.
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        if let Some(description) = &self.description {
            root.insert("DESCRIPTION".to_owned(), json!(description));
        }
        if let Some(credit) = &self.credit {
            root.insert("CREDIT".to_owned(), json!(credit));
        }
        if let Some(version) = &self.isf_version {
            root.insert("ISFVSN".to_owned(), json!(version));
        }
        root.insert("CATEGORIES".to_owned(), json!(self.categories));
        root.insert(
            "INPUTS".to_owned(),
            Value::Array(self.inputs.iter().map(InputSpec::to_json).collect()),
        );
        root.insert(
            "PASSES".to_owned(),
            Value::Array(self.passes.iter().map(PassSpec::to_json).collect()),
        );
        if !self.imported.is_empty() {
            let imported = self
                .imported
                .iter()
                .map(|image| {
                    (
                        image.name.clone(),
                        json!({ "PATH": image.path.to_string_lossy() }),
                    )
                })
                .collect::<Map<_, _>>();
            root.insert("IMPORTED".to_owned(), Value::Object(imported));
        }
        Value::Object(root)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub label: Option<String>,
    pub kind: InputKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputKind {
    /// One-frame edge-triggered boolean.
    Event,
    Bool {
        default: bool,
    },
    /// `long` popup/enum input. The bound uniform is the index of the value within `values`
    /// when `values` is declared.
    Long {
        default: i32,
        min: Option<i32>,
        max: Option<i32>,
        values: Vec<i32>,
        labels: Vec<String>,
    },
    Float {
        default: f32,
        min: Option<f32>,
        max: Option<f32>,
        identity: Option<f32>,
    },
    Point2D {
        default: [f32; 2],
        min: Option<[f32; 2]>,
        max: Option<[f32; 2]>,
    },
    Color {
        default: [f32; 4],
        min: Option<[f32; 4]>,
        max: Option<[f32; 4]>,
    },
    Image,
    Audio {
        fft: bool,
        max_samples: Option<u32>,
    },
}

impl InputKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Bool { .. } => "bool",
            Self::Long { .. } => "long",
            Self::Float { .. } => "float",
            Self::Point2D { .. } => "point2D",
            Self::Color { .. } => "color",
            Self::Image => "image",
            Self::Audio { fft: false, .. } => "audio",
            Self::Audio { fft: true, .. } => "audioFFT",
        }
    }

    /// Scalar inputs usable as `$name` in dimension expressions.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Event | Self::Bool { .. } | Self::Long { .. } | Self::Float { .. }
        )
    }

    /// Inputs that bind a texture sampler rather than a plain uniform.
    pub fn is_sampler(&self) -> bool {
        matches!(self, Self::Image | Self::Audio { .. })
    }
}

impl InputSpec {
    fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("NAME".to_owned(), json!(self.name));
        object.insert("TYPE".to_owned(), json!(self.kind.type_name()));
        if let Some(label) = &self.label {
            object.insert("LABEL".to_owned(), json!(label));
        }
        match &self.kind {
            InputKind::Event | InputKind::Image => {}
            InputKind::Bool { default } => {
                object.insert("DEFAULT".to_owned(), json!(default));
            }
            InputKind::Long {
                default,
                min,
                max,
                values,
                labels,
            } => {
                object.insert("DEFAULT".to_owned(), json!(default));
                insert_some(&mut object, "MIN", min.map(|v| json!(v)));
                insert_some(&mut object, "MAX", max.map(|v| json!(v)));
                if !values.is_empty() {
                    object.insert("VALUES".to_owned(), json!(values));
                }
                if !labels.is_empty() {
                    object.insert("LABELS".to_owned(), json!(labels));
                }
            }
            InputKind::Float {
                default,
                min,
                max,
                identity,
            } => {
                object.insert("DEFAULT".to_owned(), json!(default));
                insert_some(&mut object, "MIN", min.map(|v| json!(v)));
                insert_some(&mut object, "MAX", max.map(|v| json!(v)));
                insert_some(&mut object, "IDENTITY", identity.map(|v| json!(v)));
            }
            InputKind::Point2D { default, min, max } => {
                object.insert("DEFAULT".to_owned(), json!(default));
                insert_some(&mut object, "MIN", min.map(|v| json!(v)));
                insert_some(&mut object, "MAX", max.map(|v| json!(v)));
            }
            InputKind::Color { default, min, max } => {
                object.insert("DEFAULT".to_owned(), json!(default));
                insert_some(&mut object, "MIN", min.map(|v| json!(v)));
                insert_some(&mut object, "MAX", max.map(|v| json!(v)));
            }
            InputKind::Audio { max_samples, .. } => {
                insert_some(&mut object, "MAX", max_samples.map(|v| json!(v)));
            }
        }
        Value::Object(object)
    }
}

/// One render pass. `target: None` writes the frame's default output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassSpec {
    pub target: Option<String>,
    pub persistent: bool,
    pub float: bool,
    pub width: Option<Expression>,
    pub height: Option<Expression>,
    pub description: Option<String>,
}

impl PassSpec {
    fn to_json(&self) -> Value {
        let mut object = Map::new();
        insert_some(&mut object, "TARGET", self.target.as_ref().map(|t| json!(t)));
        if self.persistent {
            object.insert("PERSISTENT".to_owned(), json!(true));
        }
        if self.float {
            object.insert("FLOAT".to_owned(), json!(true));
        }
        insert_some(&mut object, "WIDTH", self.width.as_ref().map(expression_json));
        insert_some(&mut object, "HEIGHT", self.height.as_ref().map(expression_json));
        insert_some(
            &mut object,
            "DESCRIPTION",
            self.description.as_ref().map(|d| json!(d)),
        );
        Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedImage {
    pub name: String,
    pub path: PathBuf,
}

fn expression_json(expression: &Expression) -> Value {
    match expression.as_constant() {
        Some(value) => json!(value),
        None => json!(expression.source()),
    }
}

fn insert_some(object: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        object.insert(key.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(target: Option<&str>) -> PassSpec {
        PassSpec {
            target: target.map(str::to_owned),
            ..PassSpec::default()
        }
    }

    fn descriptor(passes: Vec<PassSpec>) -> Descriptor {
        Descriptor {
            description: None,
            credit: None,
            categories: Vec::new(),
            isf_version: Some("2.0".to_owned()),
            inputs: Vec::new(),
            passes,
            imported: Vec::new(),
        }
    }

    #[test]
    fn output_pass_is_last_untargeted_pass() {
        let d = descriptor(vec![pass(Some("a")), pass(None), pass(Some("b"))]);
        assert_eq!(d.output_pass_index(), 1);
    }

    #[test]
    fn output_pass_falls_back_to_last_pass_when_all_are_named() {
        let d = descriptor(vec![pass(Some("a")), pass(Some("b"))]);
        assert_eq!(d.output_pass_index(), 1);
    }

    #[test]
    fn target_pass_lookup_returns_index() {
        let d = descriptor(vec![pass(Some("a")), pass(Some("b")), pass(None)]);
        let (index, spec) = d.target_pass("b").expect("b is declared");
        assert_eq!(index, 1);
        assert_eq!(spec.target.as_deref(), Some("b"));
        assert!(d.target_pass("missing").is_none());
        assert_eq!(d.named_targets().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn pass_json_uses_isf_keys() {
        let spec = PassSpec {
            target: Some("bufferA".to_owned()),
            persistent: true,
            float: true,
            width: Some(Expression::parse("$WIDTH/2").expect("parses")),
            height: Some(Expression::constant(64.0)),
            description: None,
        };
        let value = spec.to_json();
        assert_eq!(value["TARGET"], "bufferA");
        assert_eq!(value["PERSISTENT"], true);
        assert_eq!(value["FLOAT"], true);
        assert_eq!(value["WIDTH"], "$WIDTH/2");
        assert_eq!(value["HEIGHT"], 64.0);
    }

    #[test]
    fn input_kind_classification() {
        assert!(InputKind::Event.is_numeric());
        assert!(InputKind::Image.is_sampler());
        assert!(!InputKind::Image.is_numeric());
        let fft = InputKind::Audio {
            fft: true,
            max_samples: None,
        };
        assert!(fft.is_sampler());
        assert_eq!(fft.type_name(), "audioFFT");
    }
}
