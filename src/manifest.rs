//! ISF document loading.
//!
//! An ISF file starts with a `/* ... */` comment holding a JSON object; everything after the
//! comment is shader source, returned untouched for the host to compile.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::expression::{Expression, Variable};
use crate::schema::{Descriptor, ImportedImage, InputKind, InputSpec, PassSpec};
use crate::uniforms::BuiltinUniform;

/// A parsed ISF file: validated descriptor plus the shader source that followed it.
#[derive(Debug, Clone)]
pub struct IsfDocument {
    pub descriptor: Descriptor,
    pub source: String,
}

pub fn load_isf(path: &Path) -> Result<IsfDocument> {
    let text = fs::read_to_string(path)?;
    let mut document = parse_isf(&text).map_err(|error| match error {
        EngineError::MalformedDescriptor { reason } => {
            EngineError::malformed(format!("{}: {reason}", path.display()))
        }
        other => other,
    })?;

    let shader_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    for image in &mut document.descriptor.imported {
        image.path = resolve_and_validate_asset_path(&shader_dir, &image.path, &image.name)?;
    }

    debug!(
        path = %path.display(),
        passes = document.descriptor.passes.len(),
        inputs = document.descriptor.inputs.len(),
        "loaded ISF document"
    );
    Ok(document)
}

pub fn parse_isf(text: &str) -> Result<IsfDocument> {
    let (json, source) = split_descriptor(text)?;
    let raw: RawDescriptor = serde_json::from_str(json).map_err(|error| {
        EngineError::malformed(format!(
            "invalid JSON at line {}, column {}: {error}",
            error.line(),
            error.column()
        ))
    })?;
    let descriptor = raw.into_descriptor()?;
    Ok(IsfDocument {
        descriptor,
        source: source.to_owned(),
    })
}

/// Splits the leading descriptor comment from the shader source.
pub fn split_descriptor(text: &str) -> Result<(&str, &str)> {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    let body = trimmed
        .strip_prefix("/*")
        .ok_or_else(|| EngineError::malformed("file does not start with a /* ... */ JSON block"))?;
    let end = body
        .find("*/")
        .ok_or_else(|| EngineError::malformed("descriptor comment is not terminated"))?;
    let json = &body[..end];
    if json.trim().is_empty() {
        return Err(EngineError::malformed("descriptor comment is empty"));
    }
    Ok((json, &body[end + 2..]))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawDescriptor {
    description: Option<String>,
    credit: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    isfvsn: Option<Value>,
    #[serde(default)]
    inputs: Vec<RawInput>,
    #[serde(default)]
    passes: Vec<RawPass>,
    imported: Option<RawImported>,
    persistent_buffers: Option<RawPersistentBuffers>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawInput {
    name: String,
    #[serde(rename = "TYPE")]
    kind: String,
    label: Option<String>,
    default: Option<Value>,
    min: Option<Value>,
    max: Option<Value>,
    identity: Option<Value>,
    values: Option<Vec<Value>>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawPass {
    target: Option<String>,
    persistent: Option<Value>,
    float: Option<Value>,
    width: Option<Value>,
    height: Option<Value>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawImported {
    ByName(BTreeMap<String, RawImportedPath>),
    List(Vec<RawImportedEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawImportedPath {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawImportedEntry {
    name: String,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPersistentBuffers {
    Names(Vec<String>),
    Sized(BTreeMap<String, RawBufferSize>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawBufferSize {
    width: Option<Value>,
    height: Option<Value>,
    float: Option<Value>,
}

impl RawDescriptor {
    fn into_descriptor(self) -> Result<Descriptor> {
        let inputs = self
            .inputs
            .into_iter()
            .map(RawInput::into_spec)
            .collect::<Result<Vec<_>>>()?;

        let mut passes = self
            .passes
            .into_iter()
            .enumerate()
            .map(|(index, pass)| pass.into_spec(index))
            .collect::<Result<Vec<_>>>()?;
        if passes.is_empty() {
            passes.push(PassSpec::default());
        }

        if let Some(persistent) = self.persistent_buffers {
            apply_persistent_buffers(&mut passes, persistent)?;
        }

        let imported = match self.imported {
            None => Vec::new(),
            Some(RawImported::ByName(map)) => map
                .into_iter()
                .map(|(name, entry)| ImportedImage {
                    name,
                    path: entry.path,
                })
                .collect(),
            Some(RawImported::List(list)) => list
                .into_iter()
                .map(|entry| ImportedImage {
                    name: entry.name,
                    path: entry.path,
                })
                .collect(),
        };

        let isf_version = self.isfvsn.map(|value| match value {
            Value::String(version) => version,
            other => other.to_string(),
        });

        let descriptor = Descriptor {
            description: self.description,
            credit: self.credit,
            categories: self.categories,
            isf_version,
            inputs,
            passes,
            imported,
        };
        validate_descriptor(&descriptor)?;
        Ok(descriptor)
    }
}

impl RawInput {
    fn into_spec(self) -> Result<InputSpec> {
        let name = self.name;
        let context = |reason: String| EngineError::malformed(format!("input '{name}': {reason}"));

        let kind = match self.kind.as_str() {
            "event" => InputKind::Event,
            "bool" => InputKind::Bool {
                default: match &self.default {
                    Some(value) => as_flag(value).map_err(context)?,
                    None => false,
                },
            },
            "long" => {
                let values = self
                    .values
                    .unwrap_or_default()
                    .iter()
                    .map(as_long)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(context)?;
                let labels = self.labels.unwrap_or_default();
                if !labels.is_empty() && labels.len() != values.len() {
                    return Err(context(format!(
                        "LABELS has {} entries but VALUES has {}",
                        labels.len(),
                        values.len()
                    )));
                }
                let min = self.min.as_ref().map(as_long).transpose().map_err(context)?;
                let max = self.max.as_ref().map(as_long).transpose().map_err(context)?;
                let default = match &self.default {
                    Some(value) => as_long(value).map_err(context)?,
                    None => values.first().copied().or(min).unwrap_or(0),
                };
                if !values.is_empty() && !values.contains(&default) {
                    return Err(context(format!("DEFAULT {default} is not one of VALUES")));
                }
                InputKind::Long {
                    default,
                    min,
                    max,
                    values,
                    labels,
                }
            }
            "float" => InputKind::Float {
                default: self
                    .default
                    .as_ref()
                    .map(as_float)
                    .transpose()
                    .map_err(context)?
                    .unwrap_or(0.0),
                min: self.min.as_ref().map(as_float).transpose().map_err(context)?,
                max: self.max.as_ref().map(as_float).transpose().map_err(context)?,
                identity: self
                    .identity
                    .as_ref()
                    .map(as_float)
                    .transpose()
                    .map_err(context)?,
            },
            "point2D" => InputKind::Point2D {
                default: self
                    .default
                    .as_ref()
                    .map(as_vec2)
                    .transpose()
                    .map_err(context)?
                    .unwrap_or([0.0, 0.0]),
                min: self.min.as_ref().map(as_vec2).transpose().map_err(context)?,
                max: self.max.as_ref().map(as_vec2).transpose().map_err(context)?,
            },
            "color" => InputKind::Color {
                default: self
                    .default
                    .as_ref()
                    .map(as_color)
                    .transpose()
                    .map_err(context)?
                    .unwrap_or([0.0, 0.0, 0.0, 1.0]),
                min: self.min.as_ref().map(as_color).transpose().map_err(context)?,
                max: self.max.as_ref().map(as_color).transpose().map_err(context)?,
            },
            "image" => InputKind::Image,
            "audio" | "audioFFT" => InputKind::Audio {
                fft: self.kind == "audioFFT",
                max_samples: self
                    .max
                    .as_ref()
                    .map(as_long)
                    .transpose()
                    .map_err(context)?
                    .map(|max| max.max(0) as u32),
            },
            other => return Err(context(format!("unknown TYPE '{other}'"))),
        };

        Ok(InputSpec {
            name,
            label: self.label,
            kind,
        })
    }
}

impl RawPass {
    fn into_spec(self, index: usize) -> Result<PassSpec> {
        let context = |reason: String| EngineError::malformed(format!("pass {index}: {reason}"));
        let target = self.target.filter(|target| !target.is_empty());
        let persistent = self
            .persistent
            .as_ref()
            .map(as_flag)
            .transpose()
            .map_err(context)?
            .unwrap_or(false);
        if persistent && target.is_none() {
            return Err(context("PERSISTENT requires a TARGET".to_owned()));
        }

        Ok(PassSpec {
            target,
            persistent,
            float: self
                .float
                .as_ref()
                .map(as_flag)
                .transpose()
                .map_err(context)?
                .unwrap_or(false),
            width: self
                .width
                .as_ref()
                .map(as_dimension)
                .transpose()
                .map_err(|reason| context(format!("WIDTH {reason}")))?,
            height: self
                .height
                .as_ref()
                .map(as_dimension)
                .transpose()
                .map_err(|reason| context(format!("HEIGHT {reason}")))?,
            description: self.description,
        })
    }
}

/// ISF 1.0 declares persistence at the top level instead of per pass.
fn apply_persistent_buffers(passes: &mut [PassSpec], buffers: RawPersistentBuffers) -> Result<()> {
    let entries = match buffers {
        RawPersistentBuffers::Names(names) => names
            .into_iter()
            .map(|name| (name, RawBufferSize::default()))
            .collect::<Vec<_>>(),
        RawPersistentBuffers::Sized(map) => map.into_iter().collect(),
    };

    for (name, size) in entries {
        let context = |reason: String| {
            EngineError::malformed(format!("persistent buffer '{name}': {reason}"))
        };
        let pass = passes
            .iter_mut()
            .find(|pass| pass.target.as_deref() == Some(name.as_str()))
            .ok_or_else(|| context("is not the TARGET of any pass".to_owned()))?;
        pass.persistent = true;
        if pass.width.is_none() {
            pass.width = size.width.as_ref().map(as_dimension).transpose().map_err(context)?;
        }
        if pass.height.is_none() {
            pass.height = size
                .height
                .as_ref()
                .map(as_dimension)
                .transpose()
                .map_err(context)?;
        }
        if let Some(float) = &size.float {
            pass.float |= as_flag(float).map_err(context)?;
        }
    }
    Ok(())
}

fn validate_descriptor(descriptor: &Descriptor) -> Result<()> {
    let reserved = BuiltinUniform::ALL
        .iter()
        .map(|builtin| builtin.glsl_name())
        .collect::<HashSet<_>>();
    let mut seen = HashSet::new();

    let names = descriptor
        .inputs
        .iter()
        .map(|input| ("input", input.name.as_str()))
        .chain(descriptor.named_targets().map(|target| ("target", target)))
        .chain(
            descriptor
                .imported
                .iter()
                .map(|image| ("imported image", image.name.as_str())),
        );

    for (what, name) in names {
        if !identifier_regex().is_match(name) {
            return Err(EngineError::malformed(format!(
                "{what} name '{name}' is not a valid identifier"
            )));
        }
        if reserved.contains(name) {
            return Err(EngineError::malformed(format!(
                "{what} name '{name}' shadows a built-in uniform"
            )));
        }
        if !seen.insert(name) {
            return Err(EngineError::malformed(format!(
                "duplicate {what} name '{name}'"
            )));
        }
    }

    for (index, pass) in descriptor.passes.iter().enumerate() {
        for (axis, expression) in [("WIDTH", &pass.width), ("HEIGHT", &pass.height)] {
            let Some(expression) = expression else {
                continue;
            };
            for variable in expression.variables() {
                let Variable::Input(name) = variable else {
                    continue;
                };
                let numeric = descriptor
                    .input(name)
                    .is_some_and(|input| input.kind.is_numeric());
                if !numeric {
                    return Err(EngineError::unknown_reference(
                        format!("${name}"),
                        format!("{axis} of pass {index}"),
                    ));
                }
            }
        }
    }

    Ok(())
}

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER_RE: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex should compile")
    })
}

fn resolve_and_validate_asset_path(
    shader_dir: &Path,
    source_path: &Path,
    name: &str,
) -> Result<PathBuf> {
    let resolved = if source_path.is_absolute() {
        source_path.to_path_buf()
    } else {
        shader_dir.join(source_path)
    };

    let problem = if !resolved.exists() {
        Some("does not exist")
    } else if !resolved.is_file() {
        Some("is not a file")
    } else {
        None
    };

    match problem {
        Some(reason) => Err(EngineError::ImportedImage {
            name: name.to_owned(),
            path: resolved,
            reason: reason.to_owned(),
        }),
        None => Ok(resolved),
    }
}

fn as_flag(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(format!("expected a boolean, got '{other}'")),
        },
        other => Err(format!("expected a boolean, got {other}")),
    }
}

fn as_float(value: &Value) -> std::result::Result<f32, String> {
    let number = value
        .as_f64()
        .ok_or_else(|| format!("expected a number, got {value}"))?;
    if !number.is_finite() {
        return Err(format!("{number} is not finite"));
    }
    Ok(number as f32)
}

fn as_long(value: &Value) -> std::result::Result<i32, String> {
    if let Some(integer) = value.as_i64() {
        return i32::try_from(integer).map_err(|_| format!("{integer} is out of range"));
    }
    match value.as_f64() {
        Some(number) if number.fract() == 0.0 && number.abs() <= f64::from(i32::MAX) => {
            Ok(number as i32)
        }
        _ => Err(format!("expected an integer, got {value}")),
    }
}

fn as_floats<const N: usize>(value: &Value) -> std::result::Result<[f32; N], String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected an array of {N} numbers, got {value}"))?;
    if items.len() != N {
        return Err(format!(
            "expected an array of {N} numbers, got {}",
            items.len()
        ));
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = as_float(item)?;
    }
    Ok(out)
}

fn as_vec2(value: &Value) -> std::result::Result<[f32; 2], String> {
    as_floats::<2>(value)
}

/// Colors may omit alpha, which then defaults to opaque.
fn as_color(value: &Value) -> std::result::Result<[f32; 4], String> {
    match value.as_array().map(Vec::len) {
        Some(3) => {
            let [r, g, b] = as_floats::<3>(value)?;
            Ok([r, g, b, 1.0])
        }
        _ => as_floats::<4>(value),
    }
}

fn as_dimension(value: &Value) -> std::result::Result<Expression, String> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .map(Expression::constant)
            .ok_or_else(|| format!("{number} is not a usable number")),
        Value::String(source) => Expression::parse(source).map_err(|error| error.to_string()),
        other => Err(format!("expected a number or expression string, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<IsfDocument> {
        parse_isf(&format!("/*{json}*/\nvoid main() {{ gl_FragColor = vec4(1.0); }}\n"))
    }

    #[test]
    fn source_after_the_comment_is_returned_unmodified() {
        let text = "/*{ \"INPUTS\": [] }*/\nvoid main() {\n\tgl_FragColor = vec4(0.0);\n}\n";
        let document = parse_isf(text).expect("document parses");
        assert_eq!(
            document.source,
            "\nvoid main() {\n\tgl_FragColor = vec4(0.0);\n}\n"
        );
    }

    #[test]
    fn missing_comment_is_malformed() {
        let error = parse_isf("void main() {}").expect_err("should fail");
        assert!(matches!(error, EngineError::MalformedDescriptor { .. }));

        let error = parse_isf("/* { \"INPUTS\": [] ").expect_err("should fail");
        assert!(error.to_string().contains("not terminated"));
    }

    #[test]
    fn invalid_json_reports_location() {
        let error = parse(r#"{ "INPUTS": [ }"#).expect_err("should fail");
        assert!(error.to_string().contains("invalid JSON at line 1"));
    }

    #[test]
    fn no_passes_means_one_implicit_output_pass() {
        let document = parse(r#"{ "ISFVSN": "2", "INPUTS": [] }"#).expect("parses");
        assert_eq!(document.descriptor.passes, vec![PassSpec::default()]);
        assert_eq!(document.descriptor.isf_version.as_deref(), Some("2"));
    }

    #[test]
    fn pass_flags_accept_numbers_and_strings() {
        let document = parse(
            r#"{ "PASSES": [
                { "TARGET": "a", "PERSISTENT": 1, "FLOAT": "true", "WIDTH": 32, "HEIGHT": "$HEIGHT/4" },
                { }
            ] }"#,
        )
        .expect("parses");
        let pass = &document.descriptor.passes[0];
        assert!(pass.persistent);
        assert!(pass.float);
        assert_eq!(pass.width.as_ref().and_then(Expression::as_constant), Some(32.0));
        assert_eq!(pass.height.as_ref().map(Expression::source), Some("$HEIGHT/4"));
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let error = parse(r#"{ "PASSES": [ { "TARGET": "a" }, { "TARGET": "a" }, {} ] }"#)
            .expect_err("should fail");
        assert!(error.to_string().contains("duplicate target name 'a'"));
    }

    #[test]
    fn input_and_target_names_share_one_namespace() {
        let error = parse(
            r#"{ "INPUTS": [ { "NAME": "a", "TYPE": "float" } ],
                 "PASSES": [ { "TARGET": "a" }, {} ] }"#,
        )
        .expect_err("should fail");
        assert!(error.to_string().contains("duplicate target name 'a'"));
    }

    #[test]
    fn unknown_input_type_is_malformed() {
        let error = parse(r#"{ "INPUTS": [ { "NAME": "x", "TYPE": "vec3" } ] }"#)
            .expect_err("should fail");
        assert!(error.to_string().contains("unknown TYPE 'vec3'"));
    }

    #[test]
    fn builtin_names_cannot_be_shadowed() {
        let error = parse(r#"{ "INPUTS": [ { "NAME": "TIME", "TYPE": "float" } ] }"#)
            .expect_err("should fail");
        assert!(error.to_string().contains("shadows a built-in uniform"));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let error = parse(r#"{ "PASSES": [ { "TARGET": "my buffer" }, {} ] }"#)
            .expect_err("should fail");
        assert!(error.to_string().contains("not a valid identifier"));
    }

    #[test]
    fn expression_references_must_be_numeric_inputs() {
        let error = parse(
            r#"{ "INPUTS": [ { "NAME": "tint", "TYPE": "color" } ],
                 "PASSES": [ { "TARGET": "a", "WIDTH": "$WIDTH*$tint" }, {} ] }"#,
        )
        .expect_err("should fail");
        match error {
            EngineError::UnknownReference { name, context } => {
                assert_eq!(name, "$tint");
                assert_eq!(context, "WIDTH of pass 0");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let ok = parse(
            r#"{ "INPUTS": [ { "NAME": "scale", "TYPE": "float", "DEFAULT": 0.5 } ],
                 "PASSES": [ { "TARGET": "a", "WIDTH": "$WIDTH*$scale" }, {} ] }"#,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn input_defaults_are_coerced_per_type() {
        let document = parse(
            r#"{ "INPUTS": [
                { "NAME": "flag", "TYPE": "bool", "DEFAULT": 1 },
                { "NAME": "mode", "TYPE": "long", "VALUES": [2, 4, 8], "LABELS": ["a", "b", "c"], "DEFAULT": 4 },
                { "NAME": "amount", "TYPE": "float", "DEFAULT": 0.25, "MIN": 0, "MAX": 1 },
                { "NAME": "center", "TYPE": "point2D", "DEFAULT": [0.5, 0.5] },
                { "NAME": "tint", "TYPE": "color", "DEFAULT": [1, 0, 0] },
                { "NAME": "spectrum", "TYPE": "audioFFT", "MAX": 256 }
            ] }"#,
        )
        .expect("parses");
        let kinds = document
            .descriptor
            .inputs
            .iter()
            .map(|input| input.kind.clone())
            .collect::<Vec<_>>();
        assert_eq!(kinds[0], InputKind::Bool { default: true });
        assert!(matches!(kinds[1], InputKind::Long { default: 4, .. }));
        assert_eq!(
            kinds[2],
            InputKind::Float {
                default: 0.25,
                min: Some(0.0),
                max: Some(1.0),
                identity: None,
            }
        );
        assert_eq!(
            kinds[3],
            InputKind::Point2D {
                default: [0.5, 0.5],
                min: None,
                max: None,
            }
        );
        assert_eq!(
            kinds[4],
            InputKind::Color {
                default: [1.0, 0.0, 0.0, 1.0],
                min: None,
                max: None,
            }
        );
        assert_eq!(
            kinds[5],
            InputKind::Audio {
                fft: true,
                max_samples: Some(256)
            }
        );
    }

    #[test]
    fn long_default_must_be_listed() {
        let error = parse(
            r#"{ "INPUTS": [ { "NAME": "mode", "TYPE": "long", "VALUES": [0, 1], "DEFAULT": 3 } ] }"#,
        )
        .expect_err("should fail");
        assert!(error.to_string().contains("DEFAULT 3 is not one of VALUES"));
    }

    #[test]
    fn labels_must_match_values() {
        let error = parse(
            r#"{ "INPUTS": [ { "NAME": "mode", "TYPE": "long", "VALUES": [0, 1], "LABELS": ["one"] } ] }"#,
        )
        .expect_err("should fail");
        assert!(error.to_string().contains("LABELS has 1 entries"));
    }

    #[test]
    fn persistent_output_pass_is_rejected() {
        let error = parse(r#"{ "PASSES": [ { "PERSISTENT": true } ] }"#).expect_err("should fail");
        assert!(error.to_string().contains("PERSISTENT requires a TARGET"));
    }

    #[test]
    fn isf_v1_persistent_buffers_mark_targets() {
        let document = parse(
            r#"{ "PERSISTENT_BUFFERS": { "trail": { "WIDTH": "$WIDTH/2", "FLOAT": true } },
                 "PASSES": [ { "TARGET": "trail" }, { "TARGET": "scratch" }, {} ] }"#,
        )
        .expect("parses");
        let trail = &document.descriptor.passes[0];
        assert!(trail.persistent);
        assert!(trail.float);
        assert_eq!(trail.width.as_ref().map(Expression::source), Some("$WIDTH/2"));
        assert!(!document.descriptor.passes[1].persistent);

        let names = parse(
            r#"{ "PERSISTENT_BUFFERS": ["scratch"], "PASSES": [ { "TARGET": "scratch" }, {} ] }"#,
        )
        .expect("parses");
        assert!(names.descriptor.passes[0].persistent);

        let error = parse(r#"{ "PERSISTENT_BUFFERS": ["ghost"], "PASSES": [ {} ] }"#)
            .expect_err("should fail");
        assert!(error.to_string().contains("not the TARGET of any pass"));
    }

    #[test]
    fn imported_accepts_object_and_list_forms() {
        let object = parse(r#"{ "IMPORTED": { "noise": { "PATH": "noise.png" } } }"#)
            .expect("parses");
        assert_eq!(
            object.descriptor.imported,
            vec![ImportedImage {
                name: "noise".to_owned(),
                path: PathBuf::from("noise.png")
            }]
        );

        let list = parse(r#"{ "IMPORTED": [ { "NAME": "lut", "PATH": "lut.png" } ] }"#)
            .expect("parses");
        assert_eq!(list.descriptor.imported[0].name, "lut");
    }
}
