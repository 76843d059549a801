use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use isf_engine::config::EngineConfig;
use isf_engine::engine::{Engine, FrameRequest};
use isf_engine::error::{find_engine_error, ErrorEnvelope, ErrorEnvelopeBody};
use isf_engine::inputs::{apply_overrides, InputOverride, InputValues};
use isf_engine::manifest::{load_isf, IsfDocument};
use isf_engine::schema::Size;
use isf_engine::software::{SoftwareDriver, SoftwareProgram};

const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("ISF_GIT_HASH"), ")");

#[derive(Debug, Parser)]
#[command(name = "isf")]
#[command(about = "Inspect and dry-run ISF shader descriptors")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Print machine-readable JSON on stdout, including failures.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse and validate a descriptor.
    Check { file: PathBuf },
    /// Show pass sizes, formats and sampler bindings for one frame.
    Plan {
        file: PathBuf,
        #[command(flatten)]
        frame: FrameArgs,
    },
    /// Execute the pass schedule on the CPU driver with a placeholder program.
    Run {
        file: PathBuf,
        #[command(flatten)]
        frame: FrameArgs,
        #[arg(long, default_value_t = 1)]
        frames: u32,
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
    },
}

#[derive(Debug, Args)]
struct FrameArgs {
    #[arg(long, default_value_t = 1920)]
    width: u32,
    #[arg(long, default_value_t = 1080)]
    height: u32,
    /// Input override, repeatable: --set amount=0.5 --set inputImage=buffer:bufferA
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,
    /// Host clock of the first frame, in seconds.
    #[arg(long, default_value_t = 0.0)]
    time: f64,
    #[arg(long)]
    max_dimension: Option<u32>,
}

impl FrameArgs {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(max_dimension) = self.max_dimension {
            config.max_dimension = max_dimension;
        }
        config
    }

    fn render_size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    fn input_values(&self, document: &IsfDocument) -> Result<InputValues> {
        let overrides = self
            .set
            .iter()
            .map(|raw| raw.parse::<InputOverride>())
            .collect::<isf_engine::Result<Vec<_>>>()?;
        let mut values = InputValues::new();
        apply_overrides(&document.descriptor, &overrides, &mut values)?;
        Ok(values)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Check { file } => run_check(file),
        Commands::Plan { file, frame } => run_plan(file, frame),
        Commands::Run {
            file,
            frame,
            frames,
            fps,
        } => run_frames(file, frame, *frames, *fps),
    };

    match result {
        Ok(report) => {
            if cli.json {
                println!("{}", json_text(&report));
            } else {
                print_report(&report);
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            if cli.json {
                println!("{}", json_text(&envelope(&error)));
            } else {
                eprintln!("error: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn envelope(error: &anyhow::Error) -> Value {
    let envelope = match find_engine_error(error) {
        Some(engine_error) => engine_error.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "usage".to_owned(),
                message: format!("{error:#}"),
                details: None,
            },
        },
    };
    serde_json::to_value(envelope).unwrap_or_else(|_| json!({ "ok": false }))
}

fn json_text(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn load(path: &Path) -> Result<IsfDocument> {
    load_isf(path).with_context(|| format!("failed loading {}", path.display()))
}

fn run_check(path: &Path) -> Result<Value> {
    let document = load(path)?;
    let descriptor = &document.descriptor;
    Ok(json!({
        "ok": true,
        "file": path.display().to_string(),
        "isf_version": descriptor.isf_version.as_deref().unwrap_or("1.0"),
        "inputs": descriptor.inputs.len(),
        "passes": descriptor.passes.len(),
        "output_pass": descriptor.output_pass_index(),
        "imported": descriptor.imported.len(),
        "descriptor": descriptor.to_json(),
    }))
}

fn dry_run_engine(document: IsfDocument, frame: &FrameArgs) -> Result<Engine<SoftwareDriver>> {
    let program = SoftwareProgram::new(|fragment| [fragment.norm[0], fragment.norm[1], 0.0, 1.0]);
    let engine = Engine::new(SoftwareDriver::new(), document.descriptor, program, frame.config())?;
    Ok(engine)
}

fn run_plan(path: &Path, frame: &FrameArgs) -> Result<Value> {
    let document = load(path)?;
    let values = frame.input_values(&document)?;
    let engine = dry_run_engine(document, frame)?;
    let passes = engine.plan(frame.render_size(), &values)?;
    Ok(json!({
        "ok": true,
        "render_size": frame.render_size(),
        "passes": passes,
    }))
}

fn run_frames(path: &Path, frame: &FrameArgs, frames: u32, fps: f64) -> Result<Value> {
    let document = load(path)?;
    let values = frame.input_values(&document)?;
    let has_imported = !document.descriptor.imported.is_empty();
    let mut engine = dry_run_engine(document, frame)?;
    if has_imported {
        engine.load_imported_images()?;
    }

    let mut rendered = Vec::with_capacity(frames as usize);
    for index in 0..frames {
        let request = FrameRequest {
            render_size: frame.render_size(),
            time: frame.time + f64::from(index) / fps,
            date: None,
            inputs: values.clone(),
        };
        let output = engine.render_frame(&request)?;
        rendered.push(json!({
            "frame_index": output.frame_index,
            "output": output.output.key().to_string(),
            "size": output.size,
        }));
    }

    let buffers = engine
        .buffer_info()
        .into_iter()
        .map(|info| {
            json!({
                "buffer": info.key.to_string(),
                "size": info.size,
                "format": info.format,
                "persistent": info.persistent,
                "generation": info.generation,
            })
        })
        .collect::<Vec<_>>();
    Ok(json!({
        "ok": true,
        "frames": rendered,
        "passes_executed": engine.driver().passes_executed(),
        "buffers": buffers,
    }))
}

fn print_report(report: &Value) {
    if let Some(file) = report["file"].as_str() {
        println!(
            "OK: {} (ISF {}, {} inputs, {} passes, output pass {})",
            file,
            report["isf_version"].as_str().unwrap_or("1.0"),
            report["inputs"],
            report["passes"],
            report["output_pass"]
        );
        return;
    }
    if let Some(passes) = report["passes"].as_array() {
        for pass in passes {
            println!(
                "pass {}: {} {}x{} {}{}{} reads [{}]",
                pass["pass_index"],
                pass["target"].as_str().unwrap_or("<output>"),
                pass["size"]["width"],
                pass["size"]["height"],
                pass["format"].as_str().unwrap_or("?"),
                if pass["persistent"] == json!(true) { " persistent" } else { "" },
                if pass["output"] == json!(true) { " output" } else { "" },
                pass["reads"]
                    .as_array()
                    .map(|reads| {
                        reads
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default()
            );
        }
        return;
    }
    if let Some(frames) = report["frames"].as_array() {
        for frame in frames {
            println!(
                "frame {}: {} {}x{}",
                frame["frame_index"],
                frame["output"].as_str().unwrap_or("<output>"),
                frame["size"]["width"],
                frame["size"]["height"]
            );
        }
        println!("passes executed: {}", report["passes_executed"]);
    }
}
