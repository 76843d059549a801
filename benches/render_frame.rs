//! Frame scheduling benchmarks on the CPU driver.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::Path;

use isf_engine::engine::{Engine, FrameRequest};
use isf_engine::inputs::InputValue;
use isf_engine::load_isf;
use isf_engine::schema::Size;
use isf_engine::software::{SoftwareDriver, SoftwareProgram};
use isf_engine::EngineConfig;

fn fixture_engine(name: &str, program: SoftwareProgram) -> Engine<SoftwareDriver> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    let document = load_isf(&path).expect("load fixture");
    Engine::new(
        SoftwareDriver::new(),
        document.descriptor,
        program,
        EngineConfig::default(),
    )
    .expect("create engine")
}

fn bench_software_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_frame");
    group.sample_size(50);

    let mut downsample = fixture_engine(
        "two_pass_downsample.fs",
        SoftwareProgram::new(|fragment| {
            if fragment.scalar("PASSINDEX") == 0.0 {
                [fragment.norm[0], fragment.norm[1], 0.0, 1.0]
            } else {
                fragment.sample("halfRes", fragment.norm)
            }
        }),
    );
    group.bench_function("software_two_pass_256", |b| {
        let request = FrameRequest::new(Size::new(256, 256), 0.0);
        b.iter(|| black_box(downsample.render_frame(&request).expect("render")));
    });

    let mut feedback = fixture_engine(
        "feedback_trails.fs",
        SoftwareProgram::new(|fragment| {
            let stale = fragment.sample("trails", fragment.norm);
            stale.map(|channel| channel * fragment.scalar("decay") + 0.01)
        }),
    );
    group.bench_function("software_feedback_256", |b| {
        let request = FrameRequest::new(Size::new(256, 256), 0.0)
            .with_input("decay", InputValue::Float(0.95));
        b.iter(|| black_box(feedback.render_frame(&request).expect("render")));
    });

    // Resizing every frame forces reallocation of every buffer.
    let mut resizing = fixture_engine(
        "dynamic_blur.fs",
        SoftwareProgram::new(|fragment| [fragment.norm[0], 0.0, 0.0, 1.0]),
    );
    let mut level = 1.0_f32;
    group.bench_function("software_resize_each_frame_128", |b| {
        b.iter(|| {
            level = if level >= 8.0 { 1.0 } else { level + 1.0 };
            let request = FrameRequest::new(Size::new(128, 128), 0.0)
                .with_input("blurLevel", InputValue::Float(level));
            black_box(resizing.render_frame(&request).expect("render"))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_software_frames);
criterion_main!(benches);
