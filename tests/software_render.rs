mod common;

use std::fs;

use common::fixture;
use image::{Rgba, RgbaImage};
use isf_engine::engine::FrameRequest;
use isf_engine::error::EngineError;
use isf_engine::inputs::{ImageSource, InputValue};
use isf_engine::schema::Size;
use isf_engine::software::{SoftwareDriver, SoftwareProgram};
use isf_engine::{load_isf, parse_isf, Engine, EngineConfig};

fn software_engine(
    descriptor: isf_engine::schema::Descriptor,
    program: SoftwareProgram,
) -> Engine<SoftwareDriver> {
    Engine::new(SoftwareDriver::new(), descriptor, program, EngineConfig::default())
        .expect("engine should build")
}

fn red_channel(engine: &Engine<SoftwareDriver>, frame: &isf_engine::RenderedFrame) -> Vec<u8> {
    let texture = engine.texture(&frame.output).expect("output texture");
    let image = engine.driver().to_rgba8(texture);
    image.pixels().map(|pixel| pixel.0[0]).collect()
}

#[test]
fn half_resolution_pass_is_upscaled_into_the_output() {
    let document = load_isf(&fixture("two_pass_downsample.fs")).expect("fixture loads");
    let program = SoftwareProgram::new(|fragment| {
        if fragment.scalar("PASSINDEX") == 0.0 {
            [fragment.norm[0], 0.0, 0.0, 1.0]
        } else {
            fragment.sample("halfRes", fragment.norm)
        }
    });
    let mut engine = software_engine(document.descriptor, program);

    let rendered = engine
        .render_frame(&FrameRequest::new(Size::new(4, 2), 0.0))
        .expect("frame renders");
    assert_eq!(rendered.size, Size::new(4, 2));
    // halfRes is 2x1: columns at norm 0.25 and 0.75, each covering two output columns.
    assert_eq!(red_channel(&engine, &rendered), vec![64, 64, 191, 191, 64, 64, 191, 191]);
    assert_eq!(engine.driver().passes_executed(), 2);
}

#[test]
fn float_persistent_buffer_accumulates_past_one() {
    let descriptor = parse_isf(
        r#"/*{
            "PASSES": [
                { "TARGET": "accumulator", "PERSISTENT": true, "FLOAT": true },
                { }
            ]
        }*/"#,
    )
    .expect("descriptor parses")
    .descriptor;
    let program = SoftwareProgram::new(|fragment| {
        let previous = fragment.sample("accumulator", fragment.norm);
        if fragment.scalar("PASSINDEX") == 0.0 {
            [previous[0] + 0.25, 0.0, 0.0, 1.0]
        } else {
            [previous[0] / 4.0, 0.0, 0.0, 1.0]
        }
    });
    let mut engine = software_engine(descriptor, program);

    let mut last = None;
    for _ in 0..5 {
        last = Some(
            engine
                .render_frame(&FrameRequest::new(Size::new(2, 2), 0.0))
                .expect("frame renders"),
        );
    }
    let rendered = last.expect("rendered");
    // 5 * 0.25 = 1.25 survives in the float buffer; the output shows a quarter of it.
    assert_eq!(red_channel(&engine, &rendered), vec![80; 4]);
}

#[test]
fn imported_images_are_sampled_by_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let logo = RgbaImage::from_fn(2, 2, |x, y| Rgba([(x * 100) as u8, (y * 100) as u8, 7, 255]));
    logo.save(dir.path().join("logo.png")).expect("png written");
    let shader = dir.path().join("logo.fs");
    fs::write(
        &shader,
        r#"/*{ "IMPORTED": { "logo": { "PATH": "logo.png" } } }*/
void main() { gl_FragColor = IMG_THIS_PIXEL(logo); }
"#,
    )
    .expect("shader written");

    let document = load_isf(&shader).expect("shader loads");
    let program = SoftwareProgram::new(|fragment| fragment.sample("logo", fragment.norm));
    let mut engine = software_engine(document.descriptor, program);

    let before = engine
        .render_frame(&FrameRequest::new(Size::new(2, 2), 0.0))
        .expect("frame renders without the image");
    assert_eq!(red_channel(&engine, &before), vec![0; 4], "not loaded yet, not bound");

    engine.load_imported_images().expect("images load");
    let rendered = engine
        .render_frame(&FrameRequest::new(Size::new(2, 2), 0.0))
        .expect("frame renders");
    let texture = engine.texture(&rendered.output).expect("output texture");
    assert_eq!(engine.driver().to_rgba8(texture), logo);
}

#[test]
fn registered_host_images_feed_image_inputs() {
    let descriptor = parse_isf(
        r#"/*{ "INPUTS": [ { "NAME": "inputImage", "TYPE": "image" } ] }*/"#,
    )
    .expect("descriptor parses")
    .descriptor;
    let program = SoftwareProgram::new(|fragment| {
        let [r, g, b, a] = fragment.sample("inputImage", fragment.norm);
        [1.0 - r, 1.0 - g, 1.0 - b, a]
    });
    let mut engine = software_engine(descriptor, program);
    let request = FrameRequest::new(Size::new(1, 1), 0.0).with_input(
        "inputImage",
        InputValue::Image(ImageSource::External("camera".to_owned())),
    );

    let error = engine.render_frame(&request).expect_err("camera is not registered");
    assert!(matches!(
        &error,
        EngineError::UnknownReference { name, .. } if name == "camera"
    ));

    engine
        .register_image("camera", &RgbaImage::from_pixel(1, 1, Rgba([255, 0, 55, 255])))
        .expect("image registers");
    let rendered = engine.render_frame(&request).expect("frame renders");
    let texture = engine.texture(&rendered.output).expect("output texture");
    assert_eq!(
        engine.driver().to_rgba8(texture).get_pixel(0, 0),
        &Rgba([0, 255, 200, 255])
    );

    assert!(engine.unregister_image("camera"));
    assert!(engine.render_frame(&request).is_err());
}
