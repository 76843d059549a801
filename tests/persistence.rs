mod common;

use common::engine;
use isf_engine::engine::FrameRequest;
use isf_engine::error::EngineError;
use isf_engine::inputs::{ImageSource, InputValue};
use isf_engine::schema::Size;

const FEEDBACK: &str = r#"/*{
    "INPUTS": [ { "NAME": "width", "TYPE": "float", "DEFAULT": 8 } ],
    "PASSES": [
        { "TARGET": "trail", "PERSISTENT": true, "WIDTH": "$width", "HEIGHT": 8 },
        { }
    ]
}*/"#;

fn frame() -> FrameRequest {
    FrameRequest::new(Size::new(16, 16), 0.0)
}

#[test]
fn persistent_content_carries_into_the_next_frame() {
    let mut engine = engine(FEEDBACK);
    for _ in 0..3 {
        engine.render_frame(&frame()).expect("frame renders");
    }

    let executions = &engine.driver().executions;
    let trail_reads = executions
        .iter()
        .filter(|execution| execution.pass_index == 0)
        .map(|execution| execution.sampled("trail").map(str::to_owned))
        .collect::<Vec<_>>();
    assert_eq!(
        trail_reads,
        vec![
            Some("undefined".to_owned()),
            Some("p0f0".to_owned()),
            Some("p0f1".to_owned()),
        ],
        "the feedback pass reads the previous frame's write"
    );

    let output_reads = executions
        .iter()
        .filter(|execution| execution.pass_index == 1)
        .map(|execution| execution.sampled("trail").map(str::to_owned))
        .collect::<Vec<_>>();
    assert_eq!(
        output_reads,
        vec![
            Some("p0f0".to_owned()),
            Some("p0f1".to_owned()),
            Some("p0f2".to_owned()),
        ]
    );
}

#[test]
fn persistent_pass_never_writes_the_texture_it_samples() {
    let mut engine = engine(FEEDBACK);
    for _ in 0..2 {
        engine.render_frame(&frame()).expect("frame renders");
    }
    let targets = engine
        .driver()
        .executions
        .iter()
        .filter(|execution| execution.pass_index == 0)
        .map(|execution| execution.target_id)
        .collect::<Vec<_>>();
    assert_ne!(targets[0], targets[1], "front and back alternate");
}

#[test]
fn resizing_a_persistent_buffer_discards_its_content() {
    let mut engine = engine(FEEDBACK);
    engine.render_frame(&frame()).expect("frame renders");
    let before = engine.buffer_info();

    let resized = frame().with_input("width", InputValue::Float(4.0));
    engine.render_frame(&resized).expect("frame renders");
    let after = engine.buffer_info();

    let generation = |infos: &[isf_engine::buffers::BufferInfo]| {
        infos
            .iter()
            .find(|info| info.key.name() == Some("trail"))
            .map(|info| (info.size, info.generation))
            .expect("trail exists")
    };
    let (old_size, old_generation) = generation(&before);
    let (new_size, new_generation) = generation(&after);
    assert_eq!(old_size, Size::new(8, 8));
    assert_eq!(new_size, Size::new(4, 8));
    assert_ne!(old_generation, new_generation);

    let last_feedback_read = engine
        .driver()
        .executions
        .iter()
        .rfind(|execution| execution.pass_index == 0)
        .and_then(|execution| execution.sampled("trail"))
        .map(str::to_owned);
    assert_eq!(last_feedback_read.as_deref(), Some("undefined"));
}

#[test]
fn reading_a_non_persistent_buffer_before_its_pass_is_an_error() {
    let mut engine = engine(
        r#"/*{
            "INPUTS": [ { "NAME": "inputImage", "TYPE": "image" } ],
            "PASSES": [ { "TARGET": "early" }, { "TARGET": "late" }, { } ]
        }*/"#,
    );
    let request = frame().with_input(
        "inputImage",
        InputValue::Image(ImageSource::Buffer("late".to_owned())),
    );

    let error = engine.render_frame(&request).expect_err("late is unwritten in pass 0");
    assert!(matches!(
        &error,
        EngineError::UnwrittenBuffer { pass_index: 0, buffer } if buffer == "late"
    ));
    assert!(engine.driver().executions.is_empty());

    // Nor can a pass sample its own single-buffered target.
    let own_target = frame().with_input(
        "inputImage",
        InputValue::Image(ImageSource::Buffer("early".to_owned())),
    );
    let error = engine.render_frame(&own_target).expect_err("early is unwritten in its own pass");
    assert!(matches!(error, EngineError::UnwrittenBuffer { pass_index: 0, .. }));
}

#[test]
fn stale_non_persistent_buffers_are_not_implicitly_visible() {
    let mut engine = engine(
        r#"/*{ "PASSES": [ { "TARGET": "a" }, { "TARGET": "b" }, { } ] }*/"#,
    );
    engine.render_frame(&frame()).expect("frame 0 renders");
    engine.render_frame(&frame()).expect("frame 1 renders");

    let executions = &engine.driver().executions;
    let frame_one = &executions[3..];
    assert_eq!(frame_one[0].sampler_names(), Vec::<&str>::new());
    assert_eq!(frame_one[1].sampler_names(), vec!["a"]);
    assert_eq!(frame_one[2].sampler_names(), vec!["a", "b"]);
    assert_eq!(frame_one[2].sampled("b"), Some("p1f1"));
}

#[test]
fn persistent_forward_reference_reads_the_previous_frame() {
    let mut engine = engine(
        r#"/*{
            "INPUTS": [ { "NAME": "inputImage", "TYPE": "image" } ],
            "PASSES": [
                { "TARGET": "composite" },
                { "TARGET": "history", "PERSISTENT": true, "WIDTH": 4, "HEIGHT": 4 },
                { }
            ]
        }*/"#,
    );
    let request = frame().with_input(
        "inputImage",
        InputValue::Image(ImageSource::Buffer("history".to_owned())),
    );
    engine.render_frame(&request).expect("frame 0 renders");
    engine.render_frame(&request).expect("frame 1 renders");

    let executions = &engine.driver().executions;
    assert_eq!(executions[0].sampled("inputImage"), Some("undefined"));
    assert_eq!(executions[3].sampled("inputImage"), Some("p1f0"));
    assert_eq!(
        executions[3].uniforms.get("_inputImage_imgSize"),
        Some(isf_engine::uniforms::UniformValue::Vec2([4.0, 4.0])),
        "sampled at the owning pass's size"
    );
}

#[test]
fn failed_write_keeps_the_previous_persistent_content() {
    let mut engine = engine(FEEDBACK);
    engine.render_frame(&frame()).expect("frame 0 renders");

    engine.driver_mut().fail_on_pass = Some(0);
    engine.render_frame(&frame()).expect_err("frame 1 fails");
    engine.driver_mut().fail_on_pass = None;

    engine.render_frame(&frame()).expect("frame 1 retried");
    let last_feedback_read = engine
        .driver()
        .executions
        .iter()
        .rfind(|execution| execution.pass_index == 0)
        .and_then(|execution| execution.sampled("trail"))
        .map(str::to_owned);
    assert_eq!(last_feedback_read.as_deref(), Some("p0f0"));
}

#[test]
fn failed_frame_restores_the_last_completed_persistent_content() {
    let mut engine = engine(FEEDBACK);
    engine.render_frame(&frame()).expect("frame 0 renders");

    // trail is written by pass 0, then the output pass fails.
    engine.driver_mut().fail_on_pass = Some(1);
    engine.render_frame(&frame()).expect_err("frame 1 fails");
    engine.driver_mut().fail_on_pass = None;
    assert_eq!(engine.driver().executions[3].sampled("trail"), Some("p0f1"));

    engine.render_frame(&frame()).expect("frame 1 retried");
    let retry = &engine.driver().executions[4..];
    assert_eq!(retry[0].sampled("trail"), Some("p0f0"));
    assert_eq!(retry[1].sampled("trail"), Some("p0f1"));
    assert_eq!(engine.frame_index(), 2);
}
