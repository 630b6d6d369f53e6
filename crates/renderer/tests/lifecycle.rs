use std::path::PathBuf;
use std::sync::Arc;

use catalog::{DirectorySource, ParamValue, ShaderRegistry, ShaderSourceProvider};
use layerconfig::{LayerConfig, RenderConfig};
use renderer::{
    run_loop_for, Call, CompositingRenderer, ConfigHandle, FixedTimeSource, FrameOutcome,
    FramePacer, RecordingBackend, RendererState, StopSignal, UniformValue,
};

fn bundled() -> (Arc<dyn ShaderSourceProvider>, Vec<catalog::ShaderDescriptor>) {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../shaders");
    let provider: Arc<dyn ShaderSourceProvider> = Arc::new(DirectorySource::new(dir));
    let mut registry = ShaderRegistry::new(Arc::clone(&provider));
    let descriptors = registry.discover().unwrap().to_vec();
    (provider, descriptors)
}

fn renderer_for(config: RenderConfig) -> CompositingRenderer<RecordingBackend> {
    let (provider, descriptors) = bundled();
    CompositingRenderer::new(RecordingBackend::new(), provider, ConfigHandle::new(config))
        .with_shaders(descriptors)
        .with_time_source(Box::new(FixedTimeSource::new(1.5)))
}

fn three_layers() -> RenderConfig {
    let mut config = RenderConfig::default();
    config.layers = vec![
        LayerConfig::new("vignette", 2),
        LayerConfig::new("rain", 0).with_param("u_speed", ParamValue::Float(2.5)),
        LayerConfig::new("snow", 1),
    ];
    config
}

#[test]
fn bundled_layers_render_end_to_end() {
    let mut renderer = renderer_for(three_layers());
    renderer.create().unwrap();
    renderer.resize(320, 200);
    assert_eq!(renderer.state(), RendererState::Sized);

    let outcome = renderer.draw_frame().unwrap();
    let FrameOutcome::Presented(stats) = outcome else {
        panic!("frame not presented: {outcome:?}");
    };
    assert_eq!(stats.layers_drawn, 3);
    assert_eq!(stats.layers_skipped, 0);
    assert_eq!(renderer.state(), RendererState::Rendering);

    let calls = renderer.backend().calls();
    assert!(calls.contains(&Call::SetUniform {
        program: calls.iter().rev().find_map(|call| match call {
            Call::UseProgram(program) => Some(*program),
            _ => None,
        }),
        name: "u_layerCount".into(),
        value: UniformValue::Int(3),
    }));
    assert!(calls.iter().any(|call| matches!(
        call,
        Call::SetUniform { name, value: UniformValue::Float(speed), .. }
            if name == "u_speed" && *speed == 2.5
    )));
    assert!(calls.iter().any(|call| matches!(
        call,
        Call::SetUniform { name, value: UniformValue::Int(1), .. } if name == "u_glow"
    )));
}

#[test]
fn render_loop_releases_everything() {
    let mut renderer = renderer_for(three_layers());
    renderer.create().unwrap();
    renderer.resize(64, 64);

    let mut pacer = FramePacer::new(10_000.0);
    let frames = run_loop_for(&mut renderer, &mut pacer, &StopSignal::new(), Some(4)).unwrap();
    assert_eq!(frames, 4);
    assert_eq!(renderer.state(), RendererState::Released);
    assert_eq!(renderer.backend().live_objects(), 0);
    assert_eq!(renderer.backend().frames_presented(), 4);
}

#[test]
fn stop_signal_ends_loop_before_drawing() {
    let mut renderer = renderer_for(three_layers());
    renderer.create().unwrap();
    renderer.resize(64, 64);

    let stop = StopSignal::new();
    stop.request_stop();
    let frames = run_loop_for(&mut renderer, &mut FramePacer::default(), &stop, None).unwrap();
    assert_eq!(frames, 0);
    assert_eq!(renderer.state(), RendererState::Released);
}

#[test]
fn published_config_applies_between_frames() {
    let mut renderer = renderer_for(three_layers());
    renderer.create().unwrap();
    renderer.resize(64, 64);
    renderer.draw_frame().unwrap();

    let handle = renderer.config_handle().clone();
    std::thread::spawn(move || {
        let mut config = RenderConfig::default();
        config.layers.push(LayerConfig::new("snow", 0));
        handle.publish(config);
    })
    .join()
    .unwrap();

    match renderer.draw_frame().unwrap() {
        FrameOutcome::Presented(stats) => assert_eq!(stats.layers_drawn, 1),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(renderer.targets().len(), 1);
}

#[test]
fn unknown_layer_shader_is_skipped() {
    let mut config = three_layers();
    config.layers.push(LayerConfig::new("aurora", 3));
    let mut renderer = renderer_for(config);
    renderer.create().unwrap();
    renderer.resize(64, 64);

    match renderer.draw_frame().unwrap() {
        FrameOutcome::Presented(stats) => {
            assert_eq!(stats.layers_drawn, 3);
            assert_eq!(stats.layers_skipped, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn integer_config_value_drives_float_parameter() {
    let config = RenderConfig::from_toml_str(
        "version = 1\n[[layers]]\nshader = \"rain\"\nparams = { u_speed = 2 }\n",
    )
    .unwrap();
    let mut renderer = renderer_for(config);
    renderer.create().unwrap();
    renderer.resize(64, 64);
    renderer.draw_frame().unwrap();

    let speeds: Vec<_> = renderer
        .backend()
        .calls()
        .iter()
        .filter_map(|call| match call {
            Call::SetUniform { name, value, .. } if name == "u_speed" => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(speeds, vec![UniformValue::Float(2.0)]);
}
