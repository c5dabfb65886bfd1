//! Frame pool contract, benchmark runner degenerate results and thread safety.

use arbench_core::benchmark::{BenchmarkRunner, RunnerDeps, DEGENERATE_OUTPUT};
use arbench_core::config::{BenchConfig, MetricsDisplay, VisualizationMode};
use arbench_core::frame::Frame;
use arbench_core::pipeline::PipelineExecutor;
use arbench_core::pool::FramePool;
use arbench_core::runtime_adapter::{BackendKind, FsModelLoader, PaletteRenderer};
use arbench_core::session_manager::SessionManager;
use arbench_core::testing::{FixedAccelerators, MockSession, MockSessionFactory, ScriptedBatterySensor, StaticProbe};
use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_public_types_are_thread_safe() {
    assert_send_sync::<SessionManager>();
    assert_send_sync::<PipelineExecutor>();
    assert_send_sync::<FramePool>();
    assert_send_sync::<BenchmarkRunner>();
}

#[test]
fn test_pool_overflow_and_foreign_release() {
    let pool = FramePool::new(3, 16, 9);
    let frames: Vec<Frame> = (0..10).map(|_| pool.acquire()).collect();
    assert!(frames.iter().all(|f| f.dimensions() == (16, 9)));
    assert_eq!(frames.iter().filter(|f| f.is_pooled()).count(), 3);

    pool.release(Frame::new(16, 9));
    pool.release(Frame::new(2, 2));
    assert_eq!(pool.in_use_count(), 3);

    for frame in frames {
        pool.release(frame);
    }
    assert_eq!(pool.in_use_count(), 0);
    assert!(pool.acquire().is_pooled());
}

#[test]
fn test_pool_shared_across_threads() {
    let pool = Arc::new(FramePool::new(4, 8, 8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let frame = pool.acquire();
                    pool.release(frame);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(pool.in_use_count(), 0);
}

fn runner(config: BenchConfig, models_dir: &std::path::Path, factory: MockSessionFactory) -> BenchmarkRunner {
    BenchmarkRunner::new(
        config,
        RunnerDeps {
            loader: Arc::new(FsModelLoader::new(models_dir)),
            factory: Arc::new(factory),
            accelerators: Arc::new(FixedAccelerators::nnapi()),
            probe: Arc::new(StaticProbe::new(4)),
            sensor: Arc::new(ScriptedBatterySensor::with_temperatures(&[28.0])),
            renderer: Arc::new(PaletteRenderer::default()),
        },
    )
}

#[test]
fn test_configuration_errors_are_degenerate() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("seg.onnx"), b"stub").unwrap();

    let cases = [
        BenchConfig::new().with_resolution(4, 4),
        BenchConfig::new().with_model("x").with_resolution(4, 4),
        BenchConfig::new().with_model("seg.bin").with_resolution(4, 4),
        BenchConfig::new().with_model("missing.onnx").with_resolution(4, 4),
        BenchConfig::new().with_model("seg.onnx"),
    ];
    for config in cases {
        let out = runner(config, dir.path(), MockSessionFactory::new()).run(&Frame::new(4, 4));
        assert!(out.is_degenerate());
        assert_eq!(out.outputs.len(), 1);
        assert_eq!(out.outputs[DEGENERATE_OUTPUT].dimensions(), (1, 1));
        assert_eq!(out.frame_latency_ms, 0.0);
        assert!(out.metrics.is_none());
    }
}

#[test]
fn test_inference_failure_is_degenerate_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("seg.onnx"), b"stub").unwrap();
    let session = Arc::new(MockSession::new("image", "logits").failing_on_calls(&[1]));
    let factory = MockSessionFactory::new().with_session(BackendKind::Accelerated, session);
    let runner = runner(
        BenchConfig::new().with_model("seg.onnx").with_resolution(4, 4),
        dir.path(),
        factory,
    );

    assert!(runner.run(&Frame::new(4, 4)).is_degenerate());
    let out = runner.run(&Frame::new(4, 4));
    assert!(!out.is_degenerate());
    assert!(out.outputs.contains_key("logits"));
}

#[test]
fn test_argmax_rendering_and_metric_lines() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("seg.onnx"), b"stub").unwrap();
    let mut logits = ArrayD::zeros(IxDyn(&[1, 4, 2, 2]));
    logits[IxDyn(&[0, 3, 1, 1])] = 5.0;
    let session = Arc::new(MockSession::new("image", "logits").with_output(logits));
    let factory = MockSessionFactory::new().with_session(BackendKind::Accelerated, session);

    let config = BenchConfig::new()
        .with_model("seg.onnx")
        .with_resolution(2, 2)
        .with_visualization("logits", VisualizationMode::ArgmaxColor);
    let out = runner(config, dir.path(), factory).run(&Frame::new(2, 2));

    let image = out.outputs["logits"].image();
    assert_ne!(image.get_pixel(1, 1), image.get_pixel(0, 0));
    let lines = out.metric_lines(&MetricsDisplay::all());
    assert_eq!(lines.len(), 11);
    assert!(lines[0].starts_with("Runtime: "));
}
