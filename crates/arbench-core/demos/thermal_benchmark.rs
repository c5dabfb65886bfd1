//! Thermal backend switching on a simulated warming device.
//!
//! Runs a camera-mode benchmark with mock sessions while a scripted sensor
//! heats past the threshold and cools down again, printing the active
//! backend per frame and each reported metrics window.
//!
//! Run with: `cargo run -p arbench-core --example thermal_benchmark`

use arbench_core::benchmark::{BenchmarkRunner, RunnerDeps};
use arbench_core::config::{BenchConfig, MetricsDisplay};
use arbench_core::error::BenchResult;
use arbench_core::frame::Frame;
use arbench_core::runtime_adapter::{BackendKind, ModelLoader, ModelSource, PaletteRenderer};
use arbench_core::testing::{FixedAccelerators, MockSession, MockSessionFactory, ScriptedBatterySensor, StaticProbe};
use std::sync::Arc;
use std::time::Duration;

struct InMemoryModels;

impl ModelLoader for InMemoryModels {
    fn resolve(&self, model_ref: &str) -> BenchResult<ModelSource> {
        Ok(ModelSource::new(model_ref, format!("memory://{}", model_ref))?)
    }
}

fn main() {
    println!("Thermal Backend Switching Demo");
    println!("{}", "=".repeat(60));

    // Accelerated frames are faster than CPU frames.
    let factory = MockSessionFactory::new()
        .with_session(
            BackendKind::Accelerated,
            Arc::new(MockSession::new("image", "mask").with_delay(Duration::from_millis(8))),
        )
        .with_session(
            BackendKind::Cpu,
            Arc::new(MockSession::new("image", "mask").with_delay(Duration::from_millis(20))),
        );

    let temps: Vec<f32> = [30.0, 32.0, 34.0, 36.0, 38.0, 37.0, 35.5, 34.0, 32.0, 31.0]
        .iter()
        .flat_map(|t| [*t, *t])
        .collect();
    let sensor = Arc::new(ScriptedBatterySensor::with_temperatures(&temps));

    let config = BenchConfig::new()
        .with_model("segmenter.onnx")
        .with_resolution(64, 64)
        .with_thermal_threshold(35.0)
        .with_camera_mode(5, 10.0);

    let runner = BenchmarkRunner::new(
        config,
        RunnerDeps {
            loader: Arc::new(InMemoryModels),
            factory: Arc::new(factory),
            accelerators: Arc::new(FixedAccelerators::nnapi()),
            probe: Arc::new(StaticProbe::new(8)),
            sensor,
            renderer: Arc::new(PaletteRenderer::default()),
        },
    );

    let frame = Frame::filled(128, 96, [40, 120, 200, 255]);
    for i in 0..20 {
        let out = runner.run(&frame);
        if let Some(reason) = &out.failure {
            println!("frame {:2}: failed: {}", i, reason);
            continue;
        }
        println!(
            "frame {:2}: {:>11} {:6.2} ms",
            i,
            out.backend.map(|b| b.to_string()).unwrap_or_default(),
            out.frame_latency_ms
        );
        for line in out.metric_lines(&MetricsDisplay::all()) {
            println!("    {}", line);
        }
    }

    runner.shutdown();
}
