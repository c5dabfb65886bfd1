//! Pipelined versus sequential split-model execution.
//!
//! Uses sleeping mock sessions so the numbers reflect scheduling overlap,
//! not model kernels.
//!
//! ```bash
//! cargo bench -p arbench-core --bench pipeline_overlap
//! ```

use arbench_core::config::BenchConfig;
use arbench_core::frame::Frame;
use arbench_core::pipeline::{FrameResult, PipelineExecutor, PipelineListener};
use arbench_core::runtime_adapter::{BackendKind, InferenceSession, ModelSession, TensorMap};
use arbench_core::testing::{MockSession, ScriptedBatterySensor, StaticProbe};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crossbeam_channel::{unbounded, Sender};
use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;
use std::time::Duration;

const ENCODER_MS: u64 = 4;
const DECODER_MS: u64 = 6;
const SIDE: u32 = 16;

struct Done(Sender<()>);

impl PipelineListener for Done {
    fn on_frame_result(&self, _frame: &Frame, _result: FrameResult) {
        let _ = self.0.send(());
    }
}

fn sleeping(input: &str, output: &str, ms: u64) -> Arc<MockSession> {
    Arc::new(MockSession::new(input, output).with_delay(Duration::from_millis(ms)))
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_model");
    group.sample_size(10);

    for frames in [4usize, 16] {
        let (tx, rx) = unbounded();
        let executor = PipelineExecutor::builder(Arc::new(BenchConfig::new().with_resolution(SIDE, SIDE)))
            .telemetry(
                Arc::new(StaticProbe::new(4)),
                Arc::new(ScriptedBatterySensor::with_temperatures(&[30.0])),
            )
            .encoder(InferenceSession::new(BackendKind::Cpu, sleeping("image", "features", ENCODER_MS)))
            .decoder("a", InferenceSession::new(BackendKind::Cpu, sleeping("features", "a", DECODER_MS)))
            .decoder("b", InferenceSession::new(BackendKind::Cpu, sleeping("features", "b", DECODER_MS)))
            .listener(Arc::new(Done(tx)))
            .build()
            .expect("pipeline");
        executor.start_monitoring().expect("monitoring");

        group.bench_with_input(BenchmarkId::new("pipelined", frames), &frames, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    executor.queue_run(Frame::new(SIDE, SIDE)).expect("queue");
                }
                for _ in 0..n {
                    rx.recv().expect("result");
                }
            })
        });

        let encoder = sleeping("image", "features", ENCODER_MS);
        let decoders = [sleeping("features", "a", DECODER_MS), sleeping("features", "b", DECODER_MS)];
        group.bench_with_input(BenchmarkId::new("sequential", frames), &frames, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    let mut inputs = TensorMap::new();
                    inputs.insert("image".to_string(), ArrayD::zeros(IxDyn(&[1, 3, SIDE as usize, SIDE as usize])));
                    let mut encoded = encoder.run(inputs).expect("encode");
                    let features = encoded.remove("features").expect("features");
                    for decoder in &decoders {
                        let mut inputs = TensorMap::new();
                        inputs.insert("features".to_string(), features.clone());
                        black_box(decoder.run(inputs).expect("decode"));
                    }
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
