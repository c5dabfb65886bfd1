//! Two-stage pipelined executor.
//!
//! ```text
//!  run / queue_run          ┌─────────┐  handoff (1)  ┌─────────┐   ┌─ branch 0
//! ───────────────────────▶  │ encoder │ ────────────▶ │ decoder │ ──┼─ branch 1
//!      submissions (1)      └─────────┘  stamps (1)   └─────────┘   └─ branch N-1
//! ```
//!
//! The encoder thread may run at most one frame ahead of the decoder thread.
//! Once the encoder is blocked on a full handoff slot and one submission is
//! waiting, `run` and `queue_run` block the caller.
//! Monitoring commands travel the same path as frames, so `stop_monitoring`
//! observes every frame submitted before it. Only the decoder thread touches
//! the telemetry collector.

use super::fanout::DecoderPool;
use super::listener::{FrameResult, PipelineListener, StageTimestamps};
use super::priority::StagePriority;
use crate::config::BenchConfig;
use crate::device::{BatterySensor, CpuClock, HardwareProbe, SysfsBatterySensor, SystemProbe};
use crate::error::{BenchResult, ConfigError, PipelineError, TelemetryError};
use crate::frame::Frame;
use crate::pool::FramePool;
use crate::runtime_adapter::{FrameEncoder, InferenceSession, NchwEncoder, TensorMap};
use crate::telemetry::{FrameTiming, RunMetrics, TelemetryCollector};
use crossbeam_channel::{bounded, Receiver, Sender};
use ndarray::ArrayD;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

enum Completion {
    Reply(Sender<FrameResult>),
    Listener(Arc<dyn PipelineListener>),
}

struct FrameJob {
    sequence: u64,
    frame: Frame,
    submitted: Instant,
    completion: Completion,
}

enum Control {
    StartMonitoring(Sender<Result<(), TelemetryError>>),
    StopMonitoring(Sender<Result<RunMetrics, TelemetryError>>),
}

enum Submission {
    Frame(FrameJob),
    Control(Control),
}

enum Handoff {
    Frame {
        job: FrameJob,
        encoded: Result<ArrayD<f32>, PipelineError>,
    },
    Control(Control),
}

/// Travels on the auxiliary timestamp channel next to each encoded frame.
#[derive(Clone, Copy)]
struct EncoderStamps {
    submitted: Instant,
    start: Instant,
    end: Instant,
}

struct Shared {
    config: RwLock<Arc<BenchConfig>>,
    monitoring: AtomicBool,
    pool: Option<Arc<FramePool>>,
}

impl Shared {
    fn config(&self) -> Arc<BenchConfig> {
        self.config
            .read()
            .map(|c| Arc::clone(&c))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    fn recycle(&self, frame: Frame) {
        if let Some(pool) = &self.pool {
            pool.release(frame);
        }
    }
}

/// Builder for [`PipelineExecutor`].
pub struct PipelineBuilder {
    config: Arc<BenchConfig>,
    encoder: Option<InferenceSession>,
    decoders: Vec<(String, InferenceSession)>,
    frame_encoder: Arc<dyn FrameEncoder>,
    probe: Option<Arc<dyn HardwareProbe>>,
    sensor: Option<Arc<dyn BatterySensor>>,
    pool: Option<Arc<FramePool>>,
    listener: Option<Arc<dyn PipelineListener>>,
    encoder_priority: StagePriority,
}

impl PipelineBuilder {
    fn new(config: Arc<BenchConfig>) -> Self {
        Self {
            config,
            encoder: None,
            decoders: Vec::new(),
            frame_encoder: Arc::new(NchwEncoder::new()),
            probe: None,
            sensor: None,
            pool: None,
            listener: None,
            encoder_priority: StagePriority::Elevated,
        }
    }

    pub fn encoder(mut self, session: InferenceSession) -> Self {
        self.encoder = Some(session);
        self
    }

    /// Add a decoder branch. Branch names must be unique.
    pub fn decoder(mut self, name: impl Into<String>, session: InferenceSession) -> Self {
        self.decoders.push((name.into(), session));
        self
    }

    pub fn frame_encoder(mut self, encoder: Arc<dyn FrameEncoder>) -> Self {
        self.frame_encoder = encoder;
        self
    }

    /// Hardware sources for telemetry. Defaults to the system probe and sysfs sensor.
    pub fn telemetry(mut self, probe: Arc<dyn HardwareProbe>, sensor: Arc<dyn BatterySensor>) -> Self {
        self.probe = Some(probe);
        self.sensor = Some(sensor);
        self
    }

    /// Return finished frames to this pool.
    pub fn frame_pool(mut self, pool: Arc<FramePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Callbacks for [`PipelineExecutor::queue_run`].
    pub fn listener(mut self, listener: Arc<dyn PipelineListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Scheduling priority of the encoder thread. Defaults to
    /// [`StagePriority::Elevated`].
    pub fn encoder_priority(mut self, priority: StagePriority) -> Self {
        self.encoder_priority = priority;
        self
    }

    pub fn build(self) -> BenchResult<PipelineExecutor> {
        let encoder = self
            .encoder
            .ok_or_else(|| ConfigError::Invalid("pipeline has no encoder session".to_string()))?;
        if self.decoders.is_empty() {
            return Err(ConfigError::NoDecoders.into());
        }
        for (i, (name, _)) in self.decoders.iter().enumerate() {
            if self.decoders[..i].iter().any(|(other, _)| other == name) {
                return Err(ConfigError::Invalid(format!("duplicate decoder branch '{}'", name)).into());
            }
        }

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemProbe::new()) as Arc<dyn HardwareProbe>);
        let sensor = self
            .sensor
            .unwrap_or_else(|| Arc::new(SysfsBatterySensor::new()) as Arc<dyn BatterySensor>);
        let collector = TelemetryCollector::with_cpu_clock(probe, sensor, CpuClock::Process);

        let shared = Arc::new(Shared {
            config: RwLock::new(self.config),
            monitoring: AtomicBool::new(false),
            pool: self.pool,
        });

        let branch_count = self.decoders.len();
        let decoders = DecoderPool::new(self.decoders)?;

        let (submit_tx, submit_rx) = bounded::<Submission>(1);
        let (handoff_tx, handoff_rx) = bounded::<Handoff>(1);
        let (stamps_tx, stamps_rx) = bounded::<EncoderStamps>(1);

        let encoder_stage = EncoderStage {
            session: encoder,
            frame_encoder: self.frame_encoder,
            shared: Arc::clone(&shared),
        };
        let encoder_priority = self.encoder_priority;
        let encoder_thread = std::thread::Builder::new()
            .name("arbench-encoder".to_string())
            .spawn(move || {
                encoder_priority.apply_or_warn("encoder");
                encoder_stage.run(submit_rx, handoff_tx, stamps_tx)
            })?;

        let decoder_stage = DecoderStage {
            decoders,
            collector,
            shared: Arc::clone(&shared),
        };
        let decoder_thread = std::thread::Builder::new()
            .name("arbench-decoder".to_string())
            .spawn(move || decoder_stage.run(handoff_rx, stamps_rx))?;

        log::info!("Pipeline started with {} decoder branches", branch_count);
        Ok(PipelineExecutor {
            submit: Mutex::new(Some(submit_tx)),
            threads: Mutex::new(vec![encoder_thread, decoder_thread]),
            next_sequence: AtomicU64::new(0),
            listener: self.listener,
            shared,
        })
    }
}

/// Overlaps the encoder for frame n+1 with the decoders for frame n.
///
/// Frames complete in submission order. In camera mode a frame that closes
/// a reporting window carries its [`RunMetrics`]; otherwise the caller
/// brackets frames with `start_monitoring`/`stop_monitoring`. Dropping the
/// executor waits for in-flight frames and joins its threads.
pub struct PipelineExecutor {
    submit: Mutex<Option<Sender<Submission>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_sequence: AtomicU64,
    listener: Option<Arc<dyn PipelineListener>>,
    shared: Arc<Shared>,
}

impl PipelineExecutor {
    pub fn builder(config: Arc<BenchConfig>) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    fn send(&self, submission: Submission) -> Result<(), PipelineError> {
        let guard = self.submit.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(PipelineError::Shutdown)?;
        tx.send(submission).map_err(|_| PipelineError::Shutdown)
    }

    /// Blocks while the submission slot is full. Sequence numbers follow
    /// the order frames enter the channel.
    fn submit_frame(&self, frame: Frame, completion: Completion) -> BenchResult<u64> {
        let guard = self.submit.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(PipelineError::Shutdown)?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        tx.send(Submission::Frame(FrameJob {
            sequence,
            frame,
            submitted: Instant::now(),
            completion,
        }))
        .map_err(|_| PipelineError::Shutdown)?;
        Ok(sequence)
    }

    /// Hand the frame back if it may enter the pipeline.
    fn admit(&self, frame: Frame, call: &str) -> BenchResult<Option<Frame>> {
        if self.is_shutdown() {
            return Err(PipelineError::Shutdown.into());
        }
        if self.shared.monitoring.load(Ordering::Acquire) {
            return Ok(Some(frame));
        }
        log::error!("{}() called before start_monitoring(); ignoring frame", call);
        self.shared.recycle(frame);
        Ok(None)
    }

    /// Run one frame through both stages and wait for it.
    ///
    /// Returns `Ok(None)` without running anything if monitoring has not
    /// been started. A failed frame is reported through
    /// [`FrameResult::outcome`].
    pub fn run(&self, frame: Frame) -> BenchResult<Option<FrameResult>> {
        let Some(frame) = self.admit(frame, "run")? else {
            return Ok(None);
        };
        let (tx, rx) = bounded(1);
        self.submit_frame(frame, Completion::Reply(tx))?;
        let result = rx.recv().map_err(|_| PipelineError::Shutdown)?;
        Ok(Some(result))
    }

    /// Submit a frame and return its sequence number.
    ///
    /// Returns as soon as the frame is queued for the encoder, blocking
    /// while the encoder is still behind on an earlier submission. The
    /// configured listener gets `on_ready_for_next_frame` once the encoder
    /// is done with it and `on_frame_result` when decoding finishes. A
    /// single producer may submit its next frame from
    /// `on_ready_for_next_frame`.
    pub fn queue_run(&self, frame: Frame) -> BenchResult<Option<u64>> {
        let listener = self.listener.clone().ok_or_else(|| {
            ConfigError::Invalid("queue_run needs a pipeline listener".to_string())
        })?;
        let Some(frame) = self.admit(frame, "queue_run")? else {
            return Ok(None);
        };
        self.submit_frame(frame, Completion::Listener(listener)).map(Some)
    }

    pub fn start_monitoring(&self) -> BenchResult<()> {
        let (tx, rx) = bounded(1);
        self.send(Submission::Control(Control::StartMonitoring(tx)))?;
        let result = rx.recv().map_err(|_| PipelineError::Shutdown)?;
        Ok(result?)
    }

    /// Close the monitoring window after every frame submitted so far.
    pub fn stop_monitoring(&self) -> BenchResult<RunMetrics> {
        let (tx, rx) = bounded(1);
        self.send(Submission::Control(Control::StopMonitoring(tx)))?;
        let result = rx.recv().map_err(|_| PipelineError::Shutdown)?;
        Ok(result?)
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::Acquire)
    }

    pub fn config(&self) -> Arc<BenchConfig> {
        self.shared.config()
    }

    /// Swap in a new configuration; frames encoded afterwards use it.
    pub fn reconfigure(&self, config: Arc<BenchConfig>) {
        match self.shared.config.write() {
            Ok(mut c) => *c = config,
            Err(e) => *e.into_inner() = config,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.submit.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    /// Finish in-flight frames and join the stage threads.
    ///
    /// Later calls return [`PipelineError::Shutdown`].
    pub fn shutdown(&self) {
        let sender = self.submit.lock().unwrap_or_else(|e| e.into_inner()).take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        let threads: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in threads {
            if handle.join().is_err() {
                log::error!("Pipeline stage thread panicked");
            }
        }
        log::info!("Pipeline shut down");
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("submitted", &self.next_sequence.load(Ordering::Relaxed))
            .field("monitoring", &self.is_monitoring())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

struct EncoderStage {
    session: InferenceSession,
    frame_encoder: Arc<dyn FrameEncoder>,
    shared: Arc<Shared>,
}

impl EncoderStage {
    fn run(self, submissions: Receiver<Submission>, handoff: Sender<Handoff>, stamps: Sender<EncoderStamps>) {
        for submission in submissions {
            let job = match submission {
                Submission::Control(control) => {
                    if handoff.send(Handoff::Control(control)).is_err() {
                        break;
                    }
                    continue;
                }
                Submission::Frame(job) => job,
            };

            let start = Instant::now();
            let encoded = self.encode(&job.frame);
            let end = Instant::now();
            log::debug!(
                "Encoded frame {} in {:.2} ms",
                job.sequence,
                (end - start).as_secs_f64() * 1000.0
            );

            let ready = match &job.completion {
                Completion::Listener(l) => Some(Arc::clone(l)),
                Completion::Reply(_) => None,
            };
            let stamp = EncoderStamps {
                submitted: job.submitted,
                start,
                end,
            };
            if stamps.send(stamp).is_err() || handoff.send(Handoff::Frame { job, encoded }).is_err() {
                break;
            }
            if let Some(listener) = ready {
                listener.on_ready_for_next_frame();
            }
        }
    }

    /// Resize, convert and run the encoder, returning the tensor to fan out.
    fn encode(&self, frame: &Frame) -> Result<ArrayD<f32>, PipelineError> {
        let config = self.shared.config();
        let resolution = config.require_resolution().map_err(encoder_failed)?;
        let prepared = frame.fit_to(resolution.width, resolution.height);
        let tensor = self.frame_encoder.encode(&prepared).map_err(encoder_failed)?;
        let input_name = self.session.primary_input().map_err(encoder_failed)?.to_string();

        let mut inputs = TensorMap::new();
        inputs.insert(input_name, tensor);
        let mut outputs = self.session.run(inputs).map_err(encoder_failed)?;

        let wanted = match &config.intermediate_output {
            Some(name) => name.clone(),
            None => self
                .session
                .handle()
                .output_names()
                .first()
                .cloned()
                .ok_or_else(|| PipelineError::EncoderFailed("encoder declares no outputs".to_string()))?,
        };
        outputs
            .remove(&wanted)
            .ok_or_else(|| PipelineError::EncoderFailed(format!("encoder produced no output '{}'", wanted)))
    }
}

fn encoder_failed(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::EncoderFailed(e.to_string())
}

struct DecoderStage {
    decoders: DecoderPool,
    collector: TelemetryCollector,
    shared: Arc<Shared>,
}

impl DecoderStage {
    fn run(mut self, handoff: Receiver<Handoff>, stamps: Receiver<EncoderStamps>) {
        for item in handoff {
            match item {
                Handoff::Control(control) => self.control(control),
                Handoff::Frame { job, encoded } => {
                    let Ok(stamp) = stamps.recv() else {
                        log::error!("Timestamp channel closed before frame {}", job.sequence);
                        break;
                    };
                    self.decode(job, encoded, stamp);
                }
            }
        }
        if self.collector.is_active() {
            let _ = self.collector.stop();
        }
        self.shared.monitoring.store(false, Ordering::Release);
    }

    fn control(&mut self, control: Control) {
        match control {
            Control::StartMonitoring(reply) => {
                let result = self.collector.start();
                self.sync_monitoring();
                let _ = reply.send(result);
            }
            Control::StopMonitoring(reply) => {
                let result = self.collector.stop();
                self.sync_monitoring();
                let _ = reply.send(result);
            }
        }
    }

    fn sync_monitoring(&self) {
        self.shared
            .monitoring
            .store(self.collector.is_active(), Ordering::Release);
    }

    fn decode(&mut self, job: FrameJob, encoded: Result<ArrayD<f32>, PipelineError>, stamp: EncoderStamps) {
        let decoder_start = Instant::now();
        let outcome = encoded.and_then(|tensor| self.decoders.decode(tensor));
        let decoder_end = Instant::now();

        let timestamps = StageTimestamps {
            submitted: stamp.submitted,
            encoder_start: stamp.start,
            encoder_end: stamp.end,
            decoder_start,
            decoder_end,
        };

        let mut metrics = None;
        match &outcome {
            Ok(_) if self.collector.is_active() => {
                let timing = FrameTiming {
                    inference: timestamps.encoder_time() + timestamps.decoder_time(),
                    total: timestamps.latency(),
                };
                if let Err(e) = self.collector.sample(timing) {
                    log::warn!("Frame {} timing dropped: {}", job.sequence, e);
                }
                let cadence = self.shared.config().cadence();
                if cadence.camera_mode {
                    metrics = self.collector.report_if_due(&cadence).unwrap_or_else(|e| {
                        log::warn!("Metrics report failed: {}", e);
                        None
                    });
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Frame {} failed: {}", job.sequence, e),
        }

        let result = FrameResult {
            sequence: job.sequence,
            outcome,
            timestamps,
            metrics,
        };
        // Frames go back to the pool before the caller is woken.
        match job.completion {
            Completion::Reply(reply) => {
                self.shared.recycle(job.frame);
                let _ = reply.send(result);
            }
            Completion::Listener(listener) => {
                listener.on_frame_result(&job.frame, result);
                self.shared.recycle(job.frame);
            }
        }
    }
}
