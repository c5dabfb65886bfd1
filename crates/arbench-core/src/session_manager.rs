//! Session manager - backend selection and thermal switching.
//!
//! Owns at most one session per backend. Sessions are built lazily the first
//! time a backend becomes active and stay resident until
//! [`shutdown`](SessionManager::shutdown); switching only moves the active
//! pointer.
//!
//! A backend whose session fails to build is marked incompatible and never
//! retried.

use crate::config::BenchConfig;
use crate::device::{AcceleratorQuery, BatterySensor, HardwareProbe};
use crate::error::{BenchError, BenchResult, ConfigError, InferenceError};
use crate::frame::Frame;
use crate::runtime_adapter::{
    BackendKind, FrameEncoder, InferenceSession, ModelSource, NchwEncoder, SessionFactory, TensorMap,
};
use crate::telemetry::{FrameTiming, RunMetrics, TelemetryCollector};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

/// Result of one single-frame inference.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub outputs: TensorMap,
    pub backend: BackendKind,
    /// Time inside the session
    pub inference: Duration,
    /// Time including resize and tensor conversion
    pub total: Duration,
}

#[derive(Default)]
struct BackendState {
    model: Option<ModelSource>,
    accelerated: Option<InferenceSession>,
    cpu: Option<InferenceSession>,
    active: Option<BackendKind>,
    accelerator_incompatible: bool,
    cpu_incompatible: bool,
}

impl BackendState {
    fn slot(&mut self, backend: BackendKind) -> &mut Option<InferenceSession> {
        match backend {
            BackendKind::Accelerated => &mut self.accelerated,
            BackendKind::Cpu => &mut self.cpu,
        }
    }

    fn incompatible(&mut self, backend: BackendKind) -> &mut bool {
        match backend {
            BackendKind::Accelerated => &mut self.accelerator_incompatible,
            BackendKind::Cpu => &mut self.cpu_incompatible,
        }
    }

    fn active_session(&self) -> Option<InferenceSession> {
        match self.active? {
            BackendKind::Accelerated => self.accelerated.clone(),
            BackendKind::Cpu => self.cpu.clone(),
        }
    }
}

/// Runs single frames on the active backend and switches backends on temperature.
pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    accelerators: Arc<dyn AcceleratorQuery>,
    encoder: Arc<dyn FrameEncoder>,
    config: RwLock<Arc<BenchConfig>>,
    state: Mutex<BackendState>,
    collector: Mutex<TelemetryCollector>,
}

impl SessionManager {
    pub fn new(
        config: Arc<BenchConfig>,
        factory: Arc<dyn SessionFactory>,
        accelerators: Arc<dyn AcceleratorQuery>,
        probe: Arc<dyn HardwareProbe>,
        sensor: Arc<dyn BatterySensor>,
    ) -> Self {
        Self {
            factory,
            accelerators,
            encoder: Arc::new(NchwEncoder::new()),
            config: RwLock::new(config),
            state: Mutex::new(BackendState::default()),
            collector: Mutex::new(TelemetryCollector::new(probe, sensor)),
        }
    }

    /// Replace the frame to tensor conversion.
    pub fn with_frame_encoder(mut self, encoder: Arc<dyn FrameEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_collector(&self) -> MutexGuard<'_, TelemetryCollector> {
        self.collector.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> Arc<BenchConfig> {
        self.config
            .read()
            .map(|c| Arc::clone(&c))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    /// Swap in a new configuration for subsequent calls.
    pub fn reconfigure(&self, config: Arc<BenchConfig>) {
        match self.config.write() {
            Ok(mut c) => *c = config,
            Err(e) => *e.into_inner() = config,
        }
    }

    /// Build the preferred backend's session, falling back to the other one.
    ///
    /// Fails if the factory cannot load the model's format at all, or if
    /// neither backend can be built.
    pub fn initialize(&self, model: ModelSource, preferred: BackendKind) -> BenchResult<BackendKind> {
        if !self.factory.supports(model.format) {
            return Err(ConfigError::UnsupportedFormat(model.format.as_str().to_string()).into());
        }
        let mut state = self.lock_state();
        if state.model.as_ref() != Some(&model) {
            state.accelerated = None;
            state.cpu = None;
            state.active = None;
            state.model = Some(model);
        }

        let first_err = match self.ensure_session(&mut state, preferred) {
            Ok(_) => {
                state.active = Some(preferred);
                log::info!("Initialized on {} backend", preferred);
                return Ok(preferred);
            }
            Err(e) => e,
        };

        let fallback = preferred.fallback();
        log::warn!("{}; falling back to {} backend", first_err, fallback);
        match self.ensure_session(&mut state, fallback) {
            Ok(_) => {
                state.active = Some(fallback);
                Ok(fallback)
            }
            Err(second_err) => Err(BenchError::backend_unavailable(
                fallback,
                format!("{}; {}", first_err, second_err),
            )),
        }
    }

    /// Return the resident session for `backend`, building it if needed.
    fn ensure_session(
        &self,
        state: &mut BackendState,
        backend: BackendKind,
    ) -> BenchResult<InferenceSession> {
        if let Some(session) = state.slot(backend).clone() {
            return Ok(session);
        }
        if *state.incompatible(backend) {
            return Err(BenchError::backend_unavailable(backend, "marked incompatible"));
        }
        let model = state
            .model
            .clone()
            .ok_or(BenchError::Inference(InferenceError::SessionNotLoaded))?;

        if backend == BackendKind::Accelerated && self.accelerators.available_accelerators().is_empty() {
            *state.incompatible(backend) = true;
            return Err(BenchError::backend_unavailable(backend, "no accelerator on this device"));
        }

        match self.factory.build(&model, backend) {
            Ok(handle) => {
                let session = InferenceSession::new(backend, handle);
                *state.slot(backend) = Some(session.clone());
                log::debug!("Built {} session for {}", backend, model.id);
                Ok(session)
            }
            Err(e) => {
                *state.incompatible(backend) = true;
                log::warn!("Marking {} backend incompatible for {}: {}", backend, model.id, e);
                Err(BenchError::backend_unavailable(backend, e.to_string()))
            }
        }
    }

    /// Pick the backend for the current temperature.
    ///
    /// Above the threshold the CPU backend is used, below it the accelerated
    /// one. Exactly at the threshold nothing changes. A failed lazy build
    /// keeps the current backend.
    pub fn maybe_switch_backend(&self, current_temp_c: f32, high_threshold_c: f32) -> Option<BackendKind> {
        let mut state = self.lock_state();
        let current = state.active?;
        let target = match current {
            BackendKind::Accelerated if current_temp_c > high_threshold_c => BackendKind::Cpu,
            BackendKind::Cpu if current_temp_c < high_threshold_c => BackendKind::Accelerated,
            _ => return Some(current),
        };
        if *state.incompatible(target) {
            return Some(current);
        }
        match self.ensure_session(&mut state, target) {
            Ok(_) => {
                log::info!(
                    "Switching {} -> {} at {:.1}C (threshold {:.1}C)",
                    current,
                    target,
                    current_temp_c,
                    high_threshold_c
                );
                state.active = Some(target);
                Some(target)
            }
            Err(e) => {
                log::warn!("Staying on {} backend: {}", current, e);
                Some(current)
            }
        }
    }

    pub fn active_backend(&self) -> Option<BackendKind> {
        self.lock_state().active
    }

    pub fn is_incompatible(&self, backend: BackendKind) -> bool {
        *self.lock_state().incompatible(backend)
    }

    /// Backends with a built session.
    pub fn resident_backends(&self) -> Vec<BackendKind> {
        let state = self.lock_state();
        [
            (BackendKind::Accelerated, state.accelerated.is_some()),
            (BackendKind::Cpu, state.cpu.is_some()),
        ]
        .into_iter()
        .filter_map(|(b, built)| built.then_some(b))
        .collect()
    }

    pub fn start_monitoring(&self) -> BenchResult<()> {
        Ok(self.lock_collector().start()?)
    }

    pub fn stop_monitoring(&self) -> BenchResult<RunMetrics> {
        Ok(self.lock_collector().stop()?)
    }

    pub fn is_monitoring(&self) -> bool {
        self.lock_collector().is_active()
    }

    /// Close the monitoring window if the configured cadence says so.
    pub fn report_if_due(&self) -> BenchResult<Option<RunMetrics>> {
        let cadence = self.config().cadence();
        Ok(self.lock_collector().report_if_due(&cadence)?)
    }

    /// Run one frame on the active backend.
    ///
    /// Returns `Ok(None)` without running anything if monitoring has not
    /// been started. Frames whose size differs from the configured
    /// resolution are resized into a new buffer first.
    pub fn run(&self, frame: &Frame) -> BenchResult<Option<SessionOutput>> {
        if !self.is_monitoring() {
            log::error!("run() called before start_monitoring(); ignoring frame");
            return Ok(None);
        }
        let resolution = self.config().require_resolution()?;
        let session = self
            .lock_state()
            .active_session()
            .ok_or(BenchError::Inference(InferenceError::SessionNotLoaded))?;

        let total_start = Instant::now();
        let prepared = frame.fit_to(resolution.width, resolution.height);
        let tensor = self.encoder.encode(&prepared)?;
        let input_name = session.primary_input().map_err(InferenceError::from)?.to_string();

        let mut inputs = TensorMap::new();
        inputs.insert(input_name, tensor);

        let inference_start = Instant::now();
        let outputs = session.run(inputs).map_err(InferenceError::from)?;
        let inference = inference_start.elapsed();
        let total = total_start.elapsed();

        let timing = FrameTiming { inference, total };
        if let Err(e) = self.lock_collector().sample(timing) {
            // Monitoring was stopped while this frame ran.
            log::warn!("Frame timing dropped: {}", e);
        }

        Ok(Some(SessionOutput {
            outputs,
            backend: session.backend(),
            inference,
            total,
        }))
    }

    /// Release both sessions and end any monitoring window.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            state.accelerated = None;
            state.cpu = None;
            state.active = None;
        }
        let mut collector = self.lock_collector();
        if collector.is_active() {
            let _ = collector.stop();
        }
        log::debug!("Session manager shut down");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("SessionManager")
            .field("active", &state.active)
            .field("accelerated", &state.accelerated.is_some())
            .field("cpu", &state.cpu.is_some())
            .field("accelerator_incompatible", &state.accelerator_incompatible)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_adapter::ModelFormat;
    use crate::testing::{FixedAccelerators, MockSessionFactory, ScriptedBatterySensor, StaticProbe};

    fn model() -> ModelSource {
        ModelSource::new("seg.onnx", "/models/seg.onnx").unwrap()
    }

    fn manager_with(factory: Arc<MockSessionFactory>, accelerators: FixedAccelerators) -> SessionManager {
        SessionManager::new(
            Arc::new(BenchConfig::new().with_resolution(4, 4)),
            factory,
            Arc::new(accelerators),
            Arc::new(StaticProbe::new(2)),
            Arc::new(ScriptedBatterySensor::with_temperatures(&[25.0])),
        )
    }

    #[test]
    fn test_initialize_preferred() {
        let factory = Arc::new(MockSessionFactory::new());
        let manager = manager_with(factory.clone(), FixedAccelerators::nnapi());
        assert_eq!(manager.initialize(model(), BackendKind::Accelerated).unwrap(), BackendKind::Accelerated);
        assert_eq!(manager.resident_backends(), vec![BackendKind::Accelerated]);
        assert_eq!(factory.build_count(BackendKind::Cpu), 0);
    }

    #[test]
    fn test_unsupported_format_is_a_configuration_error() {
        let factory = Arc::new(MockSessionFactory::new().rejecting_format(ModelFormat::TorchScript));
        let manager = manager_with(factory.clone(), FixedAccelerators::nnapi());
        let torchscript = ModelSource::new("seg.pt", "/models/seg.pt").unwrap();

        let err = manager.initialize(torchscript, BackendKind::Accelerated).unwrap_err();
        assert!(matches!(err, BenchError::Config(ConfigError::UnsupportedFormat(ref f)) if f == "torchscript"));
        // Neither backend was tried, so both stay usable for a supported model.
        assert_eq!(factory.build_count(BackendKind::Accelerated), 0);
        assert!(!manager.is_incompatible(BackendKind::Accelerated));
        assert!(!manager.is_incompatible(BackendKind::Cpu));
        assert_eq!(manager.initialize(model(), BackendKind::Accelerated).unwrap(), BackendKind::Accelerated);
    }

    #[test]
    fn test_initialize_falls_back_and_marks_incompatible() {
        let factory = Arc::new(MockSessionFactory::new().failing(BackendKind::Accelerated));
        let manager = manager_with(factory.clone(), FixedAccelerators::nnapi());
        assert_eq!(manager.initialize(model(), BackendKind::Accelerated).unwrap(), BackendKind::Cpu);
        assert!(manager.is_incompatible(BackendKind::Accelerated));

        // Cool temperatures never retry the failed backend.
        factory.set_failing(BackendKind::Accelerated, false);
        assert_eq!(manager.maybe_switch_backend(10.0, 35.0), Some(BackendKind::Cpu));
        assert_eq!(factory.build_count(BackendKind::Accelerated), 1);
    }

    #[test]
    fn test_no_accelerator_counts_as_unavailable() {
        let factory = Arc::new(MockSessionFactory::new());
        let manager = manager_with(factory.clone(), FixedAccelerators::none());
        assert_eq!(manager.initialize(model(), BackendKind::Accelerated).unwrap(), BackendKind::Cpu);
        assert!(manager.is_incompatible(BackendKind::Accelerated));
        assert_eq!(factory.build_count(BackendKind::Accelerated), 0);
    }

    #[test]
    fn test_initialize_fails_when_both_fail() {
        let factory = Arc::new(
            MockSessionFactory::new()
                .failing(BackendKind::Accelerated)
                .failing(BackendKind::Cpu),
        );
        let manager = manager_with(factory, FixedAccelerators::nnapi());
        let err = manager.initialize(model(), BackendKind::Accelerated).unwrap_err();
        assert!(matches!(err, BenchError::BackendUnavailable { .. }));
        assert_eq!(manager.active_backend(), None);
    }

    #[test]
    fn test_switch_is_lazy_and_keeps_sessions_resident() {
        let factory = Arc::new(MockSessionFactory::new());
        let manager = manager_with(factory.clone(), FixedAccelerators::nnapi());
        manager.initialize(model(), BackendKind::Accelerated).unwrap();

        assert_eq!(manager.maybe_switch_backend(40.0, 35.0), Some(BackendKind::Cpu));
        assert_eq!(manager.maybe_switch_backend(20.0, 35.0), Some(BackendKind::Accelerated));
        assert_eq!(manager.maybe_switch_backend(41.0, 35.0), Some(BackendKind::Cpu));
        assert_eq!(factory.build_count(BackendKind::Cpu), 1);
        assert_eq!(factory.build_count(BackendKind::Accelerated), 1);
        assert_eq!(manager.resident_backends().len(), 2);
    }

    #[test]
    fn test_threshold_equality_keeps_backend() {
        let manager = manager_with(Arc::new(MockSessionFactory::new()), FixedAccelerators::nnapi());
        manager.initialize(model(), BackendKind::Accelerated).unwrap();
        assert_eq!(manager.maybe_switch_backend(35.0, 35.0), Some(BackendKind::Accelerated));
    }

    #[test]
    fn test_switch_before_initialize() {
        let manager = manager_with(Arc::new(MockSessionFactory::new()), FixedAccelerators::nnapi());
        assert_eq!(manager.maybe_switch_backend(50.0, 35.0), None);
    }

    #[test]
    fn test_run_requires_monitoring() {
        let factory = Arc::new(MockSessionFactory::new());
        let manager = manager_with(factory.clone(), FixedAccelerators::nnapi());
        manager.initialize(model(), BackendKind::Accelerated).unwrap();

        assert!(manager.run(&Frame::new(4, 4)).unwrap().is_none());
        let session = factory.session(BackendKind::Accelerated).unwrap();
        assert_eq!(session.call_count(), 0);
    }

    #[test]
    fn test_run_resizes_without_mutating_input() {
        let manager = manager_with(Arc::new(MockSessionFactory::new()), FixedAccelerators::nnapi());
        manager.initialize(model(), BackendKind::Accelerated).unwrap();
        manager.start_monitoring().unwrap();

        let frame = Frame::filled(16, 8, [255, 0, 0, 255]);
        let out = manager.run(&frame).unwrap().unwrap();
        assert_eq!(frame.dimensions(), (16, 8));
        assert_eq!(out.backend, BackendKind::Accelerated);
        assert_eq!(out.outputs["output"].shape(), &[1, 3, 4, 4]);

        let metrics = manager.stop_monitoring().unwrap();
        assert_eq!(metrics.frame_count, 1);
    }

    #[test]
    fn test_run_without_resolution_is_configuration_error() {
        let manager = SessionManager::new(
            Arc::new(BenchConfig::new()),
            Arc::new(MockSessionFactory::new()),
            Arc::new(FixedAccelerators::nnapi()),
            Arc::new(StaticProbe::new(1)),
            Arc::new(ScriptedBatterySensor::with_temperatures(&[25.0])),
        );
        manager.initialize(model(), BackendKind::Cpu).unwrap();
        manager.start_monitoring().unwrap();
        let err = manager.run(&Frame::new(2, 2)).unwrap_err();
        assert!(matches!(err, BenchError::Config(ConfigError::DimensionsUnset)));
    }

    #[test]
    fn test_inference_failure_does_not_fail_over() {
        let failing = Arc::new(crate::testing::MockSession::new("input", "output").failing_on_calls(&[1]));
        let factory = Arc::new(MockSessionFactory::new().with_session(BackendKind::Accelerated, failing.clone()));
        let manager = manager_with(factory.clone(), FixedAccelerators::nnapi());
        manager.initialize(model(), BackendKind::Accelerated).unwrap();
        manager.start_monitoring().unwrap();

        let err = manager.run(&Frame::new(4, 4)).unwrap_err();
        assert!(matches!(err, BenchError::Inference(_)));
        assert_eq!(manager.active_backend(), Some(BackendKind::Accelerated));
        assert_eq!(factory.build_count(BackendKind::Cpu), 0);

        // Same session keeps working for the next frame.
        assert!(manager.run(&Frame::new(4, 4)).unwrap().is_some());
        assert_eq!(failing.call_count(), 2);
    }

    #[test]
    fn test_shutdown_releases_sessions() {
        let manager = manager_with(Arc::new(MockSessionFactory::new()), FixedAccelerators::nnapi());
        manager.initialize(model(), BackendKind::Accelerated).unwrap();
        manager.start_monitoring().unwrap();
        manager.shutdown();
        assert!(manager.resident_backends().is_empty());
        assert!(!manager.is_monitoring());
    }
}
