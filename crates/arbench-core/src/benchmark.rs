//! Single-model benchmark facade.
//!
//! [`BenchmarkRunner::run`] is the host-facing call: it loads the configured
//! model on first use, applies thermal backend switching from the current
//! sensor reading, runs the frame, renders every output to an image and
//! attaches [`RunMetrics`] whenever a reporting window closes.
//!
//! Failures never escape `run`; they become a degenerate [`BenchOutput`].

use crate::config::{BenchConfig, MetricsDisplay};
use crate::device::{AcceleratorQuery, BatterySensor, HardwareProbe, SysfsBatterySensor, SystemAccelerators, SystemProbe};
use crate::error::{BenchResult, ConfigError};
use crate::frame::Frame;
use crate::runtime_adapter::tensor::render_outputs;
use crate::runtime_adapter::{BackendKind, FsModelLoader, ModelLoader, PaletteRenderer, SessionFactory, TensorRenderer};
use crate::session_manager::SessionManager;
use crate::telemetry::RunMetrics;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Output name used by degenerate results.
pub const DEGENERATE_OUTPUT: &str = "output";

/// What one `run` call hands back to the host.
#[derive(Debug, Clone)]
pub struct BenchOutput {
    /// Rendered image per model output
    pub outputs: HashMap<String, Frame>,
    pub frame_latency_ms: f64,
    /// Present when this frame closed a reporting window
    pub metrics: Option<RunMetrics>,
    pub backend: Option<BackendKind>,
    /// Why the result is degenerate, if it is
    pub failure: Option<String>,
}

impl BenchOutput {
    /// A single 1x1 placeholder under `"output"`, zero latency, no metrics.
    pub fn degenerate(reason: impl Into<String>) -> Self {
        let mut outputs = HashMap::new();
        outputs.insert(DEGENERATE_OUTPUT.to_string(), Frame::placeholder());
        Self {
            outputs,
            frame_latency_ms: 0.0,
            metrics: None,
            backend: None,
            failure: Some(reason.into()),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.failure.is_some()
    }

    /// Display lines for the attached metrics, empty when there are none.
    pub fn metric_lines(&self, display: &MetricsDisplay) -> Vec<String> {
        self.metrics
            .as_ref()
            .map(|m| m.display_lines(display))
            .unwrap_or_default()
    }
}

/// Collaborators the runner is built from.
pub struct RunnerDeps {
    pub loader: Arc<dyn ModelLoader>,
    pub factory: Arc<dyn SessionFactory>,
    pub accelerators: Arc<dyn AcceleratorQuery>,
    pub probe: Arc<dyn HardwareProbe>,
    pub sensor: Arc<dyn BatterySensor>,
    pub renderer: Arc<dyn TensorRenderer>,
}

impl RunnerDeps {
    /// System sensors and a filesystem model directory around `factory`.
    pub fn system(models_dir: impl Into<PathBuf>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            loader: Arc::new(FsModelLoader::new(models_dir)),
            factory,
            accelerators: Arc::new(SystemAccelerators),
            probe: Arc::new(SystemProbe::new()),
            sensor: Arc::new(SysfsBatterySensor::new()),
            renderer: Arc::new(PaletteRenderer::default()),
        }
    }

    /// ONNX Runtime sessions for models under `models_dir`.
    #[cfg(feature = "ort-runtime")]
    pub fn onnx(models_dir: impl Into<PathBuf>) -> Self {
        let accelerators: Arc<dyn AcceleratorQuery> = Arc::new(SystemAccelerators);
        let factory = Arc::new(crate::runtime_adapter::OrtSessionFactory::new(Arc::clone(&accelerators)));
        Self {
            accelerators,
            ..Self::system(models_dir, factory)
        }
    }
}

/// Thermal-aware single-model benchmark loop.
pub struct BenchmarkRunner {
    manager: SessionManager,
    loader: Arc<dyn ModelLoader>,
    sensor: Arc<dyn BatterySensor>,
    renderer: Arc<dyn TensorRenderer>,
    loaded_model: Mutex<Option<String>>,
}

impl BenchmarkRunner {
    pub fn new(config: BenchConfig, deps: RunnerDeps) -> Self {
        let manager = SessionManager::new(
            Arc::new(config),
            deps.factory,
            deps.accelerators,
            deps.probe,
            Arc::clone(&deps.sensor),
        );
        Self {
            manager,
            loader: deps.loader,
            sensor: deps.sensor,
            renderer: deps.renderer,
            loaded_model: Mutex::new(None),
        }
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn config(&self) -> Arc<BenchConfig> {
        self.manager.config()
    }

    /// Apply a new configuration. A changed model is loaded on the next run.
    pub fn reconfigure(&self, config: BenchConfig) {
        self.manager.reconfigure(Arc::new(config));
    }

    pub fn active_backend(&self) -> Option<BackendKind> {
        self.manager.active_backend()
    }

    pub fn start_monitoring(&self) -> BenchResult<()> {
        self.manager.start_monitoring()
    }

    pub fn stop_monitoring(&self) -> BenchResult<RunMetrics> {
        self.manager.stop_monitoring()
    }

    /// Benchmark one frame.
    pub fn run(&self, frame: &Frame) -> BenchOutput {
        self.try_run(frame).unwrap_or_else(|e| {
            log::warn!("Benchmark run failed: {}", e);
            BenchOutput::degenerate(e.to_string())
        })
    }

    fn try_run(&self, frame: &Frame) -> BenchResult<BenchOutput> {
        let config = self.manager.config();
        config.validate()?;
        self.ensure_model(&config)?;

        if !self.manager.is_monitoring() {
            self.manager.start_monitoring()?;
        }

        match self.sensor.read() {
            Ok(reading) => {
                self.manager
                    .maybe_switch_backend(reading.temperature_c(), config.thermal_threshold_c);
            }
            Err(e) => log::warn!("Temperature unavailable, keeping backend: {}", e),
        }

        let Some(output) = self.manager.run(frame)? else {
            return Ok(BenchOutput::degenerate("monitoring is not active"));
        };
        let outputs = render_outputs(&output.outputs, self.renderer.as_ref(), &config);
        let metrics = self.manager.report_if_due()?;

        Ok(BenchOutput {
            outputs,
            frame_latency_ms: output.total.as_secs_f64() * 1000.0,
            metrics,
            backend: Some(output.backend),
            failure: None,
        })
    }

    /// Load the configured model unless it is already active.
    fn ensure_model(&self, config: &BenchConfig) -> BenchResult<()> {
        let model_ref = config.model.as_deref().ok_or(ConfigError::NoModelSelected)?;
        let mut loaded = self.loaded_model.lock().unwrap_or_else(|e| e.into_inner());
        if loaded.as_deref() == Some(model_ref) {
            return Ok(());
        }
        let source = self.loader.resolve(model_ref)?;
        let backend = self.manager.initialize(source, config.preferred_backend)?;
        log::info!("Loaded model '{}' on {} backend", model_ref, backend);
        *loaded = Some(model_ref.to_string());
        Ok(())
    }

    /// Release sessions and end any monitoring window.
    pub fn shutdown(&self) {
        self.manager.shutdown();
        *self.loaded_model.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl std::fmt::Debug for BenchmarkRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkRunner")
            .field("manager", &self.manager)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedAccelerators, MockSessionFactory, ScriptedBatterySensor, StaticProbe};

    struct AnyModel;

    impl ModelLoader for AnyModel {
        fn resolve(&self, model_ref: &str) -> BenchResult<crate::runtime_adapter::ModelSource> {
            Ok(crate::runtime_adapter::ModelSource::new(model_ref, model_ref)?)
        }
    }

    fn deps(sensor: Arc<ScriptedBatterySensor>) -> RunnerDeps {
        RunnerDeps {
            loader: Arc::new(AnyModel),
            factory: Arc::new(MockSessionFactory::new()),
            accelerators: Arc::new(FixedAccelerators::nnapi()),
            probe: Arc::new(StaticProbe::new(4)),
            sensor,
            renderer: Arc::new(PaletteRenderer::default()),
        }
    }

    #[test]
    fn test_degenerate_shape() {
        let out = BenchOutput::degenerate("why");
        assert!(out.is_degenerate());
        assert_eq!(out.outputs.len(), 1);
        assert_eq!(out.outputs[DEGENERATE_OUTPUT].dimensions(), (1, 1));
        assert_eq!(out.frame_latency_ms, 0.0);
        assert!(out.metric_lines(&MetricsDisplay::all()).is_empty());
    }

    #[test]
    fn test_no_model_is_degenerate() {
        let sensor = Arc::new(ScriptedBatterySensor::with_temperatures(&[25.0]));
        let runner = BenchmarkRunner::new(BenchConfig::new().with_resolution(4, 4), deps(sensor));
        let out = runner.run(&Frame::new(4, 4));
        assert!(out.is_degenerate());
        assert!(out.metrics.is_none());
    }

    #[test]
    fn test_unsupported_extension_is_degenerate() {
        let sensor = Arc::new(ScriptedBatterySensor::with_temperatures(&[25.0]));
        let config = BenchConfig::new().with_model("model.tflite").with_resolution(4, 4);
        let out = BenchmarkRunner::new(config, deps(sensor)).run(&Frame::new(4, 4));
        assert!(out.failure.unwrap().contains("tflite"));
    }

    #[test]
    fn test_single_shot_reports_every_frame() {
        let sensor = Arc::new(ScriptedBatterySensor::with_temperatures(&[25.0]));
        let config = BenchConfig::new().with_model("seg.onnx").with_resolution(4, 4);
        let runner = BenchmarkRunner::new(config, deps(sensor));

        let out = runner.run(&Frame::new(8, 8));
        assert!(!out.is_degenerate());
        assert_eq!(out.backend, Some(BackendKind::Accelerated));
        assert_eq!(out.outputs["output"].dimensions(), (4, 4));
        assert_eq!(out.metrics.as_ref().unwrap().frame_count, 1);

        let out = runner.run(&Frame::new(8, 8));
        assert_eq!(out.metrics.unwrap().frame_count, 1);
    }

    #[test]
    fn test_hot_device_switches_to_cpu() {
        let sensor = Arc::new(ScriptedBatterySensor::with_temperatures(&[45.0]));
        let config = BenchConfig::new()
            .with_model("seg.onnx")
            .with_resolution(4, 4)
            .with_thermal_threshold(35.0);
        let runner = BenchmarkRunner::new(config, deps(Arc::clone(&sensor)));
        assert_eq!(runner.run(&Frame::new(4, 4)).backend, Some(BackendKind::Cpu));

        sensor.set_temperature(30.0);
        assert_eq!(runner.run(&Frame::new(4, 4)).backend, Some(BackendKind::Accelerated));
    }
}
