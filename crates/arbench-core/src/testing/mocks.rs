//! Mock implementations for testing.
//!
//! Provides mock sessions, factories and sensors so the session manager,
//! pipeline and telemetry can be exercised without model files or hardware.

use crate::device::{Accelerator, AcceleratorQuery, BatteryReading, BatterySensor, HardwareProbe};
use crate::error::TelemetryError;
use crate::runtime_adapter::{
    AdapterError, AdapterResult, BackendKind, ModelFormat, ModelSession, ModelSource, SessionFactory,
    TensorMap,
};
use ndarray::{ArrayD, IxDyn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const CANCEL_POLL: Duration = Duration::from_millis(2);

/// A mock session that echoes its input or returns a fixed tensor.
///
/// ```rust,ignore
/// let session = MockSession::new("image", "mask").with_delay(Duration::from_millis(50));
/// let out = session.run(inputs)?;
/// assert_eq!(session.call_count(), 1);
/// ```
pub struct MockSession {
    input_names: Vec<String>,
    output_names: Vec<String>,
    output: Option<ArrayD<f32>>,
    delay: Duration,
    simulate_error: Option<String>,
    fail_on_calls: Mutex<HashSet<usize>>,
    call_count: AtomicUsize,
}

impl MockSession {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input_names: vec![input.into()],
            output_names: vec![output.into()],
            output: None,
            delay: Duration::ZERO,
            simulate_error: None,
            fail_on_calls: Mutex::new(HashSet::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Always return `tensor` instead of echoing the input.
    pub fn with_output(mut self, tensor: ArrayD<f32>) -> Self {
        self.output = Some(tensor);
        self
    }

    /// Sleep this long inside every `run`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every call.
    pub fn with_error(mut self, error_message: impl Into<String>) -> Self {
        self.simulate_error = Some(error_message.into());
        self
    }

    /// Fail only the given 1-based call numbers.
    pub fn failing_on_calls(self, calls: &[usize]) -> Self {
        if let Ok(mut set) = self.fail_on_calls.lock() {
            set.extend(calls.iter().copied());
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
    }
}

impl ModelSession for MockSession {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&self, inputs: TensorMap) -> AdapterResult<TensorMap> {
        self.execute(inputs, None)
    }

    fn run_cancellable(&self, inputs: TensorMap, cancel: &AtomicBool) -> AdapterResult<TensorMap> {
        self.execute(inputs, Some(cancel))
    }
}

impl MockSession {
    fn execute(&self, inputs: TensorMap, cancel: Option<&AtomicBool>) -> AdapterResult<TensorMap> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        match cancel {
            Some(cancel) => {
                let deadline = Instant::now() + self.delay;
                loop {
                    if cancel.load(Ordering::Acquire) {
                        return Err(AdapterError::Cancelled);
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    std::thread::sleep(CANCEL_POLL.min(deadline - now));
                }
            }
            None if !self.delay.is_zero() => std::thread::sleep(self.delay),
            None => {}
        }
        if let Some(ref error) = self.simulate_error {
            return Err(AdapterError::InferenceFailed(error.clone()));
        }
        if self.fail_on_calls.lock().map(|s| s.contains(&call)).unwrap_or(false) {
            return Err(AdapterError::InferenceFailed(format!("scripted failure on call {}", call)));
        }

        let tensor = match &self.output {
            Some(t) => t.clone(),
            None => inputs
                .get(&self.input_names[0])
                .cloned()
                .or_else(|| inputs.into_values().next())
                .unwrap_or_else(|| ArrayD::zeros(IxDyn(&[1]))),
        };
        let mut outputs = TensorMap::new();
        outputs.insert(self.output_names[0].clone(), tensor);
        Ok(outputs)
    }
}

/// Factory handing out mock sessions, with per-backend failure injection.
pub struct MockSessionFactory {
    sessions: HashMap<BackendKind, Arc<MockSession>>,
    failing: Mutex<HashSet<BackendKind>>,
    builds: Mutex<Vec<BackendKind>>,
    rejected_formats: HashSet<ModelFormat>,
}

impl Default for MockSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSessionFactory {
    pub fn new() -> Self {
        let sessions = [BackendKind::Accelerated, BackendKind::Cpu]
            .into_iter()
            .map(|b| (b, Arc::new(MockSession::new("input", "output"))))
            .collect();
        Self {
            sessions,
            failing: Mutex::new(HashSet::new()),
            builds: Mutex::new(Vec::new()),
            rejected_formats: HashSet::new(),
        }
    }

    /// Report `format` as unsupported.
    pub fn rejecting_format(mut self, format: ModelFormat) -> Self {
        self.rejected_formats.insert(format);
        self
    }

    /// Hand out `session` for every build on `backend`.
    pub fn with_session(mut self, backend: BackendKind, session: Arc<MockSession>) -> Self {
        self.sessions.insert(backend, session);
        self
    }

    /// Make builds for `backend` fail.
    pub fn failing(self, backend: BackendKind) -> Self {
        self.set_failing(backend, true);
        self
    }

    pub fn set_failing(&self, backend: BackendKind, failing: bool) {
        if let Ok(mut set) = self.failing.lock() {
            if failing {
                set.insert(backend);
            } else {
                set.remove(&backend);
            }
        }
    }

    pub fn session(&self, backend: BackendKind) -> Option<Arc<MockSession>> {
        self.sessions.get(&backend).cloned()
    }

    /// Number of build attempts for `backend`, failed ones included.
    pub fn build_count(&self, backend: BackendKind) -> usize {
        self.builds
            .lock()
            .map(|b| b.iter().filter(|k| **k == backend).count())
            .unwrap_or(0)
    }
}

impl SessionFactory for MockSessionFactory {
    fn build(&self, _model: &ModelSource, backend: BackendKind) -> AdapterResult<Arc<dyn ModelSession>> {
        if let Ok(mut builds) = self.builds.lock() {
            builds.push(backend);
        }
        let failing = self.failing.lock().map(|s| s.contains(&backend)).unwrap_or(false);
        if failing {
            return Err(AdapterError::BuildFailed(format!("mock {} build failure", backend)));
        }
        let session: Arc<dyn ModelSession> = self
            .sessions
            .get(&backend)
            .cloned()
            .ok_or_else(|| AdapterError::BuildFailed(format!("no mock for {}", backend)))?;
        Ok(session)
    }

    fn supports(&self, format: ModelFormat) -> bool {
        !self.rejected_formats.contains(&format)
    }
}

/// Battery sensor replaying a script of readings; the last one repeats.
pub struct ScriptedBatterySensor {
    script: Mutex<VecDeque<BatteryReading>>,
    fail: bool,
}

impl ScriptedBatterySensor {
    pub fn new(readings: Vec<BatteryReading>) -> Self {
        Self {
            script: Mutex::new(readings.into()),
            fail: false,
        }
    }

    /// Readings at the given temperatures in degrees Celsius.
    pub fn with_temperatures(temps_c: &[f32]) -> Self {
        Self::new(
            temps_c
                .iter()
                .map(|t| BatteryReading {
                    temp_deci_c: (t * 10.0).round() as i32,
                    ..BatteryReading::fallback()
                })
                .collect(),
        )
    }

    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fail: true,
        }
    }

    /// Replace the script with a single reading at `temp_c`.
    pub fn set_temperature(&self, temp_c: f32) {
        if let Ok(mut script) = self.script.lock() {
            script.clear();
            script.push_back(BatteryReading {
                temp_deci_c: (temp_c * 10.0).round() as i32,
                ..BatteryReading::fallback()
            });
        }
    }
}

impl BatterySensor for ScriptedBatterySensor {
    fn read(&self) -> Result<BatteryReading, TelemetryError> {
        if self.fail {
            return Err(TelemetryError::Sensor("scripted sensor failure".to_string()));
        }
        let mut script = self
            .script
            .lock()
            .map_err(|_| TelemetryError::Sensor("sensor lock poisoned".to_string()))?;
        let reading = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        reading.ok_or_else(|| TelemetryError::Sensor("empty script".to_string()))
    }
}

/// Probe with fixed, settable counters.
pub struct StaticProbe {
    processors: usize,
    process_cpu: Mutex<Duration>,
    thread_cpu: Mutex<Duration>,
    available_memory: u64,
}

impl StaticProbe {
    pub fn new(processors: usize) -> Self {
        Self {
            processors,
            process_cpu: Mutex::new(Duration::ZERO),
            thread_cpu: Mutex::new(Duration::ZERO),
            available_memory: 4 << 30,
        }
    }

    pub fn with_thread_cpu_time(self, d: Duration) -> Self {
        if let Ok(mut t) = self.thread_cpu.lock() {
            *t = d;
        }
        self
    }

    pub fn with_available_memory(mut self, bytes: u64) -> Self {
        self.available_memory = bytes;
        self
    }

    /// Add CPU time to both counters.
    pub fn advance_cpu(&self, d: Duration) {
        for counter in [&self.process_cpu, &self.thread_cpu] {
            if let Ok(mut t) = counter.lock() {
                *t += d;
            }
        }
    }
}

impl HardwareProbe for StaticProbe {
    fn process_cpu_time(&self) -> Duration {
        self.process_cpu.lock().map(|t| *t).unwrap_or_default()
    }

    fn thread_cpu_time(&self) -> Duration {
        self.thread_cpu.lock().map(|t| *t).unwrap_or_default()
    }

    fn available_memory_bytes(&self) -> u64 {
        self.available_memory
    }

    fn processor_count(&self) -> usize {
        self.processors
    }
}

/// Accelerator query with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct FixedAccelerators(pub Vec<Accelerator>);

impl FixedAccelerators {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn nnapi() -> Self {
        Self(vec![Accelerator::Nnapi])
    }
}

impl AcceleratorQuery for FixedAccelerators {
    fn available_accelerators(&self) -> Vec<Accelerator> {
        self.0.clone()
    }
}
