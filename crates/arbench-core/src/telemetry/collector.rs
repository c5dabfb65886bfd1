//! Monitoring window state machine.
//!
//! ```text
//! Idle ──start──▶ Started ──sample──▶ Sampling ──stop──▶ Stopped
//!                    │                   ▲  │               │
//!                    └──────stop─────────┼──┘               │
//!                                        └────sample        │
//! Stopped ──start──▶ Started ◀──────────────────────────────┘
//! ```

use super::average::RunningAverageTracker;
use super::metrics::{RunMetrics, WindowSummary};
use super::sample::TelemetrySample;
use crate::config::MetricsCadence;
use crate::device::{BatterySensor, CpuClock, CpuUsageMeter, HardwareProbe};
use crate::error::TelemetryError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle of a monitoring window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Started,
    Sampling,
    Stopped,
}

impl MonitorState {
    pub fn is_active(&self) -> bool {
        matches!(self, MonitorState::Started | MonitorState::Sampling)
    }
}

/// Timings measured around one inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTiming {
    /// Time spent inside the session(s)
    pub inference: Duration,
    /// Time including frame preparation and output extraction
    pub total: Duration,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Samples hardware around a batch of frames and produces [`RunMetrics`].
pub struct TelemetryCollector {
    probe: Arc<dyn HardwareProbe>,
    sensor: Arc<dyn BatterySensor>,
    state: MonitorState,
    session_id: Uuid,
    baseline: Option<TelemetrySample>,
    started_at: Instant,
    averages: RunningAverageTracker,
    frame_count: u64,
    cpu_meter: CpuUsageMeter,
    cpu_pct_start: f64,
}

impl TelemetryCollector {
    pub fn new(probe: Arc<dyn HardwareProbe>, sensor: Arc<dyn BatterySensor>) -> Self {
        Self::with_cpu_clock(probe, sensor, CpuClock::CallingThread)
    }

    /// Collector whose CPU usage is measured on the given clock.
    ///
    /// Use [`CpuClock::Process`] when frames run on threads other than the
    /// one calling `start`/`stop`.
    pub fn with_cpu_clock(
        probe: Arc<dyn HardwareProbe>,
        sensor: Arc<dyn BatterySensor>,
        clock: CpuClock,
    ) -> Self {
        Self {
            probe,
            sensor,
            state: MonitorState::Idle,
            session_id: Uuid::nil(),
            baseline: None,
            started_at: Instant::now(),
            averages: RunningAverageTracker::new(),
            frame_count: 0,
            cpu_meter: CpuUsageMeter::new(clock),
            cpu_pct_start: 0.0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn averages(&self) -> &RunningAverageTracker {
        &self.averages
    }

    /// Wall time since `start`, zero when not active.
    pub fn elapsed(&self) -> Duration {
        if self.is_active() {
            self.started_at.elapsed()
        } else {
            Duration::ZERO
        }
    }

    /// Capture the baseline snapshot and reset counters.
    pub fn start(&mut self) -> Result<(), TelemetryError> {
        if self.is_active() {
            return Err(TelemetryError::AlreadyStarted);
        }
        self.cpu_meter.reset();
        self.cpu_pct_start = self.cpu_meter.read(self.probe.as_ref());
        self.baseline = Some(TelemetrySample::capture(
            self.probe.as_ref(),
            self.sensor.as_ref(),
        ));
        self.session_id = Uuid::new_v4();
        self.averages.reset();
        self.frame_count = 0;
        self.started_at = Instant::now();
        self.state = MonitorState::Started;
        log::debug!("Monitoring window {} started", self.session_id);
        Ok(())
    }

    /// Record one frame.
    pub fn sample(&mut self, timing: FrameTiming) -> Result<(), TelemetryError> {
        if !self.is_active() {
            return Err(TelemetryError::NotStarted);
        }
        self.averages.record(ms(timing.inference), ms(timing.total));
        self.frame_count += 1;
        self.state = MonitorState::Sampling;
        log::debug!(
            "Frame {}: inference {:.2} ms, total {:.2} ms",
            self.frame_count,
            ms(timing.inference),
            ms(timing.total)
        );
        Ok(())
    }

    /// Capture the end snapshot and derive the window's metrics.
    pub fn stop(&mut self) -> Result<RunMetrics, TelemetryError> {
        if !self.is_active() {
            return Err(TelemetryError::NotStarted);
        }
        let elapsed = self.started_at.elapsed();
        let cpu_pct_end = self.cpu_meter.read(self.probe.as_ref());
        let end = TelemetrySample::capture(self.probe.as_ref(), self.sensor.as_ref());
        let start = self.baseline.take().unwrap_or(end);

        let metrics = RunMetrics::from_window(WindowSummary {
            session_id: self.session_id,
            start: &start,
            end: &end,
            elapsed,
            averages: &self.averages,
            frame_count: self.frame_count,
            cpu_pct_start: self.cpu_pct_start,
            cpu_pct_end,
        });
        self.state = MonitorState::Stopped;
        log::info!(
            "Monitoring window {}: {} frames, {:.2} ms avg, {:.2} fps",
            self.session_id,
            metrics.frame_count,
            metrics.exec_ms,
            metrics.fps
        );
        Ok(metrics)
    }

    /// Close the window if the cadence says so.
    ///
    /// In camera mode a new window starts immediately so frames keep being
    /// sampled; otherwise the collector is left `Stopped`.
    pub fn report_if_due(
        &mut self,
        cadence: &MetricsCadence,
    ) -> Result<Option<RunMetrics>, TelemetryError> {
        if !self.is_active() || !cadence.is_due(self.frame_count, self.elapsed()) {
            return Ok(None);
        }
        let metrics = self.stop()?;
        if cadence.camera_mode {
            self.start()?;
        }
        Ok(Some(metrics))
    }
}

impl std::fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}
