//! Telemetry module - Hardware monitoring around inference runs.
//!
//! A [`TelemetryCollector`] brackets a batch of frames: `start()` captures a
//! baseline [`TelemetrySample`], `sample()` folds each frame's timings into a
//! [`RunningAverageTracker`], and `stop()` derives [`RunMetrics`] from the
//! baseline/end pair.

pub mod average;
pub mod collector;
pub mod metrics;
pub mod sample;

pub use average::RunningAverageTracker;
pub use collector::{FrameTiming, MonitorState, TelemetryCollector};
pub use metrics::{round_half_up, RunMetrics, WindowSummary};
pub use sample::TelemetrySample;
