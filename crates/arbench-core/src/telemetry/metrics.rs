//! Aggregated metrics for one monitoring window.

use super::average::RunningAverageTracker;
use super::sample::TelemetrySample;
use crate::config::MetricsDisplay;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const MS_PER_HOUR: f64 = 3.6e6;

/// Hardware and timing telemetry for one or more frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub session_id: Uuid,
    /// Mean inference time per frame
    pub exec_ms: f64,
    /// Mean inference time per frame including pre/postprocessing
    pub exec_with_postproc_ms: f64,
    /// Wall time of the whole window
    pub total_ms: f64,
    pub fps: f64,
    pub frame_count: u64,
    pub cpu_pct: f64,
    pub cpu_delta_pct: f64,
    pub thread_cpu_time_ms: f64,
    /// End minus start available memory; negative when the run consumed memory
    pub mem_delta_bytes: i64,
    pub battery_pct_used: f64,
    /// `|current| x mean voltage x exec time`; an estimate, not an integral
    pub power_uwh: f64,
    pub temp_delta_c: f64,
    pub final_temp_c: f64,
    pub avg_current_ua: f64,
}

/// Everything needed to derive [`RunMetrics`] for a finished window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSummary<'a> {
    pub session_id: Uuid,
    pub start: &'a TelemetrySample,
    pub end: &'a TelemetrySample,
    pub elapsed: Duration,
    pub averages: &'a RunningAverageTracker,
    pub frame_count: u64,
    pub cpu_pct_start: f64,
    pub cpu_pct_end: f64,
}

impl RunMetrics {
    pub fn from_window(w: WindowSummary<'_>) -> Self {
        let total_ms = w.elapsed.as_secs_f64() * 1000.0;
        let fps = if total_ms > 0.0 {
            w.frame_count as f64 / (total_ms / 1000.0)
        } else {
            0.0
        };

        let exec_ms = w.averages.average_ms();
        let avg_voltage_mv = (f64::from(w.start.voltage_mv()) + f64::from(w.end.voltage_mv())) / 2.0;
        let avg_current_ua = (w.end.current_ua() as f64).abs();
        let power_uwh = (avg_current_ua * avg_voltage_mv * (exec_ms / MS_PER_HOUR) / 1000.0).abs();

        Self {
            session_id: w.session_id,
            exec_ms,
            exec_with_postproc_ms: w.averages.average_with_postproc_ms(),
            total_ms,
            fps,
            frame_count: w.frame_count,
            cpu_pct: w.cpu_pct_end,
            cpu_delta_pct: w.cpu_pct_end - w.cpu_pct_start,
            thread_cpu_time_ms: w.end.thread_cpu_time_ns as f64 / 1e6,
            mem_delta_bytes: w.end.avail_mem_bytes as i64 - w.start.avail_mem_bytes as i64,
            battery_pct_used: w.start.battery_pct() - w.end.battery_pct(),
            power_uwh,
            temp_delta_c: w.end.temperature_c() - w.start.temperature_c(),
            final_temp_c: w.end.temperature_c(),
            avg_current_ua,
        }
    }

    /// Human-readable lines for the enabled metrics, rounded to 2 places.
    pub fn display_lines(&self, display: &MetricsDisplay) -> Vec<String> {
        let r = |v: f64| round_half_up(v, 2);
        let mut lines = Vec::new();
        let mut push = |enabled: bool, line: String| {
            if enabled {
                lines.push(line);
            }
        };
        push(display.runtime, format!("Runtime: {} ms", r(self.exec_ms)));
        push(
            display.runtime_total,
            format!("Runtime with Postprocessing: {} ms", r(self.exec_with_postproc_ms)),
        );
        push(display.cpu_usage, format!("CPU Usage Percent: {}%", r(self.cpu_pct)));
        push(
            display.cpu_usage_delta,
            format!("CPU Usage Percent Delta: {}%", r(self.cpu_delta_pct)),
        );
        push(
            display.cpu_thread_time,
            format!("Thread CPU Time: {} ms", r(self.thread_cpu_time_ms)),
        );
        push(
            display.memory_usage,
            format!("Memory Used: {}", byte_string(self.mem_delta_bytes as f64)),
        );
        push(display.battery_usage, format!("Battery Used: {}%", r(self.battery_pct_used)));
        push(display.power_consumed, format!("Power Consumed: {} uWh", r(self.power_uwh)));
        push(
            display.temp_change,
            format!("Temperature Change: {} degrees Celsius", r(self.temp_delta_c)),
        );
        push(
            display.temp_final,
            format!("Final Temperature: {} degrees Celsius", r(self.final_temp_c)),
        );
        push(display.current_avg, format!("Average Current: {} uA", r(self.avg_current_ua)));
        lines
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_half_up(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    // Nudge by a few ulps so 1.005 rounds like its decimal spelling.
    let scaled = value * factor * (1.0 + 4.0 * f64::EPSILON);
    scaled.round() / factor
}

/// Bytes with a GB/MB unit above a million.
fn byte_string(bytes: f64) -> String {
    let magnitude = bytes.abs();
    if magnitude > 1e9 {
        format!("{} GB", round_half_up(bytes / 1e9, 2))
    } else if magnitude > 1e6 {
        format!("{} MB", round_half_up(bytes / 1e6, 2))
    } else {
        format!("{} bytes", round_half_up(bytes, 2))
    }
}
