//! Monitoring window metrics derived from scripted sensors.

use arbench_core::config::{BenchConfig, MetricsDisplay};
use arbench_core::device::{BatteryReading, ChargingStatus, CpuClock};
use arbench_core::error::TelemetryError;
use arbench_core::telemetry::{FrameTiming, RunningAverageTracker, TelemetryCollector};
use arbench_core::testing::{ScriptedBatterySensor, StaticProbe};
use std::sync::Arc;
use std::time::Duration;

fn reading(level: i32, current_ua: i64, voltage_mv: i32, temp_deci_c: i32) -> BatteryReading {
    BatteryReading {
        level,
        scale: 100,
        current_ua,
        voltage_mv,
        temp_deci_c,
        status: ChargingStatus::Discharging,
    }
}

fn timing(inference_ms: u64, total_ms: u64) -> FrameTiming {
    FrameTiming {
        inference: Duration::from_millis(inference_ms),
        total: Duration::from_millis(total_ms),
    }
}

#[test]
fn test_zero_sample_window() {
    let sensor = ScriptedBatterySensor::new(vec![reading(80, -1000, 4000, 300)]);
    let mut collector = TelemetryCollector::new(Arc::new(StaticProbe::new(4)), Arc::new(sensor));
    collector.start().unwrap();
    let metrics = collector.stop().unwrap();

    assert_eq!(metrics.frame_count, 0);
    assert_eq!(metrics.exec_ms, 0.0);
    assert_eq!(metrics.exec_with_postproc_ms, 0.0);
    assert_eq!(metrics.fps, 0.0);
    assert_eq!(metrics.battery_pct_used, 0.0);
    assert_eq!(metrics.temp_delta_c, 0.0);
    assert_eq!(metrics.power_uwh, 0.0);
    assert_eq!(metrics.mem_delta_bytes, 0);
}

#[test]
fn test_deltas_between_snapshots() {
    let sensor = ScriptedBatterySensor::new(vec![
        reading(90, -200_000, 4000, 300),
        reading(89, -300_000, 3800, 345),
    ]);
    let mut collector = TelemetryCollector::new(Arc::new(StaticProbe::new(4)), Arc::new(sensor));
    collector.start().unwrap();
    collector.sample(timing(100, 120)).unwrap();
    collector.sample(timing(200, 240)).unwrap();
    let m = collector.stop().unwrap();

    assert_eq!(m.frame_count, 2);
    assert!((m.exec_ms - 150.0).abs() < 1e-9);
    assert!((m.exec_with_postproc_ms - 180.0).abs() < 1e-9);
    assert!((m.battery_pct_used - 1.0).abs() < 1e-9);
    assert!((m.temp_delta_c - 4.5).abs() < 1e-6);
    assert!((m.final_temp_c - 34.5).abs() < 1e-6);
    assert_eq!(m.avg_current_ua, 300_000.0);

    // |current| * mean voltage * hours(avg exec) / 1000
    let expected = 300_000.0 * 3900.0 * (150.0 / 3.6e6) / 1000.0;
    assert!((m.power_uwh - expected).abs() < 1e-6);
}

#[test]
fn test_running_average_matches_arithmetic_mean() {
    let samples = [3.5, 17.25, 0.5, 102.0, 44.125, 9.0, 61.75];
    let mut tracker = RunningAverageTracker::new();
    for s in samples.iter().rev() {
        tracker.record(*s, *s * 2.0);
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    assert!((tracker.average_ms() - mean).abs() < 1e-9);
    assert!((tracker.average_with_postproc_ms() - 2.0 * mean).abs() < 1e-9);
    assert_eq!(tracker.count(), samples.len() as u64);
}

#[test]
fn test_sample_before_start_is_rejected() {
    let mut collector = TelemetryCollector::new(
        Arc::new(StaticProbe::new(1)),
        Arc::new(ScriptedBatterySensor::with_temperatures(&[25.0])),
    );
    assert_eq!(collector.sample(timing(1, 1)), Err(TelemetryError::NotStarted));
}

#[test]
fn test_sensor_failure_uses_fallback_reading() {
    let mut collector = TelemetryCollector::with_cpu_clock(
        Arc::new(StaticProbe::new(2)),
        Arc::new(ScriptedBatterySensor::failing()),
        CpuClock::Process,
    );
    collector.start().unwrap();
    let m = collector.stop().unwrap();
    assert_eq!(m.final_temp_c, 25.0);
    assert_eq!(m.battery_pct_used, 0.0);
}

#[test]
fn test_camera_cadence_restarts_window() {
    let mut collector = TelemetryCollector::new(
        Arc::new(StaticProbe::new(2)),
        Arc::new(ScriptedBatterySensor::with_temperatures(&[30.0])),
    );
    let cadence = BenchConfig::new().with_camera_mode(3, 3600.0).cadence();
    collector.start().unwrap();

    let mut reports = Vec::new();
    for _ in 0..7 {
        collector.sample(timing(10, 12)).unwrap();
        if let Some(m) = collector.report_if_due(&cadence).unwrap() {
            reports.push(m);
        }
    }
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|m| m.frame_count == 3));
    assert_ne!(reports[0].session_id, reports[1].session_id);
    assert_eq!(collector.frame_count(), 1);

    let lines = reports[0].display_lines(&MetricsDisplay::all());
    assert!(lines.iter().any(|l| l == "Runtime: 10 ms"));
}
