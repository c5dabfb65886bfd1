//! Point-in-time hardware readings.

use crate::device::{BatteryReading, BatterySensor, HardwareProbe};
use serde::{Deserialize, Serialize};

/// Immutable hardware snapshot taken at the start or end of a monitoring window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub cpu_time_ns: u64,
    pub thread_cpu_time_ns: u64,
    pub avail_mem_bytes: u64,
    pub battery: BatteryReading,
}

impl TelemetrySample {
    /// Read every sensor. A failing battery sensor yields the fallback reading.
    pub fn capture(probe: &dyn HardwareProbe, sensor: &dyn BatterySensor) -> Self {
        let battery = sensor.read().unwrap_or_else(|e| {
            log::warn!("{}; using fallback battery reading", e);
            BatteryReading::fallback()
        });
        Self {
            cpu_time_ns: duration_ns(probe.process_cpu_time()),
            thread_cpu_time_ns: duration_ns(probe.thread_cpu_time()),
            avail_mem_bytes: probe.available_memory_bytes(),
            battery,
        }
    }

    pub fn battery_pct(&self) -> f64 {
        self.battery.percent()
    }

    pub fn current_ua(&self) -> i64 {
        self.battery.current_ua
    }

    pub fn voltage_mv(&self) -> i32 {
        self.battery.voltage_mv
    }

    pub fn temp_deci_c(&self) -> i32 {
        self.battery.temp_deci_c
    }

    pub fn temperature_c(&self) -> f64 {
        f64::from(self.battery.temp_deci_c) / 10.0
    }
}

fn duration_ns(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
