//! Battery and thermal readings.
//!
//! On Linux and Android the kernel exposes the battery under
//! `/sys/class/power_supply/<name>/` and thermal zones under
//! `/sys/class/thermal/thermal_zone*/temp`.

use crate::error::TelemetryError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Charging state, numbered like Android's `BatteryManager.BATTERY_STATUS_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingStatus {
    #[default]
    Unknown = 1,
    Charging = 2,
    Discharging = 3,
    NotCharging = 4,
    Full = 5,
}

impl ChargingStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => ChargingStatus::Charging,
            3 => ChargingStatus::Discharging,
            4 => ChargingStatus::NotCharging,
            5 => ChargingStatus::Full,
            _ => ChargingStatus::Unknown,
        }
    }

    fn from_sysfs(s: &str) -> Self {
        match s.trim() {
            "Charging" => ChargingStatus::Charging,
            "Discharging" => ChargingStatus::Discharging,
            "Not charging" => ChargingStatus::NotCharging,
            "Full" => ChargingStatus::Full,
            _ => ChargingStatus::Unknown,
        }
    }

    pub fn is_charging(&self) -> bool {
        matches!(self, ChargingStatus::Charging | ChargingStatus::Full)
    }
}

/// One battery sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub level: i32,
    pub scale: i32,
    /// Instantaneous current in microamperes; negative while discharging
    pub current_ua: i64,
    pub voltage_mv: i32,
    /// Temperature in tenths of a degree Celsius
    pub temp_deci_c: i32,
    pub status: ChargingStatus,
}

impl BatteryReading {
    /// Reading used when no sensor is available: full battery at room temperature.
    pub fn fallback() -> Self {
        Self {
            level: 100,
            scale: 100,
            current_ua: 0,
            voltage_mv: 0,
            temp_deci_c: 250,
            status: ChargingStatus::Unknown,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.scale <= 0 {
            return 0.0;
        }
        f64::from(self.level) * 100.0 / f64::from(self.scale)
    }

    pub fn temperature_c(&self) -> f32 {
        self.temp_deci_c as f32 / 10.0
    }
}

/// Battery/thermal sensor API.
pub trait BatterySensor: Send + Sync {
    fn read(&self) -> Result<BatteryReading, TelemetryError>;
}

/// Reads the kernel power-supply and thermal sysfs trees.
#[derive(Debug, Clone)]
pub struct SysfsBatterySensor {
    power_supply_root: PathBuf,
    thermal_root: PathBuf,
}

impl Default for SysfsBatterySensor {
    fn default() -> Self {
        Self::with_roots("/sys/class/power_supply", "/sys/class/thermal")
    }
}

impl SysfsBatterySensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(power_supply_root: impl Into<PathBuf>, thermal_root: impl Into<PathBuf>) -> Self {
        Self {
            power_supply_root: power_supply_root.into(),
            thermal_root: thermal_root.into(),
        }
    }

    fn battery_dir(&self) -> Option<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.power_supply_root)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        entries.into_iter().find(|dir| {
            read_trimmed(&dir.join("type")).is_some_and(|t| t == "Battery")
                || dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("BAT") || n == "battery")
        })
    }

    /// First thermal zone temperature in tenths of a degree.
    fn thermal_zone_deci_c(&self) -> Option<i32> {
        let mut zones: Vec<PathBuf> = fs::read_dir(&self.thermal_root)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("thermal_zone"))
            })
            .collect();
        zones.sort();
        zones
            .iter()
            .find_map(|zone| read_number::<i64>(&zone.join("temp")))
            // millidegrees -> tenths
            .map(|milli| (milli / 100) as i32)
    }
}

impl BatterySensor for SysfsBatterySensor {
    fn read(&self) -> Result<BatteryReading, TelemetryError> {
        let thermal = self.thermal_zone_deci_c();
        let Some(dir) = self.battery_dir() else {
            return match thermal {
                Some(temp_deci_c) => Ok(BatteryReading {
                    temp_deci_c,
                    ..BatteryReading::fallback()
                }),
                None => Err(TelemetryError::Sensor(format!(
                    "no battery under {}",
                    self.power_supply_root.display()
                ))),
            };
        };

        let fallback = BatteryReading::fallback();
        let reading = BatteryReading {
            level: read_number::<i32>(&dir.join("capacity")).unwrap_or(fallback.level),
            scale: 100,
            current_ua: read_number::<i64>(&dir.join("current_now")).unwrap_or(0),
            voltage_mv: read_number::<i64>(&dir.join("voltage_now"))
                .map(|uv| (uv / 1000) as i32)
                .unwrap_or(0),
            temp_deci_c: read_number::<i32>(&dir.join("temp"))
                .or(thermal)
                .unwrap_or(fallback.temp_deci_c),
            status: read_trimmed(&dir.join("status"))
                .map(|s| ChargingStatus::from_sysfs(&s))
                .unwrap_or_default(),
        };
        log::debug!("Battery reading from {}: {:?}", dir.display(), reading);
        Ok(reading)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number<T: std::str::FromStr>(path: &Path) -> Option<T> {
    read_trimmed(path)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, value: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), value).unwrap();
    }

    #[test]
    fn test_reading_conversions() {
        let reading = BatteryReading {
            level: 50,
            scale: 200,
            current_ua: -1000,
            voltage_mv: 3800,
            temp_deci_c: 312,
            status: ChargingStatus::Discharging,
        };
        assert_eq!(reading.percent(), 25.0);
        assert!((reading.temperature_c() - 31.2).abs() < 1e-5);
        assert_eq!(ChargingStatus::from_code(5), ChargingStatus::Full);
        assert_eq!(ChargingStatus::from_code(0), ChargingStatus::Unknown);
    }

    #[test]
    fn test_sysfs_battery() {
        let root = TempDir::new().unwrap();
        let supply = root.path().join("power_supply");
        let bat = supply.join("BAT0");
        write(&supply.join("AC"), "type", "Mains\n");
        write(&bat, "type", "Battery\n");
        write(&bat, "capacity", "87\n");
        write(&bat, "current_now", "-450000\n");
        write(&bat, "voltage_now", "3950000\n");
        write(&bat, "temp", "301\n");
        write(&bat, "status", "Discharging\n");

        let sensor = SysfsBatterySensor::with_roots(&supply, root.path().join("thermal"));
        let reading = sensor.read().unwrap();
        assert_eq!(reading.level, 87);
        assert_eq!(reading.current_ua, -450_000);
        assert_eq!(reading.voltage_mv, 3950);
        assert_eq!(reading.temp_deci_c, 301);
        assert_eq!(reading.status, ChargingStatus::Discharging);
    }

    #[test]
    fn test_sysfs_thermal_fallback() {
        let root = TempDir::new().unwrap();
        let thermal = root.path().join("thermal");
        write(&thermal.join("thermal_zone0"), "temp", "42500\n");

        let sensor = SysfsBatterySensor::with_roots(root.path().join("none"), &thermal);
        let reading = sensor.read().unwrap();
        assert_eq!(reading.temp_deci_c, 425);
        assert_eq!(reading.level, 100);
    }

    #[test]
    fn test_sysfs_no_sensors() {
        let root = TempDir::new().unwrap();
        let sensor = SysfsBatterySensor::with_roots(root.path().join("a"), root.path().join("b"));
        assert!(matches!(sensor.read(), Err(TelemetryError::Sensor(_))));
    }
}
