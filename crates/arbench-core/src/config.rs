//! Benchmark configuration.
//!
//! [`BenchConfig`] is an immutable value handed to each component at
//! construction. Components never read global settings; a host that changes
//! its preferences builds a new `BenchConfig` and calls `reconfigure()`.
//!
//! Configs can be written in YAML or JSON:
//!
//! ```yaml
//! model: mobilenet_v2.onnx
//! resolution: { width: 224, height: 224 }
//! preferred_backend: accelerated
//! thermal_threshold_c: 35.0
//! update_frequency_frames: 30
//! update_frequency_seconds: 5.0
//! camera_mode_active: true
//! output_visualization:
//!   segmentation: argmax_color
//! ```

use crate::error::{BenchResult, ConfigError};
use crate::runtime_adapter::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Default input size used when a resolution string cannot be parsed.
pub const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 224,
    height: 224,
};

/// Default thermal switching threshold in degrees Celsius.
pub const DEFAULT_THERMAL_THRESHOLD_C: f32 = 35.0;

/// Model input dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `"width,height"` string.
    pub fn try_parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidResolution(s.to_string());
        let (w, h) = s.split_once(',').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }

    /// Parse a `"width,height"` string, falling back to 224x224.
    pub fn parse(s: &str) -> Self {
        match Self::try_parse(s) {
            Ok(res) => res,
            Err(e) => {
                log::warn!("{}; using {}", e, DEFAULT_RESOLUTION);
                DEFAULT_RESOLUTION
            }
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.width, self.height)
    }
}

/// How an output tensor is turned into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationMode {
    /// Grayscale for single-channel outputs, RGB for three or more channels
    #[default]
    Default,
    /// First channel scaled to 0-255
    BlackAndWhite,
    /// First three channels as RGB
    Color,
    /// Per-pixel argmax over channels mapped to a class palette
    ArgmaxColor,
}

impl VisualizationMode {
    /// Parse the display names used by host preference screens.
    pub fn from_display_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "BLACK AND WHITE" | "BW" => VisualizationMode::BlackAndWhite,
            "COLOR" => VisualizationMode::Color,
            "ARGMAX COLOR" | "ARGMAX_COLOR" => VisualizationMode::ArgmaxColor,
            _ => VisualizationMode::Default,
        }
    }
}

/// Which metric lines are rendered by [`RunMetrics::display_lines`](crate::telemetry::RunMetrics::display_lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsDisplay {
    pub runtime: bool,
    pub runtime_total: bool,
    pub cpu_usage: bool,
    pub cpu_usage_delta: bool,
    pub cpu_thread_time: bool,
    pub memory_usage: bool,
    pub battery_usage: bool,
    pub power_consumed: bool,
    pub temp_change: bool,
    pub temp_final: bool,
    pub current_avg: bool,
}

impl Default for MetricsDisplay {
    fn default() -> Self {
        Self::all()
    }
}

impl MetricsDisplay {
    pub fn all() -> Self {
        Self {
            runtime: true,
            runtime_total: true,
            cpu_usage: true,
            cpu_usage_delta: true,
            cpu_thread_time: true,
            memory_usage: true,
            battery_usage: true,
            power_consumed: true,
            temp_change: true,
            temp_final: true,
            current_avg: true,
        }
    }

    pub fn none() -> Self {
        Self {
            runtime: false,
            runtime_total: false,
            cpu_usage: false,
            cpu_usage_delta: false,
            cpu_thread_time: false,
            memory_usage: false,
            battery_usage: false,
            power_consumed: false,
            temp_change: false,
            temp_final: false,
            current_avg: false,
        }
    }
}

/// Top-level benchmark configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Model reference resolved by a [`ModelLoader`](crate::runtime_adapter::ModelLoader)
    pub model: Option<String>,
    /// Model input dimensions; `None` until the host sets them
    pub resolution: Option<Resolution>,
    /// Backend tried first by `SessionManager::initialize`
    pub preferred_backend: BackendKind,
    /// Above this temperature the CPU backend is used
    pub thermal_threshold_c: f32,
    /// Frames per reported metrics window in camera mode
    pub update_frequency_frames: u32,
    /// Seconds per reported metrics window in camera mode
    pub update_frequency_seconds: f64,
    /// Whether frames come from a continuous source
    pub camera_mode_active: bool,
    /// Output name to visualization mode
    pub output_visualization: HashMap<String, VisualizationMode>,
    /// Encoder output fanned out to decoders; first output when unset
    pub intermediate_output: Option<String>,
    /// Number of pooled frame buffers
    pub pool_capacity: usize,
    pub metrics_display: MetricsDisplay,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            model: None,
            resolution: None,
            preferred_backend: BackendKind::Accelerated,
            thermal_threshold_c: DEFAULT_THERMAL_THRESHOLD_C,
            update_frequency_frames: 1,
            update_frequency_seconds: 5.0,
            camera_mode_active: false,
            output_visualization: HashMap::new(),
            intermediate_output: None,
            pool_capacity: 4,
            metrics_display: MetricsDisplay::default(),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(s: &str) -> BenchResult<Self> {
        let config: BenchConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> BenchResult<Self> {
        let config: BenchConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some(Resolution::new(width, height));
        self
    }

    pub fn with_preferred_backend(mut self, backend: BackendKind) -> Self {
        self.preferred_backend = backend;
        self
    }

    pub fn with_thermal_threshold(mut self, celsius: f32) -> Self {
        self.thermal_threshold_c = celsius;
        self
    }

    pub fn with_camera_mode(mut self, frames: u32, seconds: f64) -> Self {
        self.camera_mode_active = true;
        self.update_frequency_frames = frames;
        self.update_frequency_seconds = seconds;
        self
    }

    pub fn with_visualization(mut self, output: impl Into<String>, mode: VisualizationMode) -> Self {
        self.output_visualization.insert(output.into(), mode);
        self
    }

    pub fn with_intermediate_output(mut self, name: impl Into<String>) -> Self {
        self.intermediate_output = Some(name.into());
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.thermal_threshold_c.is_finite() {
            return Err(ConfigError::Invalid(
                "thermal_threshold_c must be finite".to_string(),
            ));
        }
        if self.update_frequency_seconds.is_nan() || self.update_frequency_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "update_frequency_seconds must be non-negative".to_string(),
            ));
        }
        if let Some(res) = self.resolution {
            if res.width == 0 || res.height == 0 {
                return Err(ConfigError::InvalidResolution(res.to_string()));
            }
        }
        Ok(())
    }

    /// Input dimensions, or `DimensionsUnset`.
    pub fn require_resolution(&self) -> Result<Resolution, ConfigError> {
        self.resolution.ok_or(ConfigError::DimensionsUnset)
    }

    pub fn visualization_for(&self, output: &str) -> VisualizationMode {
        self.output_visualization
            .get(output)
            .copied()
            .unwrap_or_default()
    }

    pub fn cadence(&self) -> MetricsCadence {
        MetricsCadence {
            frames: self.update_frequency_frames,
            period: Duration::from_secs_f64(self.update_frequency_seconds.max(0.0)),
            camera_mode: self.camera_mode_active,
        }
    }
}

/// Decides when a monitoring window is reported.
///
/// Outside camera mode every frame closes the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsCadence {
    pub frames: u32,
    pub period: Duration,
    pub camera_mode: bool,
}

impl MetricsCadence {
    pub fn is_due(&self, frames_in_window: u64, elapsed: Duration) -> bool {
        !self.camera_mode || elapsed > self.period || frames_in_window >= u64::from(self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!(Resolution::parse("320,240"), Resolution::new(320, 240));
        assert_eq!(Resolution::parse(" 64 , 32 "), Resolution::new(64, 32));
        assert_eq!(Resolution::parse("garbage"), DEFAULT_RESOLUTION);
        assert_eq!(Resolution::parse("0,10"), DEFAULT_RESOLUTION);
        assert!(matches!(
            Resolution::try_parse("1x2"),
            Err(ConfigError::InvalidResolution(_))
        ));
        assert_eq!(Resolution::new(7, 9).to_string(), "7,9");
    }

    #[test]
    fn test_visualization_display_names() {
        assert_eq!(
            VisualizationMode::from_display_name("ARGMAX COLOR"),
            VisualizationMode::ArgmaxColor
        );
        assert_eq!(
            VisualizationMode::from_display_name("black and white"),
            VisualizationMode::BlackAndWhite
        );
        assert_eq!(
            VisualizationMode::from_display_name("B&W GRADIENT"),
            VisualizationMode::Default
        );
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
model: seg.onnx
resolution: { width: 256, height: 128 }
preferred_backend: cpu
thermal_threshold_c: 40.0
camera_mode_active: true
update_frequency_frames: 10
output_visualization:
  mask: argmax_color
"#;
        let config = BenchConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.model.as_deref(), Some("seg.onnx"));
        assert_eq!(config.resolution, Some(Resolution::new(256, 128)));
        assert_eq!(config.preferred_backend, BackendKind::Cpu);
        assert_eq!(config.thermal_threshold_c, 40.0);
        assert_eq!(config.update_frequency_frames, 10);
        assert_eq!(config.update_frequency_seconds, 5.0);
        assert_eq!(config.visualization_for("mask"), VisualizationMode::ArgmaxColor);
        assert_eq!(config.visualization_for("other"), VisualizationMode::Default);
    }

    #[test]
    fn test_json_config_rejects_bad_threshold() {
        let err = BenchConfig::from_json_str(r#"{"update_frequency_seconds": -1.0}"#).unwrap_err();
        assert!(err.is_configuration());

        let err = BenchConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, crate::error::BenchError::Serialization(_)));
    }

    #[test]
    fn test_require_resolution() {
        assert_eq!(
            BenchConfig::new().require_resolution(),
            Err(ConfigError::DimensionsUnset)
        );
        assert!(BenchConfig::new().with_resolution(8, 8).require_resolution().is_ok());
    }

    #[test]
    fn test_cadence() {
        let single = BenchConfig::new().cadence();
        assert!(single.is_due(0, Duration::ZERO));

        let camera = BenchConfig::new().with_camera_mode(3, 5.0).cadence();
        assert!(!camera.is_due(1, Duration::from_secs(1)));
        assert!(camera.is_due(3, Duration::from_secs(1)));
        assert!(camera.is_due(1, Duration::from_secs(6)));
    }
}
