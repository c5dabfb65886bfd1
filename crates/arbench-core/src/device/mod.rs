//! Device module - Hardware sensors and capability detection.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`capabilities`] | Compute accelerator discovery (NNAPI, CoreML) |
//! | [`battery`] | Battery and thermal readings |
//! | [`probe`] | CPU time, memory and processor count |
//! | [`cpu`] | CPU usage derived from thread CPU time |

pub mod battery;
pub mod capabilities;
pub mod cpu;
pub mod probe;

pub use battery::{BatteryReading, BatterySensor, ChargingStatus, SysfsBatterySensor};
pub use capabilities::{detect_accelerators, Accelerator, AcceleratorQuery, SystemAccelerators};
pub use cpu::{CpuClock, CpuUsageMeter};
pub use probe::{HardwareProbe, SystemProbe};
