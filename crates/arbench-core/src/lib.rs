//! arbench-core - Adaptive on-device inference benchmarking.
//!
//! ## Quick Start
//!
//! Use the [`prelude`] module for common imports:
//!
//! ```rust,ignore
//! use arbench_core::prelude::*;
//!
//! let config = BenchConfig::new().with_model("seg.onnx").with_resolution(224, 224);
//! let runner = BenchmarkRunner::new(config, RunnerDeps::onnx("models"));
//! let output = runner.run(&frame);
//! for line in output.metric_lines(&MetricsDisplay::all()) {
//!     println!("{}", line);
//! }
//! ```
//!
//! ## Module Organization
//!
//! ### Execution
//! - [`session_manager`] - Backend selection and thermal switching
//! - [`pipeline`] - Pipelined split-model execution (encoder + fan-out decoders)
//! - [`benchmark`] - Host-facing single-model benchmark loop
//!
//! ### Data Types
//! - [`frame`] - Owned RGBA frames
//! - [`pool`] - Reusable frame buffers
//! - [`config`] - Benchmark configuration
//!
//! ### Hardware
//! - [`device`] - Accelerators, battery, CPU and memory counters
//! - [`telemetry`] - Monitoring windows and run metrics
//!
//! ### Runtime
//! - [`runtime_adapter`] - Model sessions, execution providers, tensor glue
//!
//! Modules marked with `#[doc(hidden)]` are internal and may change without notice.

/// Common imports for arbench-core users.
pub mod prelude;

/// Error hierarchy: [`BenchError`](error::BenchError) and its domain errors.
pub mod error;
pub use error::{BenchError, BenchResult, ConfigError, InferenceError, PipelineError, TelemetryError};

// ============================================================================
// Execution
// ============================================================================

/// Active backend tracking and thermal switching
pub mod session_manager;

/// Encoder/decoder pipelined execution
pub mod pipeline;

/// Host-facing benchmark loop
pub mod benchmark;

// ============================================================================
// Data Types
// ============================================================================

pub mod config;

pub mod frame;

/// Fixed-capacity frame buffer pool
pub mod pool;

// ============================================================================
// Hardware & Runtime
// ============================================================================

/// Accelerator discovery and hardware sensors
pub mod device;

/// Monitoring windows and derived metrics
pub mod telemetry;

/// Model sessions and frame/tensor conversion
pub mod runtime_adapter;

// ============================================================================
// Internal Modules
// ============================================================================

/// Testing utilities (mocks, fixtures)
#[doc(hidden)]
pub mod testing;
