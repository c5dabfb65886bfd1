//! Common imports.
//!
//! ```rust,ignore
//! use arbench_core::prelude::*;
//! ```

pub use crate::benchmark::{BenchOutput, BenchmarkRunner, RunnerDeps};
pub use crate::config::{BenchConfig, MetricsDisplay, Resolution, VisualizationMode};
pub use crate::error::{BenchError, BenchResult};
pub use crate::frame::Frame;
pub use crate::pipeline::{FrameResult, PipelineExecutor, PipelineListener};
pub use crate::pool::FramePool;
pub use crate::runtime_adapter::{BackendKind, InferenceSession, ModelSession, SessionFactory};
pub use crate::session_manager::SessionManager;
pub use crate::telemetry::RunMetrics;
