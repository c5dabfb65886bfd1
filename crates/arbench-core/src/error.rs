//! Unified error types for the arbench-core public API.
//!
//! Internal modules may use their own error types (for example
//! [`AdapterError`](crate::runtime_adapter::AdapterError)), but convert to
//! `BenchError` at module boundaries.
//!
//! # Error Hierarchy
//!
//! ```text
//! BenchError
//! ├── Config(ConfigError)          -- no model, bad extension, dimensions unset
//! ├── BackendUnavailable { .. }    -- a session could not be built for a backend
//! ├── Inference(InferenceError)    -- a session failed mid-run
//! ├── Pipeline(PipelineError)      -- a split-model frame failed
//! ├── Telemetry(TelemetryError)    -- monitoring lifecycle misuse, sensor failures
//! ├── Io(std::io::Error)
//! └── Serialization(String)        -- JSON/YAML parsing errors
//! ```

use crate::runtime_adapter::BackendKind;
use thiserror::Error;

/// The canonical error type for arbench-core.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A session could not be built for the given backend
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable {
        /// Backend that failed to build
        backend: BackendKind,
        /// Reason for failure
        reason: String,
    },

    /// Model inference failed
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Pipelined execution failed for a frame
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Telemetry collection failed
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error (JSON, YAML)
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration problems. Reported to callers as degenerate results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No model selected")]
    NoModelSelected,

    #[error("Unsupported model extension: {0}")]
    UnsupportedExtension(String),

    #[error("Input dimensions are not set")]
    DimensionsUnset,

    #[error("Invalid resolution '{0}', expected \"width,height\"")]
    InvalidResolution(String),

    #[error("Split-model pipeline requires at least one decoder")]
    NoDecoders,

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("No session factory for {0} models")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors during model inference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// No session has been built yet
    #[error("Session not loaded")]
    SessionNotLoaded,

    /// Invalid input data format or shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backend-specific error (ONNX Runtime, mock, ...)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Frame to tensor conversion failed
    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),

    /// Tensor to frame conversion failed
    #[error("Postprocessing failed: {0}")]
    Postprocessing(String),
}

/// Errors during pipelined split-model execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A decoder branch failed for this frame
    #[error("Decoder branch '{branch}' failed: {reason}")]
    BranchFailed {
        /// Name of the failed branch
        branch: String,
        /// Reason for failure
        reason: String,
    },

    /// A decoder branch was skipped because a sibling failed
    #[error("Decoder branch '{branch}' cancelled")]
    BranchCancelled { branch: String },

    /// The encoder stage failed for this frame
    #[error("Encoder stage failed: {0}")]
    EncoderFailed(String),

    /// The pipeline threads are gone
    #[error("Pipeline has been shut down")]
    Shutdown,
}

/// Errors from the telemetry collector and hardware sensors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Monitoring has not been started")]
    NotStarted,

    #[error("Monitoring is already running")]
    AlreadyStarted,

    #[error("Sensor read failed: {0}")]
    Sensor(String),
}

/// Result type alias for arbench-core.
pub type BenchResult<T> = Result<T, BenchError>;

impl BenchError {
    /// Create a backend-unavailable error.
    pub fn backend_unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        BenchError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Whether the error should produce a degenerate result instead of propagating.
    pub fn is_configuration(&self) -> bool {
        matches!(self, BenchError::Config(_))
    }
}

impl InferenceError {
    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        InferenceError::Backend(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        InferenceError::InvalidInput(msg.into())
    }
}

impl PipelineError {
    /// Create a branch failure error.
    pub fn branch_failed(branch: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::BranchFailed {
            branch: branch.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(e: serde_json::Error) -> Self {
        BenchError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for BenchError {
    fn from(e: serde_yaml::Error) -> Self {
        BenchError::Serialization(e.to_string())
    }
}
