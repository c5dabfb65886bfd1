//! Runtime Adapter module - Interface for model inference sessions.
//!
//! A [`ModelSession`] is one loaded model bound to one backend. Sessions are
//! built by a [`SessionFactory`] and owned by the
//! [`SessionManager`](crate::session_manager::SessionManager) or the
//! split-model [`PipelineExecutor`](crate::pipeline::PipelineExecutor).
//!
//! # Module Organization
//!
//! - `execution_provider` - hardware execution providers for each backend
//! - `model_source` - resolving model references to local files
//! - `tensor` - frame to tensor and tensor to frame conversion
//! - `onnx` - ONNX Runtime sessions (feature `ort-runtime`)

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;

pub mod execution_provider;
pub mod model_source;
pub mod tensor;

#[cfg(feature = "ort-runtime")]
pub mod onnx;

pub use execution_provider::{ExecutionProviderKind, NnapiConfig};
pub use model_source::{FsModelLoader, ModelFormat, ModelLoader, ModelSource};
pub use tensor::{FrameEncoder, NchwEncoder, PaletteRenderer, TensorRenderer};

#[cfg(feature = "ort-runtime")]
pub use onnx::{OrtSession, OrtSessionFactory};

/// Named tensors passed to and returned from a session.
pub type TensorMap = HashMap<String, ArrayD<f32>>;

/// Error type for runtime adapter operations.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Session build failed: {0}")]
    BuildFailed(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Inference cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// The compute target a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Hardware accelerator (NNAPI, CoreML)
    #[default]
    Accelerated,
    /// Plain CPU execution
    Cpu,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Accelerated => "accelerated",
            BackendKind::Cpu => "cpu",
        }
    }

    /// The other backend.
    pub fn fallback(&self) -> BackendKind {
        match self {
            BackendKind::Accelerated => BackendKind::Cpu,
            BackendKind::Cpu => BackendKind::Accelerated,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded model that can be executed.
///
/// Implementations must be `Send + Sync`; a session is called from one
/// thread at a time but may move between threads.
pub trait ModelSession: Send + Sync {
    fn input_names(&self) -> &[String];

    fn output_names(&self) -> &[String];

    /// Run the model once. Blocks the calling thread.
    fn run(&self, inputs: TensorMap) -> AdapterResult<TensorMap>;

    /// Like [`run`](Self::run), but may give up with
    /// [`AdapterError::Cancelled`] once `cancel` is raised.
    ///
    /// Sessions that cannot be interrupted run to completion.
    fn run_cancellable(&self, inputs: TensorMap, cancel: &AtomicBool) -> AdapterResult<TensorMap> {
        let _ = cancel;
        self.run(inputs)
    }
}

/// A session tagged with the backend it was built for.
#[derive(Clone)]
pub enum InferenceSession {
    Accelerated(Arc<dyn ModelSession>),
    Cpu(Arc<dyn ModelSession>),
}

impl InferenceSession {
    pub fn new(backend: BackendKind, session: Arc<dyn ModelSession>) -> Self {
        match backend {
            BackendKind::Accelerated => InferenceSession::Accelerated(session),
            BackendKind::Cpu => InferenceSession::Cpu(session),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            InferenceSession::Accelerated(_) => BackendKind::Accelerated,
            InferenceSession::Cpu(_) => BackendKind::Cpu,
        }
    }

    pub fn handle(&self) -> &Arc<dyn ModelSession> {
        match self {
            InferenceSession::Accelerated(s) | InferenceSession::Cpu(s) => s,
        }
    }

    /// First declared input, the binding used for frame tensors.
    pub fn primary_input(&self) -> AdapterResult<&str> {
        self.handle()
            .input_names()
            .first()
            .map(String::as_str)
            .ok_or_else(|| AdapterError::InvalidInput("session declares no inputs".to_string()))
    }

    pub fn run(&self, inputs: TensorMap) -> AdapterResult<TensorMap> {
        self.handle().run(inputs)
    }

    pub fn run_cancellable(&self, inputs: TensorMap, cancel: &AtomicBool) -> AdapterResult<TensorMap> {
        self.handle().run_cancellable(inputs, cancel)
    }
}

impl fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceSession")
            .field("backend", &self.backend())
            .field("inputs", &self.handle().input_names())
            .field("outputs", &self.handle().output_names())
            .finish()
    }
}

/// Builds sessions for a model on a given backend.
pub trait SessionFactory: Send + Sync {
    fn build(&self, model: &ModelSource, backend: BackendKind)
        -> AdapterResult<Arc<dyn ModelSession>>;

    /// Whether [`build`](Self::build) can load models of `format` at all.
    fn supports(&self, format: ModelFormat) -> bool {
        let _ = format;
        true
    }
}

impl From<AdapterError> for crate::error::BenchError {
    fn from(e: AdapterError) -> Self {
        use crate::error::{BenchError, ConfigError, InferenceError};
        match e {
            AdapterError::ModelNotFound(s) => BenchError::Config(ConfigError::ModelNotFound(s)),
            AdapterError::BuildFailed(s) => {
                BenchError::Inference(InferenceError::Backend(format!("session build failed: {}", s)))
            }
            AdapterError::InvalidInput(s) => BenchError::Inference(InferenceError::InvalidInput(s)),
            AdapterError::InferenceFailed(s) => BenchError::Inference(InferenceError::Backend(s)),
            AdapterError::Cancelled => BenchError::Inference(InferenceError::Backend("inference cancelled".to_string())),
            AdapterError::IOError(e) => BenchError::Io(e),
        }
    }
}

impl From<AdapterError> for crate::error::InferenceError {
    fn from(e: AdapterError) -> Self {
        use crate::error::InferenceError;
        match e {
            AdapterError::InvalidInput(s) => InferenceError::InvalidInput(s),
            other => InferenceError::Backend(other.to_string()),
        }
    }
}
