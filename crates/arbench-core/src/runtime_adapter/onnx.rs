//! ONNX Runtime sessions.
//!
//! [`OrtSessionFactory`] maps each [`BackendKind`] to an execution provider:
//! NNAPI on Android or CoreML on Apple targets for `Accelerated`, and a
//! single-threaded CPU configuration for `Cpu`. Requesting `Accelerated` on
//! a device with no accelerator fails the build, which the session manager
//! treats as a permanent fallback to CPU.

use super::execution_provider::ExecutionProviderKind;
use super::{AdapterError, AdapterResult, BackendKind, ModelSession, SessionFactory, TensorMap};
use crate::device::AcceleratorQuery;
use crate::runtime_adapter::{ModelFormat, ModelSource};
use ndarray::{ArrayD, IxDyn};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::Value;
use std::borrow::Cow;
use std::sync::{Arc, Mutex};

/// ONNX Runtime session bound to one execution provider.
pub struct OrtSession {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    execution_provider: ExecutionProviderKind,
}

impl OrtSession {
    pub fn with_provider(
        model: &ModelSource,
        execution_provider: ExecutionProviderKind,
    ) -> AdapterResult<Self> {
        if model.format != ModelFormat::Onnx {
            return Err(AdapterError::BuildFailed(format!(
                "{} models are not supported by ONNX Runtime",
                model.format.as_str()
            )));
        }
        if !model.path.exists() {
            return Err(AdapterError::ModelNotFound(model.path.display().to_string()));
        }

        let _ = ort::init().commit();

        let builder = Session::builder()
            .map_err(|e| AdapterError::BuildFailed(format!("Failed to create session builder: {}", e)))?;
        let builder = Self::configure(builder, &execution_provider)?;

        let session = builder
            .commit_from_file(&model.path)
            .map_err(|e| AdapterError::BuildFailed(format!("Failed to load ONNX model: {}", e)))?;

        let input_names: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        log::info!(
            "Created ONNX session with {} execution provider for model: {}",
            execution_provider,
            model.id
        );

        Ok(Self {
            session: Mutex::new(session),
            input_names,
            output_names,
            execution_provider,
        })
    }

    fn configure(
        builder: SessionBuilder,
        provider: &ExecutionProviderKind,
    ) -> AdapterResult<SessionBuilder> {
        match provider {
            ExecutionProviderKind::Cpu(config) => {
                let level = if config.basic_optimization {
                    GraphOptimizationLevel::Level1
                } else {
                    GraphOptimizationLevel::Level3
                };
                builder
                    .with_optimization_level(level)
                    .map_err(|e| configure_failed("optimization level", e))?
                    .with_intra_threads(config.intra_op_threads)
                    .map_err(|e| configure_failed("intra-op threads", e))?
                    .with_inter_threads(config.inter_op_threads)
                    .map_err(|e| configure_failed("inter-op threads", e))
            }
            ExecutionProviderKind::Nnapi(config) => {
                let nnapi = ort::ep::NNAPI::default()
                    .with_fp16(config.use_fp16)
                    .with_disable_cpu(config.cpu_disabled)
                    .build()
                    .error_on_failure();
                log::debug!("Configuring NNAPI execution provider: {:?}", config);
                builder
                    .with_execution_providers([nnapi])
                    .map_err(|e| configure_failed("NNAPI execution provider", e))
            }
            ExecutionProviderKind::CoreML(config) => {
                let compute_units = if config.neural_engine {
                    ort::ep::coreml::ComputeUnits::CPUAndNeuralEngine
                } else {
                    ort::ep::coreml::ComputeUnits::All
                };
                let coreml = ort::ep::CoreML::default()
                    .with_subgraphs(config.use_subgraphs)
                    .with_compute_units(compute_units)
                    .build()
                    .error_on_failure();
                log::debug!("Configuring CoreML execution provider: {:?}", config);
                builder
                    .with_execution_providers([coreml])
                    .map_err(|e| configure_failed("CoreML execution provider", e))
            }
        }
    }

    pub fn execution_provider(&self) -> &ExecutionProviderKind {
        &self.execution_provider
    }
}

impl ModelSession for OrtSession {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(&self, inputs: TensorMap) -> AdapterResult<TensorMap> {
        let ort_inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = inputs
            .into_iter()
            .map(|(name, array)| {
                let value = Value::from_array(array).map_err(|e| {
                    AdapterError::InvalidInput(format!("Failed to convert tensor '{}': {}", name, e))
                })?;
                Ok((Cow::Owned(name), value.into()))
            })
            .collect::<AdapterResult<_>>()?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| AdapterError::InferenceFailed(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(SessionInputs::from(ort_inputs))
            .map_err(|e| AdapterError::InferenceFailed(format!("ONNX Runtime inference failed: {}", e)))?;

        let mut result = TensorMap::new();
        for name in &self.output_names {
            let view = outputs[name.as_str()].try_extract_array::<f32>().map_err(|e| {
                AdapterError::InferenceFailed(format!("Failed to extract output '{}': {}", name, e))
            })?;
            let dims: Vec<usize> = view.shape().to_vec();
            let data: Vec<f32> = view.iter().copied().collect();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), data).map_err(|e| {
                AdapterError::InferenceFailed(format!("Failed to convert output '{}': {}", name, e))
            })?;
            result.insert(name.clone(), array);
        }
        Ok(result)
    }
}

fn configure_failed(what: &str, e: impl std::fmt::Display) -> AdapterError {
    AdapterError::BuildFailed(format!("Failed to configure {}: {}", what, e))
}

/// Builds [`OrtSession`]s, choosing providers from the detected accelerators.
pub struct OrtSessionFactory {
    accelerators: Arc<dyn AcceleratorQuery>,
}

impl OrtSessionFactory {
    pub fn new(accelerators: Arc<dyn AcceleratorQuery>) -> Self {
        Self { accelerators }
    }
}

impl SessionFactory for OrtSessionFactory {
    fn build(
        &self,
        model: &ModelSource,
        backend: BackendKind,
    ) -> AdapterResult<Arc<dyn ModelSession>> {
        let available = self.accelerators.available_accelerators();
        let provider = ExecutionProviderKind::for_backend(backend, &available).ok_or_else(|| {
            AdapterError::BuildFailed(format!("no execution provider for {} backend", backend))
        })?;
        Ok(Arc::new(OrtSession::with_provider(model, provider)?))
    }

    fn supports(&self, format: ModelFormat) -> bool {
        format == ModelFormat::Onnx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedAccelerators;

    #[test]
    fn test_missing_model_file() {
        let model = ModelSource::new("missing.onnx", "/nonexistent/missing.onnx").unwrap();
        let result = OrtSession::with_provider(&model, ExecutionProviderKind::default());
        assert!(matches!(result, Err(AdapterError::ModelNotFound(_))));
    }

    #[test]
    fn test_torchscript_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.pt");
        std::fs::write(&path, b"stub").unwrap();
        let model = ModelSource::new("seg.pt", &path).unwrap();

        let factory = OrtSessionFactory::new(Arc::new(FixedAccelerators::none()));
        assert!(!factory.supports(ModelFormat::TorchScript));
        assert!(factory.supports(ModelFormat::Onnx));
        match factory.build(&model, BackendKind::Cpu) {
            Err(AdapterError::BuildFailed(msg)) => assert!(msg.contains("torchscript"), "{}", msg),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("torchscript model loaded"),
        }
    }

    #[test]
    fn test_accelerated_without_accelerator_fails() {
        let factory = OrtSessionFactory::new(Arc::new(FixedAccelerators::none()));
        let model = ModelSource::new("missing.onnx", "/nonexistent/missing.onnx").unwrap();
        let result = factory.build(&model, BackendKind::Accelerated);
        assert!(matches!(result, Err(AdapterError::BuildFailed(_))));
    }
}
