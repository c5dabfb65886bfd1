//! Resolving model references to local model files.

use crate::error::{BenchResult, ConfigError};
use std::path::{Path, PathBuf};

/// On-disk model format, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Onnx,
    TorchScript,
}

impl ModelFormat {
    /// Detect the format of a model reference.
    ///
    /// References shorter than four characters count as "no model selected".
    pub fn detect(model_ref: &str) -> Result<Self, ConfigError> {
        let model_ref = model_ref.trim();
        if model_ref.len() < 4 {
            return Err(ConfigError::NoModelSelected);
        }
        let ext = Path::new(model_ref)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "onnx" | "ort" => Ok(ModelFormat::Onnx),
            "pt" | "ptl" => Ok(ModelFormat::TorchScript),
            _ => Err(ConfigError::UnsupportedExtension(ext)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Onnx => "onnx",
            ModelFormat::TorchScript => "torchscript",
        }
    }
}

/// A resolved model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    /// Reference the host used to select the model
    pub id: String,
    pub path: PathBuf,
    pub format: ModelFormat,
}

impl ModelSource {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let id = id.into();
        let format = ModelFormat::detect(&id)?;
        Ok(Self {
            id,
            path: path.into(),
            format,
        })
    }
}

/// Resolves a model reference to a local file.
pub trait ModelLoader: Send + Sync {
    fn resolve(&self, model_ref: &str) -> BenchResult<ModelSource>;
}

/// Loads models from a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsModelLoader {
    base_dir: PathBuf,
}

impl FsModelLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl ModelLoader for FsModelLoader {
    fn resolve(&self, model_ref: &str) -> BenchResult<ModelSource> {
        let source = ModelSource::new(model_ref, self.base_dir.join(model_ref.trim()))?;
        if !source.path.is_file() {
            return Err(ConfigError::ModelNotFound(source.path.display().to_string()).into());
        }
        log::debug!("Resolved model '{}' -> {}", model_ref, source.path.display());
        Ok(source)
    }
}
