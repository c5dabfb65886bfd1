//! Execution provider configuration for each backend.
//!
//! | Provider | Platform | Backend |
//! |----------|----------|---------|
//! | CPU | All | `Cpu` |
//! | NNAPI | Android | `Accelerated` |
//! | CoreML | macOS/iOS | `Accelerated` |

use super::BackendKind;
use crate::device::Accelerator;
use std::fmt;

/// Thread and optimisation settings for CPU sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuConfig {
    pub intra_op_threads: usize,
    pub inter_op_threads: usize,
    /// Use only basic graph optimisations
    pub basic_optimization: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            intra_op_threads: 1,
            inter_op_threads: 1,
            basic_optimization: true,
        }
    }
}

/// NNAPI execution provider flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NnapiConfig {
    /// Refuse to run NNAPI partitions on the NNAPI CPU reference device
    pub cpu_disabled: bool,
    /// Allow fp32 to be computed as fp16
    pub use_fp16: bool,
}

impl Default for NnapiConfig {
    fn default() -> Self {
        Self {
            cpu_disabled: true,
            use_fp16: true,
        }
    }
}

/// CoreML execution provider settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreMLConfig {
    pub neural_engine: bool,
    pub use_subgraphs: bool,
}

impl Default for CoreMLConfig {
    fn default() -> Self {
        Self {
            neural_engine: true,
            use_subgraphs: true,
        }
    }
}

/// Execution provider selection for a session build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProviderKind {
    Cpu(CpuConfig),
    Nnapi(NnapiConfig),
    CoreML(CoreMLConfig),
}

impl Default for ExecutionProviderKind {
    fn default() -> Self {
        Self::Cpu(CpuConfig::default())
    }
}

impl fmt::Display for ExecutionProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu(c) => write!(f, "cpu-{}x{}", c.intra_op_threads, c.inter_op_threads),
            Self::Nnapi(c) if c.use_fp16 => write!(f, "nnapi-fp16"),
            Self::Nnapi(_) => write!(f, "nnapi"),
            Self::CoreML(c) if c.neural_engine => write!(f, "coreml-ane"),
            Self::CoreML(_) => write!(f, "coreml"),
        }
    }
}

impl ExecutionProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu(_) => "cpu",
            Self::Nnapi(_) => "nnapi",
            Self::CoreML(_) => "coreml",
        }
    }

    pub fn requires_hardware(&self) -> bool {
        !matches!(self, Self::Cpu(_))
    }

    pub fn backend(&self) -> BackendKind {
        if self.requires_hardware() {
            BackendKind::Accelerated
        } else {
            BackendKind::Cpu
        }
    }

    /// Pick the provider for a backend given the accelerators present.
    ///
    /// Returns `None` when `Accelerated` is requested but no accelerator exists.
    pub fn for_backend(backend: BackendKind, accelerators: &[Accelerator]) -> Option<Self> {
        match backend {
            BackendKind::Cpu => Some(Self::default()),
            BackendKind::Accelerated => accelerators.iter().find_map(|acc| match acc {
                Accelerator::Nnapi => Some(Self::Nnapi(NnapiConfig::default())),
                Accelerator::CoreML => Some(Self::CoreML(CoreMLConfig::default())),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_backend() {
        assert_eq!(
            ExecutionProviderKind::for_backend(BackendKind::Cpu, &[]),
            Some(ExecutionProviderKind::Cpu(CpuConfig::default()))
        );
        assert_eq!(ExecutionProviderKind::for_backend(BackendKind::Accelerated, &[]), None);

        let ep = ExecutionProviderKind::for_backend(BackendKind::Accelerated, &[Accelerator::Nnapi])
            .unwrap();
        assert_eq!(ep.name(), "nnapi");
        assert_eq!(ep.backend(), BackendKind::Accelerated);
        assert_eq!(ep.to_string(), "nnapi-fp16");
    }

    #[test]
    fn test_defaults() {
        let cpu = CpuConfig::default();
        assert_eq!((cpu.intra_op_threads, cpu.inter_op_threads), (1, 1));
        assert!(!ExecutionProviderKind::default().requires_hardware());
    }
}
