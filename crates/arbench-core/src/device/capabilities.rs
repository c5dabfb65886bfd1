//! Compute accelerator discovery.

use serde::{Deserialize, Serialize};

/// A hardware accelerator an inference session can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    /// Android Neural Networks API
    Nnapi,
    /// Apple CoreML (Neural Engine, GPU)
    CoreML,
}

impl Accelerator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accelerator::Nnapi => "nnapi",
            Accelerator::CoreML => "coreml",
        }
    }
}

/// Lists the accelerators available on this device.
pub trait AcceleratorQuery: Send + Sync {
    fn available_accelerators(&self) -> Vec<Accelerator>;
}

/// Queries the platform the process is running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAccelerators;

impl AcceleratorQuery for SystemAccelerators {
    fn available_accelerators(&self) -> Vec<Accelerator> {
        detect_accelerators()
    }
}

/// Detect accelerators for the current platform.
///
/// NNAPI requires Android API level 27 or newer. When the API level cannot
/// be determined, NNAPI is assumed to be absent.
pub fn detect_accelerators() -> Vec<Accelerator> {
    let mut found = Vec::new();

    if cfg!(target_os = "android") && android_api_level().is_some_and(|level| level >= 27) {
        found.push(Accelerator::Nnapi);
    }

    if cfg!(any(target_os = "macos", target_os = "ios")) {
        found.push(Accelerator::CoreML);
    }

    log::debug!("Detected accelerators: {:?}", found);
    found
}

/// Android API level from the environment, if the host exposes it.
pub fn android_api_level() -> Option<u32> {
    ["ANDROID_SDK_VERSION", "ANDROID_API_LEVEL", "SDK_INT"]
        .iter()
        .find_map(|var| std::env::var(var).ok()?.trim().parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerator_names() {
        assert_eq!(Accelerator::Nnapi.as_str(), "nnapi");
        assert_eq!(serde_json::to_string(&Accelerator::CoreML).unwrap(), "\"coreml\"");
    }

    #[cfg(not(any(target_os = "android", target_os = "macos", target_os = "ios")))]
    #[test]
    fn test_desktop_linux_has_no_accelerator() {
        assert!(SystemAccelerators.available_accelerators().is_empty());
    }
}
