use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::Serialize;

/// Compute device the model is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    /// Queries ONNX Runtime for a usable CUDA execution provider.
    pub fn detect() -> Device {
        match CUDAExecutionProvider::default().is_available() {
            Ok(true) => Device::Cuda,
            Ok(false) => Device::Cpu,
            Err(e) => {
                tracing::debug!("CUDA availability check failed: {}", e);
                Device::Cpu
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    pub fn resolve(&self) -> Device {
        match self {
            DevicePreference::Auto => Device::detect(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Device::Cuda,
        }
    }
}

impl TryFrom<String> for DevicePreference {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!(
                "{} is not a supported device. Use one of `auto`, `cpu` or `cuda`.",
                other
            )),
        }
    }
}
