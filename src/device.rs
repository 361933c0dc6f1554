//! # Device Detection and Management
//!
//! Handles selection of compute devices (CPU/GPU) and numeric precision for
//! ML inference, plus the explicit accelerator memory release that backs
//! cache eviction.

use candle_core::{DType, Device};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached best available device to avoid repeated detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    /// Automatically select the best available device
    Auto,
    /// Force CPU usage
    Cpu,
    /// Force CUDA GPU usage (will fallback to CPU if not available)
    Cuda,
    /// Force Metal GPU usage (will fallback to CPU if not available)
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

impl Default for DevicePreference {
    fn default() -> Self {
        DevicePreference::Auto
    }
}

/// Numeric precision mode for inference: memory use vs accuracy tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeType {
    Float32,
    Float16,
    BFloat16,
}

impl ComputeType {
    pub fn to_dtype(self) -> DType {
        match self {
            ComputeType::Float32 => DType::F32,
            ComputeType::Float16 => DType::F16,
            ComputeType::BFloat16 => DType::BF16,
        }
    }
}

impl std::str::FromStr for ComputeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "float32" | "f32" => Ok(ComputeType::Float32),
            "float16" | "f16" => Ok(ComputeType::Float16),
            "bfloat16" | "bf16" => Ok(ComputeType::BFloat16),
            _ => Err(format!("Unknown compute type: {}", s)),
        }
    }
}

/// Device detection and selection utilities
pub struct DeviceManager;

impl DeviceManager {
    /// Get the best available device based on preference
    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::get_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::get_cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::get_metal_device().unwrap_or(Device::Cpu),
        }
    }

    /// Get the best available device (cached)
    pub fn get_best_device() -> Device {
        BEST_DEVICE.get_or_init(Self::detect_best_device).clone()
    }

    /// Detect the best available device
    fn detect_best_device() -> Device {
        info!("Detecting best available compute device...");

        if let Some(cuda_device) = Self::get_cuda_device() {
            info!("Selected CUDA GPU for ML inference");
            return cuda_device;
        }

        if let Some(metal_device) = Self::get_metal_device() {
            info!("Selected Metal GPU for ML inference");
            return metal_device;
        }

        info!("Using CPU for ML inference (no GPU acceleration available)");
        Device::Cpu
    }

    /// Try to get a CUDA device
    fn get_cuda_device() -> Option<Device> {
        match Device::new_cuda(0) {
            Ok(device) => {
                debug!("CUDA device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("CUDA not available: {}", e);
                None
            }
        }
    }

    /// Try to get a Metal device
    fn get_metal_device() -> Option<Device> {
        match Device::new_metal(0) {
            Ok(device) => {
                debug!("Metal device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("Metal not available: {}", e);
                None
            }
        }
    }

    /// Get device information for logging
    pub fn get_device_info(device: &Device) -> &'static str {
        match device {
            Device::Cpu => "CPU",
            Device::Cuda(_) => "CUDA GPU",
            Device::Metal(_) => "Metal GPU",
        }
    }

    /// Release the accelerator memory pool after cached models are dropped.
    ///
    /// Dropping the pipelines releases their tensors; synchronizing the
    /// device afterwards forces the backend to retire in-flight work so the
    /// freed allocations are actually returned before the next request runs.
    /// No-op on CPU.
    pub fn release_memory(device: &Device) {
        match device {
            Device::Cpu => {}
            Device::Cuda(_) | Device::Metal(_) => {
                if let Err(e) = device.synchronize() {
                    warn!("Device synchronize during memory release failed: {}", e);
                }
            }
        }
    }
}

/// Create a device based on string preference with fallback
pub fn create_device_from_string(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => DeviceManager::get_device(preference),
        Err(_) => {
            warn!("Invalid device preference '{}', using auto", device_str);
            DeviceManager::get_best_device()
        }
    }
}

/// Parse a compute type string with fallback to full precision.
pub fn create_compute_type_from_string(compute_str: &str) -> ComputeType {
    match compute_str.parse::<ComputeType>() {
        Ok(compute_type) => compute_type,
        Err(_) => {
            warn!("Invalid compute type '{}', using float32", compute_str);
            ComputeType::Float32
        }
    }
}
