//! Device Residency - Where a Payload Lives
//!
//! Every shard payload carries a residency tag. The engine moves payloads
//! between the host and an accelerator as the offload policy dictates; the
//! tag is what the memory budget and the ordering of host/device copies are
//! checked against. Compute kernels are external, so an accelerator payload
//! is still addressable from the host here.
//!
//! # Example
//! ```rust
//! use zeroshard_core::Device;
//!
//! let cpu = Device::Cpu;
//! assert!(cpu.is_cpu());
//! assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use core::fmt;

use serde::{Deserialize, Serialize};
use sysinfo::System;

// =============================================================================
// Device Enum
// =============================================================================

/// Residency of a tensor payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Host memory.
    Cpu,
    /// Accelerator memory with device index.
    Cuda(usize),
}

impl Device {
    /// Returns true if this is the host.
    #[must_use]
    pub const fn is_cpu(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Returns true if this is an accelerator.
    #[must_use]
    pub const fn is_gpu(self) -> bool {
        !self.is_cpu()
    }

    /// Returns the device index for accelerators, or 0 for the host.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Cpu => 0,
            Self::Cuda(idx) => idx,
        }
    }

    /// Returns the name of this device type.
    #[must_use]
    pub const fn device_type(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda(_) => "cuda",
        }
    }

    /// Returns the accelerator with the given index.
    #[must_use]
    pub const fn cuda(index: usize) -> Self {
        Self::Cuda(index)
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

// =============================================================================
// Host Memory
// =============================================================================

/// Returns the total host memory in bytes.
#[must_use]
pub fn host_memory_capacity() -> usize {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory() as usize
}

/// Returns the currently available host memory in bytes.
#[must_use]
pub fn host_memory_available() -> usize {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory() as usize
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_device() {
        let device = Device::Cpu;
        assert!(device.is_cpu());
        assert!(!device.is_gpu());
        assert_eq!(device.device_type(), "cpu");
        assert_eq!(device.index(), 0);
    }

    #[test]
    fn test_cuda_device() {
        let device = Device::cuda(3);
        assert!(device.is_gpu());
        assert_eq!(device.index(), 3);
        assert_eq!(format!("{device}"), "cuda:3");
    }

    #[test]
    fn test_device_default() {
        assert_eq!(Device::default(), Device::Cpu);
    }

    #[test]
    fn test_host_memory_capacity() {
        assert!(host_memory_capacity() > 0);
    }
}
