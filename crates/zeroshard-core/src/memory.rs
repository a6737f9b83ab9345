//! Memory - Host/Device Byte Budgets
//!
//! `MemoryBudget` holds the byte ceilings the offload policy checks against,
//! and `MemoryUsage` is the running tally of bytes resident on each side.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use serde::{Deserialize, Serialize};

use crate::device::{host_memory_capacity, Device};
use crate::error::{Error, Result};

/// Default accelerator capacity assumed when none is configured (16 GiB).
pub const DEFAULT_DEVICE_CAPACITY: usize = 16 << 30;

// =============================================================================
// MemoryBudget
// =============================================================================

/// Byte ceilings for device and host residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBudget {
    /// Bytes available on the accelerator.
    #[serde(default = "default_device_capacity")]
    pub device_capacity: usize,
    /// Bytes available on the host.
    #[serde(default = "host_memory_capacity")]
    pub host_capacity: usize,
}

fn default_device_capacity() -> usize {
    DEFAULT_DEVICE_CAPACITY
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::from_host(DEFAULT_DEVICE_CAPACITY)
    }
}

impl MemoryBudget {
    /// Creates a budget with explicit ceilings.
    #[must_use]
    pub const fn new(device_capacity: usize, host_capacity: usize) -> Self {
        Self {
            device_capacity,
            host_capacity,
        }
    }

    /// Creates a budget whose host ceiling is the machine's physical memory.
    #[must_use]
    pub fn from_host(device_capacity: usize) -> Self {
        Self::new(device_capacity, host_memory_capacity())
    }

    /// Returns the ceiling for `device`.
    #[must_use]
    pub const fn capacity(&self, device: Device) -> usize {
        match device {
            Device::Cpu => self.host_capacity,
            Device::Cuda(_) => self.device_capacity,
        }
    }

    /// Returns true if `extra` more bytes fit on `device` given `usage`.
    #[must_use]
    pub fn fits(&self, usage: &MemoryUsage, device: Device, extra: usize) -> bool {
        usage.on(device).saturating_add(extra) <= self.capacity(device)
    }
}

// =============================================================================
// MemoryUsage
// =============================================================================

/// Bytes currently resident on each side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Bytes on the accelerator.
    pub device: usize,
    /// Bytes on the host.
    pub host: usize,
}

impl MemoryUsage {
    /// Returns the bytes resident on `device`.
    #[must_use]
    pub const fn on(&self, device: Device) -> usize {
        match device {
            Device::Cpu => self.host,
            Device::Cuda(_) => self.device,
        }
    }

    /// Records `bytes` as resident on `device`.
    pub fn add(&mut self, device: Device, bytes: usize) {
        match device {
            Device::Cpu => self.host += bytes,
            Device::Cuda(_) => self.device += bytes,
        }
    }

    /// Records `bytes` as freed from `device`.
    pub fn sub(&mut self, device: Device, bytes: usize) {
        match device {
            Device::Cpu => self.host = self.host.saturating_sub(bytes),
            Device::Cuda(_) => self.device = self.device.saturating_sub(bytes),
        }
    }

    /// Records a move of `bytes` from one side to the other.
    pub fn transfer(&mut self, from: Device, to: Device, bytes: usize) {
        if from.is_cpu() == to.is_cpu() {
            return;
        }
        self.sub(from, bytes);
        self.add(to, bytes);
    }

    /// Fails when the usage exceeds the budget on either side.
    pub fn check(&self, budget: &MemoryBudget) -> Result<()> {
        if self.device > budget.device_capacity {
            return Err(Error::AllocationFailed {
                size: self.device,
                device: Device::Cuda(0),
            });
        }
        if self.host > budget.host_capacity {
            return Err(Error::AllocationFailed {
                size: self.host,
                device: Device::Cpu,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
