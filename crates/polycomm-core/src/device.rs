//! Device - Compute Location Tags
//!
//! Identifies where a buffer lives and where a communication backend expects
//! its operands. Buffers are always host-resident in this crate; a `Device`
//! is the placement tag a backend uses to decide whether an operand must be
//! relocated before a collective runs.
//!
//! # Example
//! ```rust
//! use polycomm_core::Device;
//!
//! let cpu = Device::Cpu;
//! assert!(cpu.is_available());
//! assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
//! ```
//!
//! @version 0.1.0
//! @author `Polycomm` Development Team

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

// =============================================================================
// Device Enum
// =============================================================================

/// A compute location (host memory or an accelerator ordinal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory. Always available.
    #[default]
    Cpu,

    /// CUDA accelerator with device ordinal.
    Cuda(usize),
}

impl Device {
    /// Returns true if this device exists on the current host.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Cuda(idx) => idx < accelerator_count(),
        }
    }

    /// Returns true if this is host memory.
    #[must_use]
    pub const fn is_cpu(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Returns true if this is an accelerator.
    #[must_use]
    pub const fn is_accelerator(self) -> bool {
        !self.is_cpu()
    }

    /// Returns the device ordinal, or 0 for CPU.
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

    /// Returns the first accelerator if the host has one, else the CPU.
    #[must_use]
    pub fn best_available() -> Self {
        if accelerator_count() > 0 {
            Self::Cuda(0)
        } else {
            Self::Cpu
        }
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

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.split_once(':') {
            None if s == "cpu" => Ok(Self::Cpu),
            None if s == "cuda" => Ok(Self::Cuda(0)),
            Some(("cuda", idx)) => idx
                .parse()
                .map(Self::Cuda)
                .map_err(|_| Error::invalid_config(format!("invalid device ordinal in '{s}'"))),
            _ => Err(Error::invalid_config(format!("unknown device '{s}'"))),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Device {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Device Count Functions
// =============================================================================

/// Returns the number of CUDA devices visible on this host.
///
/// Always 0 unless built with the `cuda` feature.
#[must_use]
pub fn accelerator_count() -> usize {
    let count = cuda_device_count();
    tracing::trace!(count, "probed CUDA devices");
    count
}

#[cfg(feature = "cuda")]
fn cuda_device_count() -> usize {
    cudarc::driver::result::init()
        .and_then(|()| cudarc::driver::result::device::get_count())
        .map_or(0, |n| usize::try_from(n).unwrap_or(0))
}

#[cfg(not(feature = "cuda"))]
fn cuda_device_count() -> usize {
    0
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
        assert!(!device.is_accelerator());
        assert!(device.is_available());
        assert_eq!(device.device_type(), "cpu");
    }

    #[test]
    fn test_device_display() {
        assert_eq!(format!("{}", Device::Cpu), "cpu");
        assert_eq!(format!("{}", Device::Cuda(3)), "cuda:3");
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn test_device_default() {
        assert_eq!(Device::default(), Device::Cpu);
    }

    #[test]
    fn test_best_available_is_available() {
        assert!(Device::best_available().is_available());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_no_accelerators_without_cuda() {
        assert_eq!(accelerator_count(), 0);
        assert!(!Device::Cuda(0).is_available());
        assert_eq!(Device::best_available(), Device::Cpu);
    }

    #[test]
    fn test_device_serde() {
        let json = serde_json::to_string(&Device::Cuda(1)).unwrap();
        assert_eq!(json, "\"cuda:1\"");
        let back: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Device::Cuda(1));
    }
}
