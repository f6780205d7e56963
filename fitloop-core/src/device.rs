//! Compute-resource affinity.
//!
//! The device is chosen once, at configuration time, and passed explicitly to
//! whatever builds models and loaders. The harness itself never inspects it.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where forward/backward passes execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
    Mps,
}

impl Device {
    /// Confirm that this build can execute on the device.
    ///
    /// Only the CPU backend is compiled in; accelerator devices are rejected
    /// up front rather than silently falling back.
    pub fn ensure_available(self) -> Result<Self, HarnessError> {
        match self {
            Device::Cpu => Ok(self),
            other => Err(HarnessError::DeviceUnavailable(format!(
                "{other} is not supported by this build"
            ))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
            Device::Mps => write!(f, "mps"),
        }
    }
}

impl FromStr for Device {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "mps" => Ok(Device::Mps),
            "cuda" => Ok(Device::Cuda(0)),
            other => match other.strip_prefix("cuda:") {
                Some(index) => index
                    .parse()
                    .map(Device::Cuda)
                    .map_err(|_| HarnessError::config(format!("invalid cuda index: {index}"))),
                None => Err(HarnessError::config(format!("unknown device: {s}"))),
            },
        }
    }
}
