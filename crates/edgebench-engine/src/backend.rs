// SPDX-License-Identifier: AGPL-3.0-only

//! Backend abstraction
//!
//! A [`Backend`] turns a [`Device`] choice into concrete [`EngineOptions`]
//! (thread count plus delegates). It is selected once per interpreter build;
//! options are never swapped on a live interpreter.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;

/// Thread count used by the multi-threaded CPU backend
pub const MULTI_THREAD_COUNT: usize = 4;

/// Hardware execution path selected for a sweep iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Device {
    /// CPU, single thread
    Cpu,
    /// CPU, [`MULTI_THREAD_COUNT`] threads
    CpuMulti,
    /// GPU delegate
    Gpu,
    /// NNAPI accelerator delegate
    Nnapi,
    /// Edge TPU accelerator delegate
    #[serde(rename = "edge")]
    EdgeAccelerator,
}

impl Device {
    /// All devices in sweep order
    pub const fn all() -> &'static [Self] {
        &[
            Self::Cpu,
            Self::CpuMulti,
            Self::Gpu,
            Self::Nnapi,
            Self::EdgeAccelerator,
        ]
    }

    /// Short identifier used in file names and CLI flags
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::CpuMulti => "cpu-multi",
            Self::Gpu => "gpu",
            Self::Nnapi => "nnapi",
            Self::EdgeAccelerator => "edge",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cpu-multi" | "cpu_multi" | "cpumulti" => Ok(Self::CpuMulti),
            "gpu" => Ok(Self::Gpu),
            "nnapi" => Ok(Self::Nnapi),
            "edge" | "edgetpu" | "edge-accelerator" => Ok(Self::EdgeAccelerator),
            other => Err(format!(
                "unknown device '{other}' (expected cpu, cpu-multi, gpu, nnapi, edge)"
            )),
        }
    }
}

/// Acceleration attachment configured at interpreter build time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delegate {
    /// GPU delegate
    Gpu,
    /// NNAPI delegate
    Nnapi,
    /// Edge TPU delegate
    EdgeTpu,
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "GPU"),
            Self::Nnapi => write!(f, "NNAPI"),
            Self::EdgeTpu => write!(f, "EdgeTPU"),
        }
    }
}

/// Options handed to an [`InterpreterFactory`](crate::InterpreterFactory)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Worker threads for CPU kernels
    pub num_threads: usize,

    /// Delegates to attach, in order
    pub delegates: Vec<Delegate>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            num_threads: 1,
            delegates: Vec::new(),
        }
    }
}

/// Backend trait: one implementation per [`Device`]
pub trait Backend: Debug + Send + Sync {
    /// Device this backend represents
    fn device(&self) -> Device;

    /// Apply this backend's settings to a fresh set of options
    fn configure(&self, options: EngineOptions) -> EngineOptions;
}

/// Single-threaded CPU
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn configure(&self, options: EngineOptions) -> EngineOptions {
        EngineOptions {
            num_threads: 1,
            ..options
        }
    }
}

/// Multi-threaded CPU
#[derive(Debug, Clone, Copy)]
pub struct CpuMultiThreadBackend {
    threads: usize,
}

impl CpuMultiThreadBackend {
    /// Create with an explicit thread count
    pub const fn new(threads: usize) -> Self {
        Self { threads }
    }
}

impl Default for CpuMultiThreadBackend {
    fn default() -> Self {
        Self::new(MULTI_THREAD_COUNT)
    }
}

impl Backend for CpuMultiThreadBackend {
    fn device(&self) -> Device {
        Device::CpuMulti
    }

    fn configure(&self, options: EngineOptions) -> EngineOptions {
        EngineOptions {
            num_threads: self.threads.max(1),
            ..options
        }
    }
}

/// Backend that attaches a single delegate
#[derive(Debug, Clone, Copy)]
pub struct DelegateBackend {
    device: Device,
    delegate: Delegate,
}

impl Backend for DelegateBackend {
    fn device(&self) -> Device {
        self.device
    }

    fn configure(&self, mut options: EngineOptions) -> EngineOptions {
        options.delegates.push(self.delegate);
        options
    }
}

/// Build the backend for a device.
///
/// A new backend value is produced on every call; delegates are never
/// shared between interpreter builds.
pub fn select_backend(device: Device) -> Box<dyn Backend> {
    let backend: Box<dyn Backend> = match device {
        Device::Cpu => Box::new(CpuBackend),
        Device::CpuMulti => Box::new(CpuMultiThreadBackend::default()),
        Device::Gpu => Box::new(DelegateBackend {
            device,
            delegate: Delegate::Gpu,
        }),
        Device::Nnapi => Box::new(DelegateBackend {
            device,
            delegate: Delegate::Nnapi,
        }),
        Device::EdgeAccelerator => Box::new(DelegateBackend {
            device,
            delegate: Delegate::EdgeTpu,
        }),
    };
    tracing::debug!("Selected {backend:?} for {device}");
    backend
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_is_single_threaded() {
        let opts = select_backend(Device::Cpu).configure(EngineOptions::default());
        assert_eq!(opts.num_threads, 1);
        assert!(opts.delegates.is_empty());
    }

    #[test]
    fn test_cpu_multi_uses_four_threads() {
        let opts = select_backend(Device::CpuMulti).configure(EngineOptions::default());
        assert_eq!(opts.num_threads, MULTI_THREAD_COUNT);
        assert!(opts.delegates.is_empty());
    }

    #[test]
    fn test_delegate_backends() {
        let gpu = select_backend(Device::Gpu).configure(EngineOptions::default());
        assert_eq!(gpu.delegates, vec![Delegate::Gpu]);

        let nnapi = select_backend(Device::Nnapi).configure(EngineOptions::default());
        assert_eq!(nnapi.delegates, vec![Delegate::Nnapi]);

        let edge = select_backend(Device::EdgeAccelerator).configure(EngineOptions::default());
        assert_eq!(edge.delegates, vec![Delegate::EdgeTpu]);
    }

    #[test]
    fn test_device_round_trips_through_str() {
        for device in Device::all() {
            assert_eq!(device.as_str().parse::<Device>().unwrap(), *device);
        }
        assert!("tpu-v9".parse::<Device>().is_err());
    }
}
