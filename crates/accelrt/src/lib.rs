//! # accelrt
//!
//! Host-side runtime for code generated by an array-language compiler that
//! offloads loop nests to an accelerator.
//!
//! ## Features
//!
//! - **Lazy context acquisition**, optionally sharing a context owned by the
//!   host application
//! - **Per-unit module records** so independently compiled kernel units load
//!   into one context and tear down together
//! - **Dirty-bit buffer coherence** between host and device copies
//! - **Kernel launch** by entry-point name with grid/block geometry
//! - **Backends**: CUDA (requires `cuda` feature) and a host-simulated device
//!
//! ## Quick Start
//!
//! ```ignore
//! use accelrt::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut runtime = Accelerator::builder().backend(Backend::Auto).build()?;
//!     let module = runtime.init_module(None, KERNEL_IMAGE)?;
//!
//!     let mut data = vec![1.0f32; 1024];
//!     let mut buf = BufferDescriptor::dense(4, &[1024]);
//!     unsafe { buf.set_host(data.as_mut_ptr().cast()) };
//!     buf.mark_host_dirty();
//!
//!     runtime.device_allocate(&mut buf)?;
//!     runtime.flush_to_device(&mut buf)?;
//!
//!     let mut args = KernelArgs::new();
//!     args.push_device_ptr(buf.device_handle()).push(1024u32);
//!     unsafe { runtime.run_with(module, "scale", &LaunchConfig::linear(1024, 256), &mut args)? };
//!     buf.mark_device_dirty();
//!
//!     runtime.flush_to_host(&mut buf)?;
//!     runtime.device_free(&mut buf)?;
//!     runtime.release()
//! }
//! ```
//!
//! ## Backends
//!
//! - **CPU** - host-simulated device, kernels are Rust closures (always available)
//! - **CUDA** - NVIDIA GPUs through the driver API (requires `cuda` feature)
//!
//! ```toml
//! [dependencies]
//! accelrt = { version = "0.1", features = ["cuda"] }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

use std::sync::Arc;

pub use accelrt_core::*;

pub use accelrt_cpu::{
    DriverStats, HostCall, HostDriver, HostDriverConfig, HostKernel, HostModule, KernelInvocation,
};

#[cfg(feature = "cuda")]
pub use accelrt_cuda::CudaDriver;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Accelerator, AcceleratorBuilder, Backend, DynRuntime};
    pub use accelrt_core::prelude::*;
    pub use accelrt_cpu::{HostDriver, HostModule, KernelInvocation};
}

/// Accelerator backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Best available: CUDA if present, otherwise the host device.
    #[default]
    Auto,
    /// Host-simulated device.
    Cpu,
    /// NVIDIA CUDA.
    Cuda,
}

/// Runtime over whichever driver the builder selected.
pub type DynRuntime = AcceleratorRuntime<Arc<dyn DeviceDriver>>;

/// Entry point for building a runtime with a backend chosen at run time.
pub struct Accelerator;

impl Accelerator {
    /// Create a new runtime builder.
    pub fn builder() -> AcceleratorBuilder {
        AcceleratorBuilder::new()
    }
}

/// Builder for [`DynRuntime`].
pub struct AcceleratorBuilder {
    backend: Backend,
    config: Option<RuntimeConfig>,
    host_modules: Vec<HostModule>,
}

impl AcceleratorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            backend: Backend::Auto,
            config: None,
            host_modules: Vec::new(),
        }
    }

    /// Set the backend.
    #[must_use]
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Use explicit configuration instead of reading `ACCELRT_*` variables.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register a module with the host device, should it be selected.
    #[must_use]
    pub fn host_module(mut self, module: HostModule) -> Self {
        self.host_modules.push(module);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Result<DynRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => RuntimeConfig::from_env()?,
        };

        let driver: Arc<dyn DeviceDriver> = match self.backend {
            Backend::Auto => Self::auto_driver(self.host_modules)?,
            Backend::Cpu => Self::host_driver(self.host_modules),
            #[cfg(feature = "cuda")]
            Backend::Cuda => Arc::new(accelrt_cuda::CudaDriver::new()?),
            #[cfg(not(feature = "cuda"))]
            Backend::Cuda => {
                return Err(AccelError::BackendUnavailable(
                    "CUDA feature not enabled".to_string(),
                ))
            }
        };

        Ok(AcceleratorRuntime::with_config(driver, config))
    }

    /// Auto-select the best available backend.
    fn auto_driver(host_modules: Vec<HostModule>) -> Result<Arc<dyn DeviceDriver>> {
        #[cfg(feature = "cuda")]
        if accelrt_cuda::is_cuda_available() {
            tracing::info!("Auto-selected CUDA backend");
            return Ok(Arc::new(accelrt_cuda::CudaDriver::new()?));
        }

        tracing::info!("Auto-selected CPU backend (no GPU available)");
        Ok(Self::host_driver(host_modules))
    }

    fn host_driver(host_modules: Vec<HostModule>) -> Arc<dyn DeviceDriver> {
        let driver = HostDriver::new();
        for module in host_modules {
            driver.register_module(module);
        }
        Arc::new(driver)
    }
}

impl Default for AcceleratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check availability of backends at runtime.
pub mod availability {
    /// Check if CUDA is available.
    pub fn cuda() -> bool {
        #[cfg(feature = "cuda")]
        {
            accelrt_cuda::is_cuda_available()
        }
        #[cfg(not(feature = "cuda"))]
        {
            false
        }
    }

    /// Get list of available backends.
    pub fn available_backends() -> Vec<super::Backend> {
        let mut backends = vec![super::Backend::Cpu];

        if cuda() {
            backends.push(super::Backend::Cuda);
        }

        backends
    }
}
