//! # accelrt core
//!
//! Host-side runtime support for code generated by an array-language
//! compiler that targets accelerators.
//!
//! Generated programs describe arrays with [`BufferDescriptor`]s and call
//! into an [`AcceleratorRuntime`] to:
//!
//! - lazily acquire one accelerator context, optionally shared with the host
//!   application
//! - load independently compiled kernel modules into it
//! - allocate and free device storage per buffer
//! - keep host and device copies coherent through dirty flags
//! - launch named kernels with grid/block geometry and raw arguments
//! - tear everything down at shutdown
//!
//! Every accelerator primitive goes through the [`DeviceDriver`] trait.
//! `accelrt-cuda` implements it over the CUDA driver API and `accelrt-cpu`
//! simulates a device in host memory.
//!
//! ## Example
//!
//! ```ignore
//! use accelrt_core::prelude::*;
//!
//! let mut runtime = AcceleratorRuntime::new(driver);
//! let module = runtime.init_module(None, image)?;
//!
//! let mut args = KernelArgs::new();
//! args.push_device_ptr(buf.device_handle()).push(n);
//! unsafe { runtime.run_with(module, "scale", &LaunchConfig::linear(n, 256), &mut args)? };
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod launch;
pub mod memory;
pub mod registry;
pub mod runtime;
pub mod sync;
pub mod timing;

#[cfg(test)]
mod mock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::buffer::{BufferDescriptor, MAX_DIMS};
    pub use crate::config::{RuntimeConfig, RuntimeConfigBuilder};
    pub use crate::context::{shared_context, SharedContext};
    pub use crate::driver::{
        ContextHandle, DeviceDriver, DeviceId, DevicePtr, EventHandle, FunctionHandle,
        ModuleHandle,
    };
    pub use crate::error::{AccelError, DriverResult, DriverStatus, OrAbort, Result};
    pub use crate::launch::{KernelArgs, KernelParams, LaunchConfig};
    pub use crate::registry::ModuleToken;
    pub use crate::runtime::AcceleratorRuntime;
}

pub use buffer::BufferDescriptor;
pub use config::RuntimeConfig;
pub use context::{shared_context, SharedContext};
pub use driver::DeviceDriver;
pub use error::{AccelError, DriverStatus, OrAbort, Result};
pub use launch::{KernelArgs, KernelParams, LaunchConfig};
pub use registry::ModuleToken;
pub use runtime::AcceleratorRuntime;
