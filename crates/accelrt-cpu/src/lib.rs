//! # accelrt CPU backend
//!
//! [`HostDriver`] simulates an accelerator in host memory. Kernels are Rust
//! closures grouped into [`HostModule`]s and registered under the module's
//! name, which doubles as its image. Useful as a fallback when no GPU is
//! present and as a deterministic backend for tests: every call is counted
//! and any call can be made to fail.
//!
//! ```ignore
//! use accelrt_cpu::{HostDriver, HostModule};
//!
//! let driver = HostDriver::new();
//! driver.register_module(HostModule::new("double").kernel("double", |inv| {
//!     let buf = unsafe { inv.device_ptr(0)? };
//!     let n = unsafe { inv.param::<u32>(1)? } as usize;
//!     inv.slice_mut::<f32>(buf, n)?.iter_mut().for_each(|x| *x *= 2.0);
//!     Ok(())
//! }));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

mod driver;
mod kernel;
mod memory;

pub use driver::{DriverStats, HostCall, HostDriver, HostDriverConfig};
pub use kernel::{HostKernel, HostModule, KernelInvocation};
