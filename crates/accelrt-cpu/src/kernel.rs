//! Host kernels and the modules that group them.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use accelrt_core::driver::DevicePtr;
use accelrt_core::error::{DriverResult, DriverStatus};
use accelrt_core::launch::LaunchConfig;

use crate::memory::DeviceMemory;

/// Kernel body executed on the host when launched.
pub type HostKernel = Arc<dyn Fn(&mut KernelInvocation<'_>) -> DriverResult<()> + Send + Sync>;

/// Named set of host kernels, the host counterpart of a compiled module.
///
/// The module's name is its image: loading the bytes of `name` loads this
/// module.
#[derive(Clone)]
pub struct HostModule {
    name: String,
    kernels: HashMap<String, HostKernel>,
}

impl HostModule {
    /// Create an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kernels: HashMap::new(),
        }
    }

    /// Add an entry point.
    #[must_use]
    pub fn kernel<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut KernelInvocation<'_>) -> DriverResult<()> + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(body));
        self
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image bytes that load this module.
    pub fn image(&self) -> &[u8] {
        self.name.as_bytes()
    }

    pub(crate) fn entry(&self, name: &str) -> Option<&HostKernel> {
        self.kernels.get(name)
    }
}

impl fmt::Debug for HostModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HostModule")
            .field("name", &self.name)
            .field("kernels", &names)
            .finish()
    }
}

/// What a host kernel sees of its launch.
pub struct KernelInvocation<'a> {
    config: &'a LaunchConfig,
    params: &'a [*mut c_void],
    memory: &'a mut DeviceMemory,
}

impl<'a> KernelInvocation<'a> {
    pub(crate) fn new(
        config: &'a LaunchConfig,
        params: &'a [*mut c_void],
        memory: &'a mut DeviceMemory,
    ) -> Self {
        Self {
            config,
            params,
            memory,
        }
    }

    /// Launch geometry.
    pub fn config(&self) -> &LaunchConfig {
        self.config
    }

    /// Number of parameters passed.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Read parameter `index` as a `T`.
    ///
    /// # Safety
    ///
    /// The launcher must have passed a pointer to at least
    /// `size_of::<T>()` readable bytes at this position.
    pub unsafe fn param<T: Pod>(&self, index: usize) -> DriverResult<T> {
        let ptr = *self.params.get(index).ok_or(DriverStatus::INVALID_VALUE)?;
        if ptr.is_null() {
            return Err(DriverStatus::INVALID_VALUE);
        }
        // SAFETY: validity guaranteed by the caller; alignment is not.
        Ok(unsafe { std::ptr::read_unaligned(ptr as *const T) })
    }

    /// Read parameter `index` as a device pointer.
    ///
    /// # Safety
    ///
    /// Same contract as [`param`](Self::param).
    pub unsafe fn device_ptr(&self, index: usize) -> DriverResult<DevicePtr> {
        // SAFETY: forwarded from this function's contract.
        unsafe { self.param::<DevicePtr>(index) }
    }

    /// `count` elements of device memory at `ptr`.
    pub fn slice<T: Pod>(&self, ptr: DevicePtr, count: usize) -> DriverResult<&[T]> {
        let bytes = self.memory.bytes(ptr, byte_len::<T>(count)?)?;
        bytemuck::try_cast_slice(bytes).map_err(|_| DriverStatus::INVALID_VALUE)
    }

    /// `count` mutable elements of device memory at `ptr`.
    pub fn slice_mut<T: Pod>(&mut self, ptr: DevicePtr, count: usize) -> DriverResult<&mut [T]> {
        let bytes = self.memory.bytes_mut(ptr, byte_len::<T>(count)?)?;
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| DriverStatus::INVALID_VALUE)
    }

    /// Copy `count` elements out of device memory at `ptr`.
    pub fn read<T: Pod>(&self, ptr: DevicePtr, count: usize) -> DriverResult<Vec<T>> {
        let bytes = self.memory.bytes(ptr, byte_len::<T>(count)?)?;
        Ok(bytemuck::pod_collect_to_vec(bytes))
    }
}

fn byte_len<T>(count: usize) -> DriverResult<usize> {
    count
        .checked_mul(std::mem::size_of::<T>())
        .ok_or(DriverStatus::INVALID_VALUE)
}
