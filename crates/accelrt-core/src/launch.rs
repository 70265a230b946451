//! Kernel launch: entry point resolution and argument marshalling.

use std::ffi::c_void;

use bytemuck::Pod;

use crate::driver::{DeviceDriver, ModuleHandle};
use crate::error::{AccelError, Result};
use crate::timing::CallTimer;

/// Grid/block geometry of a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Grid dimensions (number of blocks in x, y, z).
    pub grid_dim: (u32, u32, u32),
    /// Block dimensions (threads per block in x, y, z).
    pub block_dim: (u32, u32, u32),
    /// Dynamic shared memory per block in bytes.
    pub shared_mem_bytes: u32,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            grid_dim: (1, 1, 1),
            block_dim: (256, 1, 1),
            shared_mem_bytes: 0,
        }
    }
}

impl LaunchConfig {
    /// Create a launch configuration.
    pub fn new(grid_dim: (u32, u32, u32), block_dim: (u32, u32, u32), shared_mem_bytes: u32) -> Self {
        Self {
            grid_dim,
            block_dim,
            shared_mem_bytes,
        }
    }

    /// One-dimensional launch covering `elements` with `block_size` threads per block.
    pub fn linear(elements: u32, block_size: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            grid_dim: (elements.div_ceil(block_size).max(1), 1, 1),
            block_dim: (block_size, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    /// Set dynamic shared memory per block.
    pub fn with_shared_mem(mut self, bytes: u32) -> Self {
        self.shared_mem_bytes = bytes;
        self
    }

    /// Number of blocks in the grid.
    pub fn total_blocks(&self) -> u64 {
        u64::from(self.grid_dim.0) * u64::from(self.grid_dim.1) * u64::from(self.grid_dim.2)
    }

    /// Threads per block.
    pub fn threads_per_block(&self) -> u64 {
        u64::from(self.block_dim.0) * u64::from(self.block_dim.1) * u64::from(self.block_dim.2)
    }

    /// Total threads in the launch.
    pub fn total_threads(&self) -> u64 {
        self.total_blocks() * self.threads_per_block()
    }
}

/// Trait for kernel parameters that can be converted to a pointer array.
///
/// Implement this for a `#[repr(C)]` parameter struct to launch with typed
/// arguments.
pub trait KernelParams {
    /// Pointers to each parameter, in kernel signature order.
    fn as_param_ptrs(&mut self) -> Vec<*mut c_void>;

    /// Size in bytes of each parameter, in kernel signature order.
    fn param_sizes(&self) -> Vec<usize>;
}

/// Owned kernel arguments with stable addresses.
///
/// Each value is copied into its own 8-byte aligned box, so the pointers
/// handed to the driver stay valid for as long as the `KernelArgs` lives.
#[derive(Debug, Default)]
pub struct KernelArgs {
    slots: Vec<Box<[u64]>>,
    sizes: Vec<usize>,
}

impl KernelArgs {
    /// Create an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument value.
    pub fn push<T: Pod>(&mut self, value: T) -> &mut Self {
        let bytes = bytemuck::bytes_of(&value);
        let mut slot = vec![0u64; bytes.len().div_ceil(8).max(1)].into_boxed_slice();
        bytemuck::cast_slice_mut::<u64, u8>(&mut slot)[..bytes.len()].copy_from_slice(bytes);
        self.slots.push(slot);
        self.sizes.push(bytes.len());
        self
    }

    /// Append a device pointer argument.
    pub fn push_device_ptr(&mut self, ptr: u64) -> &mut Self {
        self.push(ptr)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl KernelParams for KernelArgs {
    fn as_param_ptrs(&mut self) -> Vec<*mut c_void> {
        self.slots
            .iter_mut()
            .map(|slot| slot.as_mut_ptr() as *mut c_void)
            .collect()
    }

    fn param_sizes(&self) -> Vec<usize> {
        self.sizes.clone()
    }
}

/// Resolves entry points and queues launches on the default stream.
pub struct LaunchEngine<'a, D: ?Sized> {
    driver: &'a D,
    timer: &'a CallTimer,
}

impl<'a, D: DeviceDriver + ?Sized> LaunchEngine<'a, D> {
    /// Create an engine over `driver`.
    pub fn new(driver: &'a D, timer: &'a CallTimer) -> Self {
        Self { driver, timer }
    }

    /// Resolve `entry_name` in `module` and queue a launch.
    ///
    /// `arg_sizes` must have one entry per argument pointer. Argument types
    /// are not checked.
    ///
    /// # Safety
    ///
    /// Every pointer in `args` must point to a live value matching the
    /// kernel's parameter at that position.
    pub unsafe fn run(
        &self,
        module: ModuleHandle,
        entry_name: &str,
        config: &LaunchConfig,
        arg_sizes: &[usize],
        args: &mut [*mut c_void],
    ) -> Result<()> {
        if arg_sizes.len() != args.len() {
            return Err(AccelError::ArgumentCountMismatch {
                pointers: args.len(),
                sizes: arg_sizes.len(),
            });
        }

        let function = self.timer.time(self.driver, "get_kernel", || {
            self.driver
                .module_function(module, entry_name)
                .map_err(|status| AccelError::KernelNotFound {
                    name: entry_name.to_string(),
                    status,
                })
        })?;

        tracing::debug!(
            entry = entry_name,
            grid = ?config.grid_dim,
            block = ?config.block_dim,
            shared_mem = config.shared_mem_bytes,
            args = args.len(),
            "dev_run"
        );

        self.timer.time(self.driver, "dev_run", || {
            // SAFETY: forwarded from this function's contract.
            unsafe { self.driver.launch(function, config, args) }
                .map_err(AccelError::driver("launch"))
        })
    }
}
