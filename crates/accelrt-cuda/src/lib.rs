//! CUDA backend for accelrt
//!
//! Implements [`DeviceDriver`](accelrt_core::driver::DeviceDriver) over the
//! CUDA driver API using cudarc's raw bindings.
//!
//! # Requirements
//!
//! - The `cuda` cargo feature
//! - An NVIDIA driver providing `libcuda` at runtime
//!
//! Without the feature, [`CudaDriver::new`] reports the backend as
//! unavailable and every driver call fails with `NO_DEVICE`.
//!
//! # Example
//!
//! ```ignore
//! use accelrt_core::AcceleratorRuntime;
//! use accelrt_cuda::CudaDriver;
//!
//! let mut runtime = AcceleratorRuntime::from_env(CudaDriver::new()?)?;
//! let module = runtime.init_module(None, PTX.as_bytes())?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(feature = "cuda")]
mod driver;

#[cfg(feature = "cuda")]
pub use driver::CudaDriver;

// Placeholder implementation when CUDA is not available
#[cfg(not(feature = "cuda"))]
mod stub {
    use std::ffi::c_void;

    use accelrt_core::driver::{
        ContextHandle, DeviceDriver, DeviceId, DevicePtr, EventHandle, FunctionHandle,
        ModuleHandle,
    };
    use accelrt_core::error::{AccelError, DriverResult, DriverStatus, Result};
    use accelrt_core::launch::LaunchConfig;

    /// Stub CUDA driver when the `cuda` feature is disabled.
    pub struct CudaDriver;

    impl CudaDriver {
        /// Create fails when CUDA is not available.
        pub fn new() -> Result<Self> {
            Err(AccelError::BackendUnavailable(
                "CUDA feature not enabled".to_string(),
            ))
        }
    }

    impl DeviceDriver for CudaDriver {
        fn name(&self) -> &str {
            "cuda"
        }

        fn init(&self) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn device_count(&self) -> DriverResult<u32> {
            Ok(0)
        }

        fn device_get(&self, _ordinal: u32) -> DriverResult<DeviceId> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn context_create(&self, _device: DeviceId) -> DriverResult<ContextHandle> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn context_destroy(&self, _context: ContextHandle) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn context_synchronize(&self) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn module_load(&self, _image: &[u8]) -> DriverResult<ModuleHandle> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn module_unload(&self, _module: ModuleHandle) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn module_function(
            &self,
            _module: ModuleHandle,
            _name: &str,
        ) -> DriverResult<FunctionHandle> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn mem_alloc(&self, _bytes: usize) -> DriverResult<DevicePtr> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn mem_free(&self, _ptr: DevicePtr) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn memcpy_htod(&self, _dst: DevicePtr, _src: &[u8]) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn memcpy_dtoh(&self, _dst: &mut [u8], _src: DevicePtr) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        unsafe fn launch(
            &self,
            _function: FunctionHandle,
            _config: &LaunchConfig,
            _params: &mut [*mut c_void],
        ) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn event_create(&self) -> DriverResult<EventHandle> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn event_record(&self, _event: EventHandle) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn event_synchronize(&self, _event: EventHandle) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn event_elapsed_ms(&self, _start: EventHandle, _end: EventHandle) -> DriverResult<f32> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn event_destroy(&self, _event: EventHandle) -> DriverResult<()> {
            Err(DriverStatus::NO_DEVICE)
        }

        fn pointer_context(&self, _ptr: DevicePtr) -> DriverResult<ContextHandle> {
            Err(DriverStatus::NO_DEVICE)
        }
    }
}

#[cfg(not(feature = "cuda"))]
pub use stub::CudaDriver;

/// Check if CUDA is available at runtime.
///
/// This function returns false if:
/// - CUDA feature is not enabled
/// - CUDA libraries are not installed on the system
/// - No CUDA devices are present
///
/// It safely catches panics from cudarc when CUDA is not installed.
pub fn is_cuda_available() -> bool {
    cuda_device_count() > 0
}

/// Get CUDA device count.
///
/// Returns 0 if CUDA is not available or libraries are not installed.
pub fn cuda_device_count() -> usize {
    #[cfg(feature = "cuda")]
    {
        // cudarc panics if CUDA libraries are not found, so we catch that
        std::panic::catch_unwind(|| {
            cudarc::driver::CudaContext::device_count().unwrap_or(0) as usize
        })
        .unwrap_or(0)
    }
    #[cfg(not(feature = "cuda"))]
    {
        0
    }
}
