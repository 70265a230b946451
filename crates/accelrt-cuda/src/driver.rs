//! [`DeviceDriver`] over the CUDA driver API.

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::ptr;

use cudarc::driver::sys as cuda_sys;
use parking_lot::Mutex;

use accelrt_core::driver::{
    ContextHandle, DeviceDriver, DeviceId, DevicePtr, EventHandle, FunctionHandle, ModuleHandle,
};
use accelrt_core::error::{AccelError, DriverResult, DriverStatus, Result};
use accelrt_core::launch::LaunchConfig;

/// Convert a driver result code.
fn check(result: cuda_sys::CUresult) -> DriverResult<()> {
    if result == cuda_sys::CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(DriverStatus::from_raw(result as i32))
    }
}

fn to_raw<T>(handle: *mut T) -> u64 {
    handle as usize as u64
}

fn from_raw<T>(raw: u64) -> *mut T {
    raw as usize as *mut T
}

/// CUDA driver API backend.
///
/// Contexts are device primary contexts: `context_create` retains one and
/// makes it current, `context_destroy` releases it. Launches and event
/// records use the null stream.
pub struct CudaDriver {
    /// Device each retained primary context belongs to.
    primary: Mutex<HashMap<u64, cuda_sys::CUdevice>>,
}

impl CudaDriver {
    /// Create the backend.
    ///
    /// Fails with [`AccelError::BackendUnavailable`] when the CUDA driver
    /// library cannot be loaded.
    pub fn new() -> Result<Self> {
        // cudarc panics if the CUDA library is missing, so we catch that
        let loaded = std::panic::catch_unwind(|| unsafe { cuda_sys::cuInit(0) });
        match loaded {
            Ok(result) => {
                tracing::debug!(?result, "CUDA driver library loaded");
                Ok(Self {
                    primary: Mutex::new(HashMap::new()),
                })
            }
            Err(_) => Err(AccelError::BackendUnavailable(
                "CUDA driver library not found".to_string(),
            )),
        }
    }
}

impl DeviceDriver for CudaDriver {
    fn name(&self) -> &str {
        "cuda"
    }

    fn init(&self) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuInit(0) })
    }

    fn device_count(&self) -> DriverResult<u32> {
        let mut count = 0;
        check(unsafe { cuda_sys::cuDeviceGetCount(&mut count) })?;
        Ok(u32::try_from(count).unwrap_or(0))
    }

    fn device_get(&self, ordinal: u32) -> DriverResult<DeviceId> {
        let ordinal = i32::try_from(ordinal).map_err(|_| DriverStatus::INVALID_DEVICE)?;
        let mut device: cuda_sys::CUdevice = 0;
        check(unsafe { cuda_sys::cuDeviceGet(&mut device, ordinal) })?;
        Ok(DeviceId(device))
    }

    fn context_create(&self, device: DeviceId) -> DriverResult<ContextHandle> {
        let mut context: cuda_sys::CUcontext = ptr::null_mut();
        unsafe {
            check(cuda_sys::cuDevicePrimaryCtxRetain(&mut context, device.0))?;
            if let Err(status) = check(cuda_sys::cuCtxSetCurrent(context)) {
                let _ = cuda_sys::cuDevicePrimaryCtxRelease_v2(device.0);
                return Err(status);
            }
        }
        let raw = to_raw(context);
        self.primary.lock().insert(raw, device.0);
        Ok(ContextHandle::from_raw(raw))
    }

    fn context_destroy(&self, context: ContextHandle) -> DriverResult<()> {
        let device = self
            .primary
            .lock()
            .remove(&context.as_raw())
            .ok_or(DriverStatus::INVALID_CONTEXT)?;
        check(unsafe { cuda_sys::cuDevicePrimaryCtxRelease_v2(device) })
    }

    fn context_synchronize(&self) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuCtxSynchronize() })
    }

    fn module_load(&self, image: &[u8]) -> DriverResult<ModuleHandle> {
        // PTX images are loaded as C strings.
        let owned;
        let image = if image.last() == Some(&0) {
            image
        } else {
            owned = [image, &[0u8][..]].concat();
            owned.as_slice()
        };

        let mut module: cuda_sys::CUmodule = ptr::null_mut();
        check(unsafe { cuda_sys::cuModuleLoadData(&mut module, image.as_ptr() as *const c_void) })?;
        Ok(ModuleHandle::from_raw(to_raw(module)))
    }

    fn module_unload(&self, module: ModuleHandle) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuModuleUnload(from_raw(module.as_raw())) })
    }

    fn module_function(&self, module: ModuleHandle, name: &str) -> DriverResult<FunctionHandle> {
        let name = CString::new(name).map_err(|_| DriverStatus::INVALID_VALUE)?;
        let mut function: cuda_sys::CUfunction = ptr::null_mut();
        check(unsafe {
            cuda_sys::cuModuleGetFunction(&mut function, from_raw(module.as_raw()), name.as_ptr())
        })?;
        Ok(FunctionHandle::from_raw(to_raw(function)))
    }

    fn mem_alloc(&self, bytes: usize) -> DriverResult<DevicePtr> {
        let mut ptr: cuda_sys::CUdeviceptr = 0;
        check(unsafe { cuda_sys::cuMemAlloc_v2(&mut ptr, bytes) })?;
        Ok(ptr)
    }

    fn mem_free(&self, ptr: DevicePtr) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuMemFree_v2(ptr) })
    }

    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuMemcpyHtoD_v2(dst, src.as_ptr() as *const c_void, src.len()) })
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> DriverResult<()> {
        check(unsafe {
            cuda_sys::cuMemcpyDtoH_v2(dst.as_mut_ptr() as *mut c_void, src, dst.len())
        })
    }

    unsafe fn launch(
        &self,
        function: FunctionHandle,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> DriverResult<()> {
        // Use default stream (null)
        let stream: cuda_sys::CUstream = ptr::null_mut();
        let kernel_params = if params.is_empty() {
            ptr::null_mut()
        } else {
            params.as_mut_ptr()
        };

        // SAFETY: parameter validity is the caller's contract.
        check(unsafe {
            cuda_sys::cuLaunchKernel(
                from_raw(function.as_raw()),
                config.grid_dim.0,
                config.grid_dim.1,
                config.grid_dim.2,
                config.block_dim.0,
                config.block_dim.1,
                config.block_dim.2,
                config.shared_mem_bytes,
                stream,
                kernel_params,
                ptr::null_mut(),
            )
        })
    }

    fn event_create(&self) -> DriverResult<EventHandle> {
        let mut event: cuda_sys::CUevent = ptr::null_mut();
        check(unsafe {
            cuda_sys::cuEventCreate(
                &mut event,
                cuda_sys::CUevent_flags::CU_EVENT_DEFAULT as u32,
            )
        })?;
        Ok(EventHandle::from_raw(to_raw(event)))
    }

    fn event_record(&self, event: EventHandle) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuEventRecord(from_raw(event.as_raw()), ptr::null_mut()) })
    }

    fn event_synchronize(&self, event: EventHandle) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuEventSynchronize(from_raw(event.as_raw())) })
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> DriverResult<f32> {
        let mut msec = 0.0f32;
        check(unsafe {
            cuda_sys::cuEventElapsedTime(
                &mut msec,
                from_raw(start.as_raw()),
                from_raw(end.as_raw()),
            )
        })?;
        Ok(msec)
    }

    fn event_destroy(&self, event: EventHandle) -> DriverResult<()> {
        check(unsafe { cuda_sys::cuEventDestroy_v2(from_raw(event.as_raw())) })
    }

    fn pointer_context(&self, ptr: DevicePtr) -> DriverResult<ContextHandle> {
        let mut context: cuda_sys::CUcontext = ptr::null_mut();
        check(unsafe {
            cuda_sys::cuPointerGetAttribute(
                &mut context as *mut cuda_sys::CUcontext as *mut c_void,
                cuda_sys::CUpointer_attribute::CU_POINTER_ATTRIBUTE_CONTEXT,
                ptr,
            )
        })?;
        Ok(ContextHandle::from_raw(to_raw(context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_driver_api() {
        assert_eq!(
            check(cuda_sys::CUresult::CUDA_ERROR_DEINITIALIZED),
            Err(DriverStatus::DEINITIALIZED)
        );
        assert_eq!(
            check(cuda_sys::CUresult::CUDA_ERROR_OUT_OF_MEMORY),
            Err(DriverStatus::OUT_OF_MEMORY)
        );
        assert_eq!(
            check(cuda_sys::CUresult::CUDA_ERROR_NOT_FOUND),
            Err(DriverStatus::NOT_FOUND)
        );
        assert_eq!(
            check(cuda_sys::CUresult::CUDA_ERROR_LAUNCH_FAILED),
            Err(DriverStatus::LAUNCH_FAILED)
        );
        assert!(check(cuda_sys::CUresult::CUDA_SUCCESS).is_ok());
    }

    #[test]
    fn test_handle_conversion() {
        let raw: *mut u8 = 0x1234 as *mut u8;
        assert_eq!(from_raw::<u8>(to_raw(raw)), raw);
    }
}
