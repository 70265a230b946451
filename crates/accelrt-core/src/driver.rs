//! Accelerator driver seam.
//!
//! The runtime never talks to an accelerator API directly. Every primitive it
//! needs (initialization, device enumeration, contexts, modules, memory,
//! launches, events) goes through [`DeviceDriver`], so the same runtime state
//! machine drives the CUDA backend, the host-simulated backend, and test
//! doubles.

use std::ffi::c_void;
use std::sync::Arc;

use crate::error::DriverResult;
use crate::launch::LaunchConfig;

/// Device memory address. `0` means "no allocation".
pub type DevicePtr = u64;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw driver handle.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw driver handle.
            pub const fn as_raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Opaque handle to a driver context.
    ContextHandle
);
define_handle!(
    /// Opaque handle to a loaded module.
    ModuleHandle
);
define_handle!(
    /// Opaque handle to a resolved kernel entry point.
    FunctionHandle
);
define_handle!(
    /// Opaque handle to a timing event.
    EventHandle
);

/// Driver-side device identifier returned by [`DeviceDriver::device_get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub i32);

/// Capability set of an accelerator driver.
///
/// Methods take `&self`; implementations keep their own state behind
/// interior mutability. All calls are blocking except [`launch`], which
/// returns once the work is queued on the default stream.
///
/// [`launch`]: DeviceDriver::launch
pub trait DeviceDriver: Send + Sync {
    /// Short backend name used in log output.
    fn name(&self) -> &str;

    /// Initialize the driver. Safe to call more than once.
    fn init(&self) -> DriverResult<()>;

    /// Number of devices visible to the driver.
    fn device_count(&self) -> DriverResult<u32>;

    /// Acquire the device at `ordinal`.
    fn device_get(&self, ordinal: u32) -> DriverResult<DeviceId>;

    /// Create a context on `device` and make it current.
    fn context_create(&self, device: DeviceId) -> DriverResult<ContextHandle>;

    /// Destroy a context created by [`context_create`](DeviceDriver::context_create).
    fn context_destroy(&self, context: ContextHandle) -> DriverResult<()>;

    /// Block until all queued work in the current context has finished.
    fn context_synchronize(&self) -> DriverResult<()>;

    /// Load a compiled module image into the current context.
    fn module_load(&self, image: &[u8]) -> DriverResult<ModuleHandle>;

    /// Unload a module.
    fn module_unload(&self, module: ModuleHandle) -> DriverResult<()>;

    /// Resolve a named entry point inside `module`.
    fn module_function(&self, module: ModuleHandle, name: &str) -> DriverResult<FunctionHandle>;

    /// Allocate `bytes` of device memory.
    fn mem_alloc(&self, bytes: usize) -> DriverResult<DevicePtr>;

    /// Release a device allocation.
    fn mem_free(&self, ptr: DevicePtr) -> DriverResult<()>;

    /// Copy `src` from host memory to device address `dst`.
    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> DriverResult<()>;

    /// Copy `dst.len()` bytes from device address `src` into host memory.
    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> DriverResult<()>;

    /// Queue a kernel launch on the default stream.
    ///
    /// # Safety
    ///
    /// Each element of `params` must point to a live value whose type and
    /// layout match the corresponding kernel parameter.
    unsafe fn launch(
        &self,
        function: FunctionHandle,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> DriverResult<()>;

    /// Create a timing event.
    fn event_create(&self) -> DriverResult<EventHandle>;

    /// Record `event` on the default stream.
    fn event_record(&self, event: EventHandle) -> DriverResult<()>;

    /// Wait for `event` to complete.
    fn event_synchronize(&self, event: EventHandle) -> DriverResult<()>;

    /// Milliseconds elapsed between two recorded events.
    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> DriverResult<f32>;

    /// Destroy a timing event.
    fn event_destroy(&self, event: EventHandle) -> DriverResult<()>;

    /// Context owning the allocation at `ptr`.
    fn pointer_context(&self, ptr: DevicePtr) -> DriverResult<ContextHandle>;
}

/// A shared driver is a driver. Lets callers keep inspecting a driver that
/// a runtime owns.
impl<D: DeviceDriver + ?Sized> DeviceDriver for Arc<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn init(&self) -> DriverResult<()> {
        (**self).init()
    }

    fn device_count(&self) -> DriverResult<u32> {
        (**self).device_count()
    }

    fn device_get(&self, ordinal: u32) -> DriverResult<DeviceId> {
        (**self).device_get(ordinal)
    }

    fn context_create(&self, device: DeviceId) -> DriverResult<ContextHandle> {
        (**self).context_create(device)
    }

    fn context_destroy(&self, context: ContextHandle) -> DriverResult<()> {
        (**self).context_destroy(context)
    }

    fn context_synchronize(&self) -> DriverResult<()> {
        (**self).context_synchronize()
    }

    fn module_load(&self, image: &[u8]) -> DriverResult<ModuleHandle> {
        (**self).module_load(image)
    }

    fn module_unload(&self, module: ModuleHandle) -> DriverResult<()> {
        (**self).module_unload(module)
    }

    fn module_function(&self, module: ModuleHandle, name: &str) -> DriverResult<FunctionHandle> {
        (**self).module_function(module, name)
    }

    fn mem_alloc(&self, bytes: usize) -> DriverResult<DevicePtr> {
        (**self).mem_alloc(bytes)
    }

    fn mem_free(&self, ptr: DevicePtr) -> DriverResult<()> {
        (**self).mem_free(ptr)
    }

    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> DriverResult<()> {
        (**self).memcpy_htod(dst, src)
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> DriverResult<()> {
        (**self).memcpy_dtoh(dst, src)
    }

    unsafe fn launch(
        &self,
        function: FunctionHandle,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> DriverResult<()> {
        // SAFETY: forwarded from the caller.
        unsafe { (**self).launch(function, config, params) }
    }

    fn event_create(&self) -> DriverResult<EventHandle> {
        (**self).event_create()
    }

    fn event_record(&self, event: EventHandle) -> DriverResult<()> {
        (**self).event_record(event)
    }

    fn event_synchronize(&self, event: EventHandle) -> DriverResult<()> {
        (**self).event_synchronize(event)
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> DriverResult<f32> {
        (**self).event_elapsed_ms(start, end)
    }

    fn event_destroy(&self, event: EventHandle) -> DriverResult<()> {
        (**self).event_destroy(event)
    }

    fn pointer_context(&self, ptr: DevicePtr) -> DriverResult<ContextHandle> {
        (**self).pointer_context(ptr)
    }
}
