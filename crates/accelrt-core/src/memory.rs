//! Device memory management for buffer descriptors.
//!
//! Sizing, lazy allocation, and release of the device view of a
//! [`BufferDescriptor`]. Allocation is idempotent and freeing an untouched
//! descriptor is a no-op, so generated code can call both unconditionally.

use crate::buffer::BufferDescriptor;
use crate::driver::DeviceDriver;
use crate::error::{AccelError, Result};
use crate::timing::CallTimer;

/// Bytes of device storage a descriptor needs.
///
/// The maximum over all dimensions of `elem_size * extent[d] * stride[d]`.
/// A zero result is a usage error, not an empty allocation.
pub fn required_size(buf: &BufferDescriptor) -> Result<usize> {
    let size = buf.byte_span();
    if size == 0 {
        return Err(AccelError::ZeroSizedBuffer {
            extent: buf.extent,
            stride: buf.stride,
            elem_size: buf.elem_size,
        });
    }
    usize::try_from(size)
        .map_err(|_| AccelError::Config(format!("buffer of {size} bytes exceeds address space")))
}

/// Allocates and frees the device view of buffer descriptors.
pub struct MemoryManager<'a, D: ?Sized> {
    driver: &'a D,
    timer: &'a CallTimer,
    validate_pointers: bool,
}

impl<'a, D: DeviceDriver + ?Sized> MemoryManager<'a, D> {
    /// Create a manager over `driver`.
    pub fn new(driver: &'a D, timer: &'a CallTimer) -> Self {
        Self {
            driver,
            timer,
            validate_pointers: false,
        }
    }

    /// Check device handles against the driver before using them.
    pub fn with_pointer_validation(mut self, enabled: bool) -> Self {
        self.validate_pointers = enabled;
        self
    }

    pub(crate) fn driver(&self) -> &'a D {
        self.driver
    }

    pub(crate) fn timer(&self) -> &'a CallTimer {
        self.timer
    }

    /// Give `buf` device storage unless it already has some.
    pub fn device_allocate(&self, buf: &mut BufferDescriptor) -> Result<()> {
        if buf.has_device() {
            return Ok(());
        }

        let size = required_size(buf)?;
        tracing::debug!(
            size,
            extent = ?buf.extent,
            stride = ?buf.stride,
            elem_size = buf.elem_size,
            "allocating device buffer"
        );

        let ptr = self.timer.time(self.driver, "dev_malloc", || {
            self.driver
                .mem_alloc(size)
                .map_err(AccelError::driver("mem_alloc"))
        })?;
        if ptr == 0 {
            return Err(AccelError::NullAllocation { size });
        }
        buf.set_device_handle(ptr);

        self.check_device_pointer(buf)
    }

    /// Release the device storage of `buf`, if any.
    pub fn device_free(&self, buf: &mut BufferDescriptor) -> Result<()> {
        if !buf.has_device() {
            return Ok(());
        }

        tracing::debug!(dev = buf.device_handle(), "freeing device buffer");
        self.check_device_pointer(buf)?;
        self.driver
            .mem_free(buf.device_handle())
            .map_err(AccelError::driver("mem_free"))?;
        buf.set_device_handle(0);
        Ok(())
    }

    /// Whether the driver recognizes the device handle of `buf`.
    ///
    /// Unallocated descriptors are trivially valid.
    pub fn validate_device_pointer(&self, buf: &BufferDescriptor) -> bool {
        if !buf.has_device() {
            return true;
        }
        match self.driver.pointer_context(buf.device_handle()) {
            Ok(_) => true,
            Err(status) => {
                tracing::warn!(
                    dev = buf.device_handle(),
                    %status,
                    "bad device pointer"
                );
                false
            }
        }
    }

    /// Fail with [`AccelError::InvalidDevicePointer`] when validation is on
    /// and the driver rejects the handle.
    pub(crate) fn check_device_pointer(&self, buf: &BufferDescriptor) -> Result<()> {
        if !self.validate_pointers || !buf.has_device() {
            return Ok(());
        }
        self.driver
            .pointer_context(buf.device_handle())
            .map(|_| ())
            .map_err(|status| AccelError::InvalidDevicePointer {
                ptr: buf.device_handle(),
                status,
            })
    }
}

/// Alignment utilities.
pub mod align {
    /// Allocation granularity of device memory.
    pub const DEVICE_ALIGNMENT: usize = 256;

    /// Align a value up to the next multiple of alignment.
    #[inline]
    pub const fn align_up(value: usize, alignment: usize) -> usize {
        let mask = alignment - 1;
        (value + mask) & !mask
    }

    /// Check if a value is aligned.
    #[inline]
    pub const fn is_aligned(value: usize, alignment: usize) -> bool {
        value & (alignment - 1) == 0
    }
}
