//! Dirty-flag driven host/device synchronization.
//!
//! The caller marks a side dirty after writing it; this engine is the only
//! code that clears the flags, and only once the matching copy has been
//! issued. Flushing a clean side performs no transfer, so repeated kernel
//! invocations over unchanged data cost nothing.
//!
//! A failed copy leaves its flag set: the transfer obligation is still
//! pending and a caller that does not abort can retry.

use crate::buffer::BufferDescriptor;
use crate::driver::DeviceDriver;
use crate::error::{AccelError, Result};
use crate::memory::{required_size, MemoryManager};

/// Host-to-device and device-to-host copy scheduling.
pub struct SyncEngine<'a, D: ?Sized> {
    memory: MemoryManager<'a, D>,
}

impl<'a, D: DeviceDriver + ?Sized> SyncEngine<'a, D> {
    /// Create an engine sharing the memory manager's driver and timer.
    pub fn new(memory: MemoryManager<'a, D>) -> Self {
        Self { memory }
    }

    /// Copy host data to the device if the host side is dirty.
    pub fn flush_to_device(&self, buf: &mut BufferDescriptor) -> Result<()> {
        if !buf.host_dirty() {
            return Ok(());
        }

        require_storage("copy_to_dev", buf)?;
        let size = required_size(buf)?;
        self.memory.check_device_pointer(buf)?;

        tracing::debug!(size, dev = buf.device_handle(), "copy_to_dev");

        // SAFETY: `set_host` requires the host pointer to be valid for
        // `required_size` bytes while the descriptor is in use.
        let host = unsafe { std::slice::from_raw_parts(buf.host_ptr(), size) };
        let driver = self.memory.driver();
        self.memory.timer().time(driver, "copy_to_dev", || {
            driver
                .memcpy_htod(buf.device_handle(), host)
                .map_err(AccelError::driver("memcpy_htod"))
        })?;

        buf.clear_host_dirty();
        Ok(())
    }

    /// Copy device data to the host if the device side is dirty.
    pub fn flush_to_host(&self, buf: &mut BufferDescriptor) -> Result<()> {
        if !buf.dev_dirty() {
            return Ok(());
        }

        require_storage("copy_to_host", buf)?;
        let size = required_size(buf)?;
        self.memory.check_device_pointer(buf)?;

        tracing::debug!(size, dev = buf.device_handle(), "copy_to_host");

        // SAFETY: see `flush_to_device`; the caller guarantees exclusive
        // access to the host memory for the duration of the copy.
        let host = unsafe { std::slice::from_raw_parts_mut(buf.host_ptr(), size) };
        let driver = self.memory.driver();
        let src = buf.device_handle();
        self.memory.timer().time(driver, "copy_to_host", || {
            driver
                .memcpy_dtoh(host, src)
                .map_err(AccelError::driver("memcpy_dtoh"))
        })?;

        buf.clear_dev_dirty();
        Ok(())
    }
}

fn require_storage(op: &'static str, buf: &BufferDescriptor) -> Result<()> {
    if buf.has_host() && buf.has_device() {
        Ok(())
    } else {
        Err(AccelError::MissingStorage {
            op,
            host: buf.has_host(),
            device: buf.has_device(),
        })
    }
}
