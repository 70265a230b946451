//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use accelrt::prelude::*;

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Module image of [`scale_module`].
pub const SCALE_IMAGE: &[u8] = b"scale";

/// `scale(buf, n, factor)`: multiplies `n` floats in place.
pub fn scale_module() -> HostModule {
    HostModule::new("scale").kernel("scale", |inv| {
        let buf = unsafe { inv.device_ptr(0)? };
        let n = unsafe { inv.param::<u32>(1)? } as usize;
        let factor = unsafe { inv.param::<f32>(2)? };
        for x in inv.slice_mut::<f32>(buf, n)? {
            *x *= factor;
        }
        Ok(())
    })
}

/// Module image of [`offset_module`].
pub const OFFSET_IMAGE: &[u8] = b"offset";

/// `offset(buf, n, delta)`: adds `delta` to `n` ints in place.
pub fn offset_module() -> HostModule {
    HostModule::new("offset").kernel("offset", |inv| {
        let buf = unsafe { inv.device_ptr(0)? };
        let n = unsafe { inv.param::<u32>(1)? } as usize;
        let delta = unsafe { inv.param::<i32>(2)? };
        for x in inv.slice_mut::<i32>(buf, n)? {
            *x += delta;
        }
        Ok(())
    })
}

/// Host driver with the test modules registered.
pub fn host_driver() -> Arc<HostDriver> {
    init_tracing();
    let driver = HostDriver::new();
    driver.register_module(scale_module());
    driver.register_module(offset_module());
    Arc::new(driver)
}

/// Runtime over a shared host driver the test can keep inspecting.
pub fn host_runtime() -> (Arc<HostDriver>, AcceleratorRuntime<Arc<HostDriver>>) {
    let driver = host_driver();
    let runtime = AcceleratorRuntime::new(Arc::clone(&driver));
    (driver, runtime)
}

/// One-dimensional descriptor over `data`, host side dirty.
pub fn host_buffer<T: bytemuck::Pod>(data: &mut [T]) -> BufferDescriptor {
    let elem_size = std::mem::size_of::<T>() as i32;
    let mut buf = BufferDescriptor::dense(elem_size, &[data.len() as i32]);
    unsafe { buf.set_host(data.as_mut_ptr().cast()) };
    buf.mark_host_dirty();
    buf
}
