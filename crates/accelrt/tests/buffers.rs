//! Allocation, sizing and dirty-flag behavior of buffer descriptors.

mod common;

use std::sync::Arc;

use accelrt::memory::required_size;
use accelrt::prelude::*;
use accelrt::{HostCall, HostDriverConfig};
use common::{host_buffer, host_runtime, SCALE_IMAGE};

#[test]
fn test_required_size_uses_largest_dimension_span() {
    let mut buf = BufferDescriptor::new(4);
    buf.extent = [4, 4, 1, 1];
    buf.stride = [1, 4, 4, 4];
    assert_eq!(required_size(&buf).unwrap(), 64);
}

#[test]
fn test_zero_sized_buffer_is_rejected() {
    let (driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();

    let mut buf = BufferDescriptor::new(4);
    let err = runtime.device_allocate(&mut buf).unwrap_err();
    assert!(matches!(err, AccelError::ZeroSizedBuffer { elem_size: 4, .. }));
    assert!(!buf.has_device());
    assert_eq!(driver.stats().allocations, 0);
}

#[test]
fn test_allocate_is_idempotent() {
    let (driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();
    let mut data = vec![0u32; 10];
    let mut buf = host_buffer(&mut data);

    runtime.device_allocate(&mut buf).unwrap();
    let handle = buf.device_handle();
    assert_ne!(handle, 0);

    runtime.device_allocate(&mut buf).unwrap();
    assert_eq!(buf.device_handle(), handle);
    assert_eq!(driver.stats().allocations, 1);
    assert_eq!(driver.memory_in_use(), 40);
}

#[test]
fn test_free_is_idempotent() {
    let (driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();
    let mut data = vec![0u8; 8];
    let mut buf = host_buffer(&mut data);

    // Never allocated.
    runtime.device_free(&mut buf).unwrap();
    assert_eq!(driver.stats().frees, 0);

    runtime.device_allocate(&mut buf).unwrap();
    runtime.device_free(&mut buf).unwrap();
    assert!(!buf.has_device());
    runtime.device_free(&mut buf).unwrap();
    assert_eq!(driver.stats().frees, 1);
}

#[test]
fn test_allocation_failure_leaves_descriptor_unallocated() {
    let driver = Arc::new(HostDriver::with_config(HostDriverConfig {
        memory_limit: Some(32),
        ..Default::default()
    }));
    driver.register_module(common::scale_module());
    let mut runtime = AcceleratorRuntime::new(Arc::clone(&driver));
    runtime.init_module(None, SCALE_IMAGE).unwrap();

    let mut data = vec![0u64; 8];
    let mut buf = host_buffer(&mut data);
    let err = runtime.device_allocate(&mut buf).unwrap_err();
    assert_eq!(err.status(), Some(DriverStatus::OUT_OF_MEMORY));
    assert!(!buf.has_device());
}

#[test]
fn test_clean_flushes_copy_nothing() {
    let (driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();
    let mut data = vec![1i32; 4];
    let mut buf = host_buffer(&mut data);
    runtime.device_allocate(&mut buf).unwrap();

    runtime.flush_to_device(&mut buf).unwrap();
    runtime.flush_to_device(&mut buf).unwrap();
    runtime.flush_to_host(&mut buf).unwrap();

    let stats = driver.stats();
    assert_eq!(stats.htod_copies, 1);
    assert_eq!(stats.dtoh_copies, 0);
    assert!(!buf.host_dirty());
    assert!(!buf.dev_dirty());
}

#[test]
fn test_flush_to_host_reads_device_data() {
    let (driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();
    let mut data = vec![0u16; 4];
    let mut buf = host_buffer(&mut data);
    runtime.device_allocate(&mut buf).unwrap();
    runtime.flush_to_device(&mut buf).unwrap();

    driver
        .write_device(buf.device_handle(), bytemuck::cast_slice(&[9u16, 8, 7, 6]))
        .unwrap();
    buf.mark_device_dirty();
    runtime.flush_to_host(&mut buf).unwrap();

    assert_eq!(data, vec![9, 8, 7, 6]);
    assert_eq!(driver.stats().dtoh_bytes, 8);
}

#[test]
fn test_dirty_flush_without_device_storage() {
    let (_driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();
    let mut data = vec![0u8; 8];
    let mut buf = host_buffer(&mut data);

    let err = runtime.flush_to_device(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        AccelError::MissingStorage {
            op: "copy_to_dev",
            host: true,
            device: false
        }
    ));
    assert!(buf.host_dirty());
}

#[test]
fn test_dirty_flush_without_host_storage() {
    let (_driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();
    let mut buf = BufferDescriptor::dense(4, &[8]);
    runtime.device_allocate(&mut buf).unwrap();
    buf.mark_device_dirty();

    let err = runtime.flush_to_host(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        AccelError::MissingStorage {
            op: "copy_to_host",
            host: false,
            device: true
        }
    ));
}

#[test]
fn test_failed_copy_keeps_flag_for_retry() {
    let (driver, mut runtime) = host_runtime();
    runtime.init_module(None, SCALE_IMAGE).unwrap();
    let mut data = vec![3u32; 4];
    let mut buf = host_buffer(&mut data);
    runtime.device_allocate(&mut buf).unwrap();

    driver.inject_failure(HostCall::MemcpyHtoD, DriverStatus::INVALID_VALUE);
    let err = runtime.flush_to_device(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        AccelError::Driver {
            op: "memcpy_htod",
            status: DriverStatus::INVALID_VALUE
        }
    ));
    assert!(buf.host_dirty());

    runtime.flush_to_device(&mut buf).unwrap();
    assert!(!buf.host_dirty());
    assert_eq!(
        driver.read_device(buf.device_handle(), 16).unwrap(),
        bytemuck::cast_slice::<u32, u8>(&[3, 3, 3, 3])
    );
}

#[test]
fn test_pointer_validation() {
    let driver = common::host_driver();
    let config = RuntimeConfig::builder()
        .validate_pointers(true)
        .build()
        .unwrap();
    let mut runtime = AcceleratorRuntime::with_config(Arc::clone(&driver), config);
    runtime.init_module(None, SCALE_IMAGE).unwrap();

    let mut data = vec![0u8; 16];
    let mut buf = host_buffer(&mut data);
    assert!(runtime.validate_device_pointer(&buf));

    runtime.device_allocate(&mut buf).unwrap();
    assert!(runtime.validate_device_pointer(&buf));

    // Free behind the runtime's back so the handle dangles.
    driver.mem_free(buf.device_handle()).unwrap();
    assert!(!runtime.validate_device_pointer(&buf));

    let err = runtime.flush_to_device(&mut buf).unwrap_err();
    assert!(matches!(err, AccelError::InvalidDevicePointer { .. }));
    let err = runtime.device_free(&mut buf).unwrap_err();
    assert!(matches!(err, AccelError::InvalidDevicePointer { .. }));
}
