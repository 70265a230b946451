//! Buffer descriptor shared between generated code and the runtime.

use crate::driver::DevicePtr;

/// Maximum number of dimensions a descriptor can describe.
pub const MAX_DIMS: usize = 4;

/// A logical N-dimensional (N <= 4) array with a host view and a device view.
///
/// The layout is `#[repr(C)]` so generated code can build descriptors across
/// an FFI boundary. The caller owns the host memory and every shape field;
/// the runtime only writes the device handle and clears dirty flags.
///
/// Unused trailing dimensions carry an extent of 0 (or 1 with a stride that
/// keeps their byte span below the outer dimension's).
#[repr(C)]
#[derive(Debug)]
pub struct BufferDescriptor {
    host: *mut u8,
    dev: DevicePtr,
    host_dirty: bool,
    dev_dirty: bool,
    /// Element count per dimension.
    pub extent: [i32; MAX_DIMS],
    /// Distance in elements between neighbours per dimension.
    pub stride: [i32; MAX_DIMS],
    /// Minimum coordinate per dimension.
    pub min: [i32; MAX_DIMS],
    /// Element size in bytes.
    pub elem_size: i32,
}

// SAFETY: the descriptor is a plain record; the host pointer is only
// dereferenced by the runtime under the caller's `set_host` contract.
unsafe impl Send for BufferDescriptor {}

impl BufferDescriptor {
    /// Create a descriptor with no host storage and no device allocation.
    pub fn new(elem_size: i32) -> Self {
        Self {
            host: std::ptr::null_mut(),
            dev: 0,
            host_dirty: false,
            dev_dirty: false,
            extent: [0; MAX_DIMS],
            stride: [0; MAX_DIMS],
            min: [0; MAX_DIMS],
            elem_size,
        }
    }

    /// Create a densely packed descriptor: dimension 0 is innermost.
    ///
    /// Extents beyond `extents.len()` are 0. At most four extents are used.
    pub fn dense(elem_size: i32, extents: &[i32]) -> Self {
        let mut desc = Self::new(elem_size);
        let extents = &extents[..extents.len().min(MAX_DIMS)];
        let mut stride: i32 = 1;
        for (d, &extent) in extents.iter().enumerate() {
            if d > 0 {
                // Strides the 32-bit layout cannot hold saturate.
                stride = stride.saturating_mul(extents[d - 1]);
            }
            desc.extent[d] = extent;
            desc.stride[d] = stride;
        }
        desc
    }

    /// Attach host storage.
    ///
    /// # Safety
    ///
    /// `host` must be null or valid for reads and writes of
    /// [`required_size`](crate::memory::required_size) bytes for as long as
    /// this descriptor is passed to the runtime, and no other reference may
    /// access that memory during a copy.
    pub unsafe fn set_host(&mut self, host: *mut u8) {
        self.host = host;
    }

    /// Host storage address (may be null).
    pub fn host_ptr(&self) -> *mut u8 {
        self.host
    }

    /// Whether host storage is attached.
    pub fn has_host(&self) -> bool {
        !self.host.is_null()
    }

    /// Device handle, `0` when unallocated.
    pub fn device_handle(&self) -> DevicePtr {
        self.dev
    }

    /// Whether a device allocation is held.
    pub fn has_device(&self) -> bool {
        self.dev != 0
    }

    pub(crate) fn set_device_handle(&mut self, dev: DevicePtr) {
        self.dev = dev;
    }

    /// Whether the host side holds data not yet copied to the device.
    pub fn host_dirty(&self) -> bool {
        self.host_dirty
    }

    /// Whether the device side holds data not yet copied to the host.
    pub fn dev_dirty(&self) -> bool {
        self.dev_dirty
    }

    /// Signal that the host copy was just written.
    pub fn mark_host_dirty(&mut self) {
        self.host_dirty = true;
    }

    /// Signal that the device copy was just written.
    pub fn mark_device_dirty(&mut self) {
        self.dev_dirty = true;
    }

    pub(crate) fn clear_host_dirty(&mut self) {
        self.host_dirty = false;
    }

    pub(crate) fn clear_dev_dirty(&mut self) {
        self.dev_dirty = false;
    }

    /// Largest per-dimension byte span, `elem_size * extent[d] * stride[d]`.
    ///
    /// Computed in 64-bit signed arithmetic; non-positive spans count as 0.
    pub fn byte_span(&self) -> u64 {
        (0..MAX_DIMS)
            .map(|d| {
                i64::from(self.elem_size)
                    .saturating_mul(i64::from(self.extent[d]))
                    .saturating_mul(i64::from(self.stride[d]))
            })
            .max()
            .unwrap_or(0)
            .max(0) as u64
    }

    /// Number of dimensions with a non-zero extent.
    pub fn dimensions(&self) -> usize {
        self.extent.iter().take_while(|&&e| e != 0).count()
    }
}
