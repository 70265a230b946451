//! Simulated device memory.
//!
//! Allocations live in host memory at fake, 256-byte aligned device
//! addresses. Any address inside a live allocation is valid for copies and
//! kernel access, as with real device pointers.

use std::collections::BTreeMap;

use accelrt_core::driver::{ContextHandle, DevicePtr};
use accelrt_core::error::{DriverResult, DriverStatus};
use accelrt_core::memory::align::{align_up, DEVICE_ALIGNMENT};

/// First address handed out. Non-zero so `0` keeps meaning "unallocated".
const BASE_ADDRESS: DevicePtr = 0x7f00_0000_0000;

struct Allocation {
    context: ContextHandle,
    len: usize,
    /// Word storage keeps every allocation 8-byte aligned for typed access.
    words: Box<[u64]>,
}

impl Allocation {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}

/// Address space of one host driver.
pub(crate) struct DeviceMemory {
    allocations: BTreeMap<DevicePtr, Allocation>,
    next_address: DevicePtr,
    in_use: usize,
    limit: Option<usize>,
}

impl DeviceMemory {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            allocations: BTreeMap::new(),
            next_address: BASE_ADDRESS,
            in_use: 0,
            limit,
        }
    }

    /// Bytes currently allocated.
    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    /// Number of live allocations.
    pub(crate) fn live(&self) -> usize {
        self.allocations.len()
    }

    pub(crate) fn allocate(&mut self, context: ContextHandle, bytes: usize) -> DriverResult<DevicePtr> {
        if bytes == 0 {
            return Err(DriverStatus::INVALID_VALUE);
        }
        if let Some(limit) = self.limit {
            if self.in_use.saturating_add(bytes) > limit {
                return Err(DriverStatus::OUT_OF_MEMORY);
            }
        }

        let ptr = self.next_address;
        // Leave a gap so off-by-one accesses never land in a neighbour.
        let span = align_up(bytes, DEVICE_ALIGNMENT) + DEVICE_ALIGNMENT;
        self.next_address += span as DevicePtr;

        self.allocations.insert(
            ptr,
            Allocation {
                context,
                len: bytes,
                words: vec![0u64; bytes.div_ceil(8)].into_boxed_slice(),
            },
        );
        self.in_use += bytes;
        Ok(ptr)
    }

    /// Free the allocation starting exactly at `ptr`.
    pub(crate) fn free(&mut self, ptr: DevicePtr) -> DriverResult<usize> {
        let allocation = self
            .allocations
            .remove(&ptr)
            .ok_or(DriverStatus::INVALID_VALUE)?;
        self.in_use -= allocation.len;
        Ok(allocation.len)
    }

    /// Drop every allocation owned by `context`.
    pub(crate) fn free_context(&mut self, context: ContextHandle) -> usize {
        let doomed: Vec<DevicePtr> = self
            .allocations
            .iter()
            .filter(|(_, a)| a.context == context)
            .map(|(&ptr, _)| ptr)
            .collect();
        for ptr in &doomed {
            if let Some(allocation) = self.allocations.remove(ptr) {
                self.in_use -= allocation.len;
            }
        }
        doomed.len()
    }

    /// Allocation containing `[ptr, ptr + len)` and the offset of `ptr` in it.
    fn locate(&self, ptr: DevicePtr, len: usize) -> DriverResult<(DevicePtr, usize)> {
        let (&base, allocation) = self
            .allocations
            .range(..=ptr)
            .next_back()
            .ok_or(DriverStatus::INVALID_VALUE)?;
        let offset = usize::try_from(ptr - base).map_err(|_| DriverStatus::INVALID_VALUE)?;
        match offset.checked_add(len) {
            Some(end) if end <= allocation.len => Ok((base, offset)),
            _ => Err(DriverStatus::INVALID_VALUE),
        }
    }

    /// Context owning the allocation that contains `ptr`.
    pub(crate) fn owner(&self, ptr: DevicePtr) -> DriverResult<ContextHandle> {
        let (base, _) = self.locate(ptr, 0)?;
        Ok(self.allocations[&base].context)
    }

    pub(crate) fn bytes(&self, ptr: DevicePtr, len: usize) -> DriverResult<&[u8]> {
        let (base, offset) = self.locate(ptr, len)?;
        Ok(&self.allocations[&base].bytes()[offset..offset + len])
    }

    pub(crate) fn bytes_mut(&mut self, ptr: DevicePtr, len: usize) -> DriverResult<&mut [u8]> {
        let (base, offset) = self.locate(ptr, len)?;
        let allocation = self
            .allocations
            .get_mut(&base)
            .ok_or(DriverStatus::INVALID_VALUE)?;
        Ok(&mut allocation.bytes_mut()[offset..offset + len])
    }
}
