//! Recording driver used by unit tests.

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;

use parking_lot::Mutex;

use crate::driver::{
    ContextHandle, DeviceDriver, DeviceId, DevicePtr, EventHandle, FunctionHandle, ModuleHandle,
};
use crate::error::{DriverResult, DriverStatus};
use crate::launch::LaunchConfig;

#[derive(Debug, Default, Clone)]
pub(crate) struct MockStats {
    pub inits: usize,
    pub device_gets: Vec<u32>,
    pub contexts_created: usize,
    pub contexts_destroyed: usize,
    pub synchronizations: usize,
    pub modules_loaded: usize,
    pub modules_unloaded: usize,
    pub functions_resolved: usize,
    pub allocations: usize,
    pub frees: usize,
    pub htod_copies: usize,
    pub dtoh_copies: usize,
    pub launches: usize,
    pub last_launch: Option<(LaunchConfig, usize)>,
    pub events_created: usize,
    pub events_recorded: usize,
    pub events_destroyed: usize,
}

#[derive(Default)]
struct MockState {
    stats: MockStats,
    next_handle: u64,
    memory: HashMap<DevicePtr, Vec<u8>>,
    modules: HashMap<u64, Vec<u8>>,
    fail_next: HashMap<&'static str, DriverStatus>,
}

pub(crate) struct MockDriver {
    device_count: u32,
    broken_ordinals: HashSet<u32>,
    deinitialized: Mutex<bool>,
    null_alloc: bool,
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    pub fn with_devices(device_count: u32) -> Self {
        Self {
            device_count,
            broken_ordinals: HashSet::new(),
            deinitialized: Mutex::new(false),
            null_alloc: false,
            state: Mutex::new(MockState {
                next_handle: 0x100,
                ..Default::default()
            }),
        }
    }

    pub fn broken_ordinal(mut self, ordinal: u32) -> Self {
        self.broken_ordinals.insert(ordinal);
        self
    }

    pub fn null_allocations(mut self) -> Self {
        self.null_alloc = true;
        self
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().stats.clone()
    }

    pub fn deinitialize(&self) {
        *self.deinitialized.lock() = true;
    }

    pub fn fail_next(&self, op: &'static str, status: DriverStatus) {
        self.state.lock().fail_next.insert(op, status);
    }

    pub fn device_bytes(&self, ptr: DevicePtr) -> Option<Vec<u8>> {
        self.state.lock().memory.get(&ptr).cloned()
    }

    pub fn write_device(&self, ptr: DevicePtr, bytes: &[u8]) {
        if let Some(mem) = self.state.lock().memory.get_mut(&ptr) {
            mem[..bytes.len()].copy_from_slice(bytes);
        }
    }

    fn enter(&self, op: &'static str) -> DriverResult<parking_lot::MutexGuard<'_, MockState>> {
        if *self.deinitialized.lock() {
            return Err(DriverStatus::DEINITIALIZED);
        }
        let mut state = self.state.lock();
        if let Some(status) = state.fail_next.remove(op) {
            return Err(status);
        }
        Ok(state)
    }

    fn next_handle(state: &mut MockState) -> u64 {
        state.next_handle += 0x100;
        state.next_handle
    }
}

impl DeviceDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(&self) -> DriverResult<()> {
        self.enter("init")?.stats.inits += 1;
        Ok(())
    }

    fn device_count(&self) -> DriverResult<u32> {
        self.enter("device_count")?;
        Ok(self.device_count)
    }

    fn device_get(&self, ordinal: u32) -> DriverResult<DeviceId> {
        let mut state = self.enter("device_get")?;
        state.stats.device_gets.push(ordinal);
        if ordinal >= self.device_count || self.broken_ordinals.contains(&ordinal) {
            return Err(DriverStatus::INVALID_DEVICE);
        }
        Ok(DeviceId(ordinal as i32))
    }

    fn context_create(&self, _device: DeviceId) -> DriverResult<ContextHandle> {
        let mut state = self.enter("context_create")?;
        state.stats.contexts_created += 1;
        Ok(ContextHandle::from_raw(Self::next_handle(&mut state)))
    }

    fn context_destroy(&self, _context: ContextHandle) -> DriverResult<()> {
        self.enter("context_destroy")?.stats.contexts_destroyed += 1;
        Ok(())
    }

    fn context_synchronize(&self) -> DriverResult<()> {
        self.enter("context_synchronize")?.stats.synchronizations += 1;
        Ok(())
    }

    fn module_load(&self, image: &[u8]) -> DriverResult<ModuleHandle> {
        let mut state = self.enter("module_load")?;
        if image.is_empty() {
            return Err(DriverStatus::INVALID_IMAGE);
        }
        state.stats.modules_loaded += 1;
        let handle = Self::next_handle(&mut state);
        state.modules.insert(handle, image.to_vec());
        Ok(ModuleHandle::from_raw(handle))
    }

    fn module_unload(&self, module: ModuleHandle) -> DriverResult<()> {
        let mut state = self.enter("module_unload")?;
        state
            .modules
            .remove(&module.as_raw())
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        state.stats.modules_unloaded += 1;
        Ok(())
    }

    fn module_function(&self, module: ModuleHandle, name: &str) -> DriverResult<FunctionHandle> {
        let mut state = self.enter("module_function")?;
        let image = state
            .modules
            .get(&module.as_raw())
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        // Images list their entry points separated by commas.
        let found = String::from_utf8_lossy(image).split(',').any(|e| e == name);
        if !found {
            return Err(DriverStatus::NOT_FOUND);
        }
        state.stats.functions_resolved += 1;
        Ok(FunctionHandle::from_raw(Self::next_handle(&mut state)))
    }

    fn mem_alloc(&self, bytes: usize) -> DriverResult<DevicePtr> {
        let mut state = self.enter("mem_alloc")?;
        state.stats.allocations += 1;
        if self.null_alloc {
            return Ok(0);
        }
        let ptr = Self::next_handle(&mut state);
        state.memory.insert(ptr, vec![0; bytes]);
        Ok(ptr)
    }

    fn mem_free(&self, ptr: DevicePtr) -> DriverResult<()> {
        let mut state = self.enter("mem_free")?;
        state.memory.remove(&ptr).ok_or(DriverStatus::INVALID_VALUE)?;
        state.stats.frees += 1;
        Ok(())
    }

    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> DriverResult<()> {
        let mut state = self.enter("memcpy_htod")?;
        let mem = state.memory.get_mut(&dst).ok_or(DriverStatus::INVALID_VALUE)?;
        mem[..src.len()].copy_from_slice(src);
        state.stats.htod_copies += 1;
        Ok(())
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> DriverResult<()> {
        let mut state = self.enter("memcpy_dtoh")?;
        let mem = state.memory.get(&src).ok_or(DriverStatus::INVALID_VALUE)?;
        let len = dst.len();
        dst.copy_from_slice(&mem[..len]);
        state.stats.dtoh_copies += 1;
        Ok(())
    }

    unsafe fn launch(
        &self,
        _function: FunctionHandle,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> DriverResult<()> {
        let mut state = self.enter("launch")?;
        state.stats.launches += 1;
        state.stats.last_launch = Some((config.clone(), params.len()));
        Ok(())
    }

    fn event_create(&self) -> DriverResult<EventHandle> {
        let mut state = self.enter("event_create")?;
        state.stats.events_created += 1;
        Ok(EventHandle::from_raw(Self::next_handle(&mut state)))
    }

    fn event_record(&self, _event: EventHandle) -> DriverResult<()> {
        self.enter("event_record")?.stats.events_recorded += 1;
        Ok(())
    }

    fn event_synchronize(&self, _event: EventHandle) -> DriverResult<()> {
        self.enter("event_synchronize")?;
        Ok(())
    }

    fn event_elapsed_ms(&self, _start: EventHandle, _end: EventHandle) -> DriverResult<f32> {
        self.enter("event_elapsed_ms")?;
        Ok(0.25)
    }

    fn event_destroy(&self, _event: EventHandle) -> DriverResult<()> {
        self.enter("event_destroy")?.stats.events_destroyed += 1;
        Ok(())
    }

    fn pointer_context(&self, ptr: DevicePtr) -> DriverResult<ContextHandle> {
        let state = self.enter("pointer_context")?;
        if state.memory.contains_key(&ptr) {
            Ok(ContextHandle::from_raw(1))
        } else {
            Err(DriverStatus::INVALID_VALUE)
        }
    }
}
