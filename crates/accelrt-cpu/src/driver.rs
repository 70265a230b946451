//! Host-simulated accelerator driver.

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use accelrt_core::driver::{
    ContextHandle, DeviceDriver, DeviceId, DevicePtr, EventHandle, FunctionHandle, ModuleHandle,
};
use accelrt_core::error::{DriverResult, DriverStatus};
use accelrt_core::launch::LaunchConfig;

use crate::kernel::{HostKernel, HostModule, KernelInvocation};
use crate::memory::DeviceMemory;

/// Shape of the simulated machine.
#[derive(Debug, Clone)]
pub struct HostDriverConfig {
    /// Number of devices reported.
    pub device_count: u32,
    /// Ordinals that exist but cannot be acquired.
    pub unavailable_devices: Vec<u32>,
    /// Total device memory, unlimited if `None`.
    pub memory_limit: Option<usize>,
}

impl Default for HostDriverConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            unavailable_devices: Vec::new(),
            memory_limit: None,
        }
    }
}

/// Driver entry points, used to target failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCall {
    /// [`DeviceDriver::init`]
    Init,
    /// [`DeviceDriver::device_count`]
    DeviceCount,
    /// [`DeviceDriver::device_get`]
    DeviceGet,
    /// [`DeviceDriver::context_create`]
    ContextCreate,
    /// [`DeviceDriver::context_destroy`]
    ContextDestroy,
    /// [`DeviceDriver::context_synchronize`]
    ContextSynchronize,
    /// [`DeviceDriver::module_load`]
    ModuleLoad,
    /// [`DeviceDriver::module_unload`]
    ModuleUnload,
    /// [`DeviceDriver::module_function`]
    ModuleFunction,
    /// [`DeviceDriver::mem_alloc`]
    MemAlloc,
    /// [`DeviceDriver::mem_free`]
    MemFree,
    /// [`DeviceDriver::memcpy_htod`]
    MemcpyHtoD,
    /// [`DeviceDriver::memcpy_dtoh`]
    MemcpyDtoH,
    /// [`DeviceDriver::launch`]
    Launch,
    /// Any of the event calls.
    Event,
    /// [`DeviceDriver::pointer_context`]
    PointerContext,
}

/// Call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Successful `init` calls.
    pub inits: u64,
    /// Contexts created.
    pub contexts_created: u64,
    /// Contexts destroyed.
    pub contexts_destroyed: u64,
    /// Context synchronizations.
    pub synchronizations: u64,
    /// Modules loaded.
    pub modules_loaded: u64,
    /// Modules unloaded.
    pub modules_unloaded: u64,
    /// Allocations made.
    pub allocations: u64,
    /// Allocations freed.
    pub frees: u64,
    /// Host to device copies.
    pub htod_copies: u64,
    /// Bytes copied host to device.
    pub htod_bytes: u64,
    /// Device to host copies.
    pub dtoh_copies: u64,
    /// Bytes copied device to host.
    pub dtoh_bytes: u64,
    /// Kernels launched.
    pub launches: u64,
    /// Events created.
    pub events_created: u64,
    /// Events destroyed.
    pub events_destroyed: u64,
}

struct LoadedModule {
    context: ContextHandle,
    module: HostModule,
}

struct ResolvedFunction {
    module: ModuleHandle,
    name: String,
    body: HostKernel,
}

struct HostState {
    initialized: bool,
    next_handle: u64,
    /// Live contexts, most recently created last. The last one is current.
    contexts: Vec<ContextHandle>,
    modules: HashMap<ModuleHandle, LoadedModule>,
    functions: HashMap<FunctionHandle, ResolvedFunction>,
    events: HashMap<EventHandle, Option<Instant>>,
    memory: DeviceMemory,
    fail_next: HashMap<HostCall, DriverStatus>,
    stats: DriverStats,
}

impl HostState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn current_context(&self) -> DriverResult<ContextHandle> {
        self.contexts
            .last()
            .copied()
            .ok_or(DriverStatus::INVALID_CONTEXT)
    }
}

/// Accelerator simulated in host memory.
///
/// Behaves like a driver API: it must be initialized, work needs a current
/// context, modules are looked up by image, and entry points by name.
/// Launches run the registered closure synchronously.
pub struct HostDriver {
    config: HostDriverConfig,
    unavailable: HashSet<u32>,
    registered: RwLock<HashMap<String, HostModule>>,
    state: Mutex<HostState>,
    shutdown: AtomicBool,
}

impl HostDriver {
    /// Create a driver with one device.
    pub fn new() -> Self {
        Self::with_config(HostDriverConfig::default())
    }

    /// Create a driver for a specific simulated machine.
    pub fn with_config(config: HostDriverConfig) -> Self {
        info!(
            "Initializing host driver ({} device(s), memory limit {:?})",
            config.device_count, config.memory_limit
        );

        Self {
            unavailable: config.unavailable_devices.iter().copied().collect(),
            registered: RwLock::new(HashMap::new()),
            state: Mutex::new(HostState {
                initialized: false,
                next_handle: 0,
                contexts: Vec::new(),
                modules: HashMap::new(),
                functions: HashMap::new(),
                events: HashMap::new(),
                memory: DeviceMemory::new(config.memory_limit),
                fail_next: HashMap::new(),
                stats: DriverStats::default(),
            }),
            shutdown: AtomicBool::new(false),
            config,
        }
    }

    /// Make `module` loadable by its image.
    pub fn register_module(&self, module: HostModule) {
        debug!("Registering host module '{}'", module.name());
        self.registered
            .write()
            .insert(module.name().to_string(), module);
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> DriverStats {
        self.state.lock().stats.clone()
    }

    /// Make the next call to `call` fail with `status`.
    pub fn inject_failure(&self, call: HostCall, status: DriverStatus) {
        self.state.lock().fail_next.insert(call, status);
    }

    /// Simulate process teardown: every later call reports `DEINITIALIZED`.
    pub fn begin_shutdown(&self) {
        info!("Host driver entering shutdown");
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether [`begin_shutdown`](Self::begin_shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Bytes of simulated device memory in use.
    pub fn memory_in_use(&self) -> usize {
        self.state.lock().memory.in_use()
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.live()
    }

    /// Number of live contexts.
    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    /// Number of loaded modules.
    pub fn loaded_modules(&self) -> usize {
        self.state.lock().modules.len()
    }

    /// Copy of `len` bytes of device memory at `ptr`.
    pub fn read_device(&self, ptr: DevicePtr, len: usize) -> DriverResult<Vec<u8>> {
        Ok(self.state.lock().memory.bytes(ptr, len)?.to_vec())
    }

    /// Overwrite device memory at `ptr`, bypassing the copy counters.
    pub fn write_device(&self, ptr: DevicePtr, bytes: &[u8]) -> DriverResult<()> {
        self.state
            .lock()
            .memory
            .bytes_mut(ptr, bytes.len())?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Common entry checks: shutdown, injected failure, initialization.
    fn enter(&self, call: HostCall) -> DriverResult<parking_lot::MutexGuard<'_, HostState>> {
        if self.is_shutdown() {
            return Err(DriverStatus::DEINITIALIZED);
        }
        let mut state = self.state.lock();
        if let Some(status) = state.fail_next.remove(&call) {
            debug!("Injected failure for {:?}: {}", call, status);
            return Err(status);
        }
        if call != HostCall::Init && !state.initialized {
            return Err(DriverStatus::NOT_INITIALIZED);
        }
        Ok(state)
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for HostDriver {
    fn name(&self) -> &str {
        "host"
    }

    fn init(&self) -> DriverResult<()> {
        let mut state = self.enter(HostCall::Init)?;
        state.initialized = true;
        state.stats.inits += 1;
        Ok(())
    }

    fn device_count(&self) -> DriverResult<u32> {
        let _state = self.enter(HostCall::DeviceCount)?;
        Ok(self.config.device_count)
    }

    fn device_get(&self, ordinal: u32) -> DriverResult<DeviceId> {
        let _state = self.enter(HostCall::DeviceGet)?;
        if ordinal >= self.config.device_count || self.unavailable.contains(&ordinal) {
            return Err(DriverStatus::INVALID_DEVICE);
        }
        i32::try_from(ordinal)
            .map(DeviceId)
            .map_err(|_| DriverStatus::INVALID_DEVICE)
    }

    fn context_create(&self, device: DeviceId) -> DriverResult<ContextHandle> {
        let mut state = self.enter(HostCall::ContextCreate)?;
        let valid = u32::try_from(device.0).is_ok_and(|d| d < self.config.device_count);
        if !valid {
            return Err(DriverStatus::INVALID_DEVICE);
        }
        let context = ContextHandle::from_raw(state.handle());
        state.contexts.push(context);
        state.stats.contexts_created += 1;
        debug!("Created host context {:#x} on device {}", context.as_raw(), device.0);
        Ok(context)
    }

    fn context_destroy(&self, context: ContextHandle) -> DriverResult<()> {
        let mut state = self.enter(HostCall::ContextDestroy)?;
        let index = state
            .contexts
            .iter()
            .position(|&c| c == context)
            .ok_or(DriverStatus::INVALID_CONTEXT)?;
        state.contexts.remove(index);

        // Everything the context owned goes with it.
        let freed = state.memory.free_context(context);
        let orphaned: Vec<ModuleHandle> = state
            .modules
            .iter()
            .filter(|(_, m)| m.context == context)
            .map(|(&h, _)| h)
            .collect();
        for handle in &orphaned {
            state.modules.remove(handle);
        }
        state
            .functions
            .retain(|_, f| !orphaned.contains(&f.module));

        state.stats.contexts_destroyed += 1;
        debug!(
            "Destroyed host context {:#x} ({} allocation(s), {} module(s) released)",
            context.as_raw(),
            freed,
            orphaned.len()
        );
        Ok(())
    }

    fn context_synchronize(&self) -> DriverResult<()> {
        let mut state = self.enter(HostCall::ContextSynchronize)?;
        state.current_context()?;
        // Launches run to completion, so there is never queued work.
        state.stats.synchronizations += 1;
        Ok(())
    }

    fn module_load(&self, image: &[u8]) -> DriverResult<ModuleHandle> {
        let mut state = self.enter(HostCall::ModuleLoad)?;
        let context = state.current_context()?;
        let name = std::str::from_utf8(image).map_err(|_| DriverStatus::INVALID_IMAGE)?;
        let module = self
            .registered
            .read()
            .get(name)
            .cloned()
            .ok_or(DriverStatus::INVALID_IMAGE)?;

        let handle = ModuleHandle::from_raw(state.handle());
        state.modules.insert(handle, LoadedModule { context, module });
        state.stats.modules_loaded += 1;
        debug!("Loaded host module '{}' as {:#x}", name, handle.as_raw());
        Ok(handle)
    }

    fn module_unload(&self, module: ModuleHandle) -> DriverResult<()> {
        let mut state = self.enter(HostCall::ModuleUnload)?;
        state
            .modules
            .remove(&module)
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        state.functions.retain(|_, f| f.module != module);
        state.stats.modules_unloaded += 1;
        Ok(())
    }

    fn module_function(&self, module: ModuleHandle, name: &str) -> DriverResult<FunctionHandle> {
        let mut state = self.enter(HostCall::ModuleFunction)?;
        let body = state
            .modules
            .get(&module)
            .ok_or(DriverStatus::INVALID_HANDLE)?
            .module
            .entry(name)
            .cloned()
            .ok_or(DriverStatus::NOT_FOUND)?;

        let handle = FunctionHandle::from_raw(state.handle());
        state.functions.insert(
            handle,
            ResolvedFunction {
                module,
                name: name.to_string(),
                body,
            },
        );
        Ok(handle)
    }

    fn mem_alloc(&self, bytes: usize) -> DriverResult<DevicePtr> {
        let mut state = self.enter(HostCall::MemAlloc)?;
        let context = state.current_context()?;
        let ptr = state.memory.allocate(context, bytes)?;
        state.stats.allocations += 1;
        Ok(ptr)
    }

    fn mem_free(&self, ptr: DevicePtr) -> DriverResult<()> {
        let mut state = self.enter(HostCall::MemFree)?;
        state.memory.free(ptr)?;
        state.stats.frees += 1;
        Ok(())
    }

    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> DriverResult<()> {
        let mut state = self.enter(HostCall::MemcpyHtoD)?;
        state.memory.bytes_mut(dst, src.len())?.copy_from_slice(src);
        state.stats.htod_copies += 1;
        state.stats.htod_bytes += src.len() as u64;
        Ok(())
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> DriverResult<()> {
        let mut state = self.enter(HostCall::MemcpyDtoH)?;
        dst.copy_from_slice(state.memory.bytes(src, dst.len())?);
        state.stats.dtoh_copies += 1;
        state.stats.dtoh_bytes += dst.len() as u64;
        Ok(())
    }

    unsafe fn launch(
        &self,
        function: FunctionHandle,
        config: &LaunchConfig,
        params: &mut [*mut c_void],
    ) -> DriverResult<()> {
        let mut state = self.enter(HostCall::Launch)?;
        state.current_context()?;
        let (name, body) = state
            .functions
            .get(&function)
            .map(|f| (f.name.clone(), f.body.clone()))
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        if config.total_threads() == 0 {
            return Err(DriverStatus::INVALID_VALUE);
        }

        debug!(
            "Launching host kernel '{}' (grid={:?}, block={:?}, params={})",
            name,
            config.grid_dim,
            config.block_dim,
            params.len()
        );

        let mut invocation = KernelInvocation::new(config, params, &mut state.memory);
        body(&mut invocation).map_err(|status| {
            debug!("Host kernel '{}' failed: {}", name, status);
            status
        })?;
        state.stats.launches += 1;
        Ok(())
    }

    fn event_create(&self) -> DriverResult<EventHandle> {
        let mut state = self.enter(HostCall::Event)?;
        let event = EventHandle::from_raw(state.handle());
        state.events.insert(event, None);
        state.stats.events_created += 1;
        Ok(event)
    }

    fn event_record(&self, event: EventHandle) -> DriverResult<()> {
        let mut state = self.enter(HostCall::Event)?;
        let slot = state
            .events
            .get_mut(&event)
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        *slot = Some(Instant::now());
        Ok(())
    }

    fn event_synchronize(&self, event: EventHandle) -> DriverResult<()> {
        let state = self.enter(HostCall::Event)?;
        if state.events.contains_key(&event) {
            Ok(())
        } else {
            Err(DriverStatus::INVALID_HANDLE)
        }
    }

    fn event_elapsed_ms(&self, start: EventHandle, end: EventHandle) -> DriverResult<f32> {
        let state = self.enter(HostCall::Event)?;
        let recorded = |event: EventHandle| {
            state
                .events
                .get(&event)
                .copied()
                .flatten()
                .ok_or(DriverStatus::INVALID_HANDLE)
        };
        let (start, end) = (recorded(start)?, recorded(end)?);
        Ok(end.saturating_duration_since(start).as_secs_f32() * 1000.0)
    }

    fn event_destroy(&self, event: EventHandle) -> DriverResult<()> {
        let mut state = self.enter(HostCall::Event)?;
        state
            .events
            .remove(&event)
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        state.stats.events_destroyed += 1;
        Ok(())
    }

    fn pointer_context(&self, ptr: DevicePtr) -> DriverResult<ContextHandle> {
        let state = self.enter(HostCall::PointerContext)?;
        state.memory.owner(ptr)
    }
}
