//! Runtime state object.
//!
//! [`AcceleratorRuntime`] owns everything that would otherwise be hidden
//! process-wide state: the driver, the context indirection, the module
//! registry and the timing events. Generated code holds one runtime and
//! calls into it; tests build as many independent runtimes as they need.
//!
//! Every operation takes `&mut self`. Callers that submit work from several
//! threads serialize through their own lock (e.g. `parking_lot::Mutex`).
//!
//! # Example
//!
//! ```ignore
//! use accelrt_core::prelude::*;
//!
//! let mut runtime = AcceleratorRuntime::new(driver);
//! let module = runtime.init_module(None, PTX)?;
//!
//! let mut buf = BufferDescriptor::dense(4, &[1024]);
//! unsafe { buf.set_host(data.as_mut_ptr().cast()) };
//! buf.mark_host_dirty();
//!
//! runtime.device_allocate(&mut buf)?;
//! runtime.flush_to_device(&mut buf)?;
//! // ... run kernels, mark device dirty ...
//! runtime.flush_to_host(&mut buf)?;
//! runtime.release()?;
//! ```

use std::ffi::c_void;

use crate::buffer::BufferDescriptor;
use crate::config::RuntimeConfig;
use crate::context::{DeviceContext, SharedContext};
use crate::driver::{ContextHandle, DeviceDriver};
use crate::error::{tolerate_deinit, AccelError, Result};
use crate::launch::{KernelParams, LaunchConfig, LaunchEngine};
use crate::memory::MemoryManager;
use crate::registry::{ModuleRegistry, ModuleToken};
use crate::sync::SyncEngine;
use crate::timing::CallTimer;

/// Accelerator runtime over a driver `D`.
pub struct AcceleratorRuntime<D: DeviceDriver> {
    driver: D,
    config: RuntimeConfig,
    context: DeviceContext,
    modules: ModuleRegistry,
    timer: CallTimer,
}

impl<D: DeviceDriver> AcceleratorRuntime<D> {
    /// Create a runtime with default configuration.
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, RuntimeConfig::default())
    }

    /// Create a runtime configured from `ACCELRT_*` environment variables.
    pub fn from_env(driver: D) -> Result<Self> {
        Ok(Self::with_config(driver, RuntimeConfig::from_env()?))
    }

    /// Create a runtime with explicit configuration.
    pub fn with_config(driver: D, config: RuntimeConfig) -> Self {
        let timer = CallTimer::new(config.timing);
        Self {
            driver,
            config,
            context: DeviceContext::new(),
            modules: ModuleRegistry::new(),
            timer,
        }
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether a context has been acquired since creation or the last release.
    pub fn is_initialized(&self) -> bool {
        self.context.is_initialized()
    }

    /// Context currently in use, if any.
    pub fn current_context(&self) -> Option<ContextHandle> {
        self.context.current()
    }

    /// Number of module records created.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Number of module records currently loaded.
    pub fn loaded_module_count(&self) -> usize {
        self.modules.loaded_count()
    }

    /// Use a caller-owned context slot instead of creating one.
    ///
    /// Must be called before the first acquisition to take effect.
    pub fn set_external_context(&mut self, slot: SharedContext) {
        self.context.set_external(slot);
    }

    /// Resolve the context, creating it on first use.
    pub fn acquire_context(&mut self) -> Result<ContextHandle> {
        self.context.acquire(&self.driver, &self.config)
    }

    /// Load a compiled kernel unit, creating its record if `token` is empty.
    ///
    /// Keep the returned token and pass it back on later calls for the same
    /// unit; reinitializing a loaded unit does nothing.
    pub fn init_module(&mut self, token: Option<ModuleToken>, image: &[u8]) -> Result<ModuleToken> {
        self.acquire_context()?;
        let token = self.modules.init_module(&self.driver, token, image)?;
        self.timer.arm(&self.driver);
        Ok(token)
    }

    /// Launch `entry_name` from the module of `token`.
    ///
    /// # Safety
    ///
    /// Every pointer in `args` must point to a live value matching the
    /// kernel's parameter at that position.
    pub unsafe fn run(
        &mut self,
        token: ModuleToken,
        entry_name: &str,
        config: &LaunchConfig,
        arg_sizes: &[usize],
        args: &mut [*mut c_void],
    ) -> Result<()> {
        let module = self
            .modules
            .handle(token)?
            .ok_or(AccelError::ModuleNotLoaded(token.index()))?;

        let engine = LaunchEngine::new(&self.driver, &self.timer);
        // SAFETY: forwarded from this function's contract.
        unsafe { engine.run(module, entry_name, config, arg_sizes, args) }
    }

    /// Launch with a typed parameter set.
    ///
    /// # Safety
    ///
    /// The parameters must match the kernel signature in count, order and
    /// layout.
    pub unsafe fn run_with<P: KernelParams>(
        &mut self,
        token: ModuleToken,
        entry_name: &str,
        config: &LaunchConfig,
        params: &mut P,
    ) -> Result<()> {
        let sizes = params.param_sizes();
        let mut ptrs = params.as_param_ptrs();
        // SAFETY: forwarded from this function's contract.
        unsafe { self.run(token, entry_name, config, &sizes, &mut ptrs) }
    }

    fn memory(&self) -> MemoryManager<'_, D> {
        MemoryManager::new(&self.driver, &self.timer)
            .with_pointer_validation(self.config.validate_pointers)
    }

    /// Give `buf` device storage unless it already has some.
    pub fn device_allocate(&mut self, buf: &mut BufferDescriptor) -> Result<()> {
        self.memory().device_allocate(buf)
    }

    /// Release the device storage of `buf`, if any.
    pub fn device_free(&mut self, buf: &mut BufferDescriptor) -> Result<()> {
        self.memory().device_free(buf)
    }

    /// Whether the driver recognizes the device handle of `buf`.
    pub fn validate_device_pointer(&self, buf: &BufferDescriptor) -> bool {
        self.memory().validate_device_pointer(buf)
    }

    /// Copy host data to the device if the host side is dirty.
    pub fn flush_to_device(&mut self, buf: &mut BufferDescriptor) -> Result<()> {
        SyncEngine::new(self.memory()).flush_to_device(buf)
    }

    /// Copy device data to the host if the device side is dirty.
    pub fn flush_to_host(&mut self, buf: &mut BufferDescriptor) -> Result<()> {
        SyncEngine::new(self.memory()).flush_to_host(buf)
    }

    /// Wait for all queued device work. Used by tracers for timing.
    pub fn device_synchronize(&mut self) -> Result<()> {
        self.driver
            .context_synchronize()
            .map_err(AccelError::driver("context_synchronize"))
    }

    /// Tear down every module and the owned context.
    ///
    /// A no-op if no context was ever acquired. A driver that has already
    /// begun process shutdown is tolerated. Teardown always runs to the end
    /// and leaves the runtime uninitialized; the first failure is returned.
    pub fn release(&mut self) -> Result<()> {
        if !self.context.is_initialized() {
            return Ok(());
        }

        let mut first_error: Option<AccelError> = None;

        if let Err(e) = tolerate_deinit(
            "context_synchronize",
            self.driver.context_synchronize(),
        ) {
            first_error.get_or_insert(e);
        }

        self.timer.disarm(&self.driver);

        if let Err(e) = self.modules.teardown_all(&self.driver) {
            first_error.get_or_insert(e);
        }

        if let Some(context) = self.context.take_owned() {
            if let Err(e) = tolerate_deinit("context_destroy", self.driver.context_destroy(context)) {
                first_error.get_or_insert(e);
            }
        }

        self.context.reset();
        tracing::info!(backend = self.driver.name(), "accelerator runtime released");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<D: DeviceDriver> Drop for AcceleratorRuntime<D> {
    fn drop(&mut self) {
        if self.context.is_initialized() {
            // Best effort cleanup
            if let Err(e) = self.release() {
                tracing::warn!(error = %e, "release during drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::shared_context;
    use crate::error::DriverStatus;
    use crate::launch::KernelArgs;
    use crate::mock::MockDriver;
    use std::sync::Arc;

    #[test]
    fn test_release_without_init_is_noop() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        runtime.release().unwrap();

        let stats = runtime.driver().stats();
        assert_eq!(stats.inits, 0);
        assert_eq!(stats.synchronizations, 0);
        assert_eq!(stats.contexts_destroyed, 0);
    }

    #[test]
    fn test_context_singleton() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        let first = runtime.acquire_context().unwrap();
        let second = runtime.acquire_context().unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.driver().stats().contexts_created, 1);
    }

    #[test]
    fn test_init_module_acquires_context() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        assert!(!runtime.is_initialized());

        runtime.init_module(None, b"kernel").unwrap();
        assert!(runtime.is_initialized());
        assert!(runtime.current_context().is_some());
        assert_eq!(runtime.loaded_module_count(), 1);
    }

    #[test]
    fn test_release_tears_down_and_allows_reinit() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        let token = runtime.init_module(None, b"kernel").unwrap();
        runtime.init_module(None, b"other").unwrap();

        runtime.release().unwrap();
        assert!(!runtime.is_initialized());
        assert_eq!(runtime.loaded_module_count(), 0);
        {
            let stats = runtime.driver().stats();
            assert_eq!(stats.synchronizations, 1);
            assert_eq!(stats.modules_unloaded, 2);
            assert_eq!(stats.contexts_destroyed, 1);
        }

        runtime.init_module(Some(token), b"kernel").unwrap();
        let stats = runtime.driver().stats();
        assert_eq!(stats.contexts_created, 2);
        assert_eq!(stats.modules_loaded, 3);
    }

    #[test]
    fn test_release_with_unused_external_slot_is_noop() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        runtime.set_external_context(shared_context(None));
        runtime.release().unwrap();

        let stats = runtime.driver().stats();
        assert_eq!(stats.inits, 0);
        assert_eq!(stats.synchronizations, 0);
    }

    #[test]
    fn test_release_never_destroys_external_context() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        let slot = shared_context(Some(ContextHandle::from_raw(0x77)));
        runtime.set_external_context(slot.clone());
        runtime.init_module(None, b"kernel").unwrap();

        runtime.release().unwrap();
        let stats = runtime.driver().stats();
        assert_eq!(stats.contexts_created, 0);
        assert_eq!(stats.contexts_destroyed, 0);
        assert_eq!(stats.modules_unloaded, 1);
        assert_eq!(*slot.lock(), Some(ContextHandle::from_raw(0x77)));
    }

    #[test]
    fn test_release_tolerates_driver_shutdown() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        runtime.init_module(None, b"kernel").unwrap();

        runtime.driver().deinitialize();
        runtime.release().unwrap();
        assert!(!runtime.is_initialized());
    }

    #[test]
    fn test_deinitialized_driver_is_fatal_outside_release() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        runtime.init_module(None, b"kernel").unwrap();
        runtime.driver().deinitialize();

        let mut buf = BufferDescriptor::dense(4, &[4]);
        let err = runtime.device_allocate(&mut buf).unwrap_err();
        assert!(err.is_deinitialized());
        assert!(runtime.device_synchronize().is_err());
    }

    #[test]
    fn test_release_reports_first_error_but_finishes() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        runtime.init_module(None, b"kernel").unwrap();

        runtime
            .driver()
            .fail_next("context_synchronize", DriverStatus::LAUNCH_FAILED);
        let err = runtime.release().unwrap_err();
        assert_eq!(err.status(), Some(DriverStatus::LAUNCH_FAILED));
        assert!(!runtime.is_initialized());
        assert_eq!(runtime.driver().stats().contexts_destroyed, 1);
    }

    #[test]
    fn test_run_requires_loaded_module() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        let token = runtime.init_module(None, b"scale").unwrap();
        runtime.release().unwrap();

        let err = unsafe {
            runtime.run(token, "scale", &LaunchConfig::default(), &[], &mut [])
        }
        .unwrap_err();
        assert!(matches!(err, AccelError::ModuleNotLoaded(0)));
    }

    #[test]
    fn test_run_with_kernel_args() {
        let mut runtime = AcceleratorRuntime::new(MockDriver::new());
        let token = runtime.init_module(None, b"scale").unwrap();

        let mut args = KernelArgs::new();
        args.push_device_ptr(0x100).push(16i32);
        unsafe { runtime.run_with(token, "scale", &LaunchConfig::linear(16, 16), &mut args) }
            .unwrap();
        assert_eq!(runtime.driver().stats().launches, 1);
    }

    #[test]
    fn test_timing_events_follow_context_lifetime() {
        let config = RuntimeConfig::builder().timing(true).build().unwrap();
        let mut runtime = AcceleratorRuntime::with_config(MockDriver::new(), config);
        runtime.init_module(None, b"a").unwrap();
        runtime.init_module(None, b"b").unwrap();
        assert_eq!(runtime.driver().stats().events_created, 2);

        let mut buf = BufferDescriptor::dense(4, &[4]);
        runtime.device_allocate(&mut buf).unwrap();
        assert_eq!(runtime.driver().stats().events_recorded, 2);

        runtime.device_free(&mut buf).unwrap();
        runtime.release().unwrap();
        assert_eq!(runtime.driver().stats().events_destroyed, 2);
    }

    #[test]
    fn test_drop_releases() {
        let driver = Arc::new(MockDriver::new());
        {
            let mut runtime = AcceleratorRuntime::new(Arc::clone(&driver));
            runtime.init_module(None, b"kernel").unwrap();
        }
        let stats = driver.stats();
        assert_eq!(stats.modules_unloaded, 1);
        assert_eq!(stats.contexts_destroyed, 1);
    }
}
