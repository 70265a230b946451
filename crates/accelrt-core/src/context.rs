//! Device context acquisition and sharing.
//!
//! A runtime resolves its context through an indirection that points either
//! at a slot the runtime owns or at a slot supplied by the caller. The
//! context is created lazily, at most once, on first acquisition. Only a
//! context created into the runtime's own slot is destroyed at release.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::driver::{ContextHandle, DeviceDriver, DeviceId};
use crate::error::{AccelError, Result};

/// Caller-owned context slot shared with a runtime.
///
/// If the slot is empty at first acquisition, the runtime creates a context
/// into it; that context belongs to the caller and survives `release()`.
pub type SharedContext = Arc<Mutex<Option<ContextHandle>>>;

/// Create an empty shared context slot.
pub fn shared_context(context: Option<ContextHandle>) -> SharedContext {
    Arc::new(Mutex::new(context))
}

#[derive(Debug, Clone, Default)]
enum Indirection {
    /// Not hooked up yet; first acquisition points it at the owned slot.
    #[default]
    Uninitialized,
    /// Points at the runtime's own slot.
    Owned,
    /// Points at a caller-supplied slot.
    External(SharedContext),
}

/// Process-wide handle to the accelerator context in use.
#[derive(Debug, Default)]
pub struct DeviceContext {
    indirection: Indirection,
    owned: Option<ContextHandle>,
    /// Set by the first successful acquisition, cleared by `reset`.
    acquired: bool,
}

impl DeviceContext {
    /// Create an uninitialized handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirect this runtime to a caller-owned context slot.
    ///
    /// Takes effect only before the first [`acquire`](Self::acquire); a later
    /// call replaces the indirection (last writer wins) without affecting
    /// state derived from the previous context.
    pub fn set_external(&mut self, slot: SharedContext) {
        if self.acquired {
            tracing::warn!("set_external_context called after context initialization");
        }
        self.indirection = Indirection::External(slot);
    }

    /// Whether a context has been acquired since creation or the last reset.
    ///
    /// Redirecting to an external slot alone does not count.
    pub fn is_initialized(&self) -> bool {
        self.acquired
    }

    /// Context created by and owned by this runtime, if any.
    pub fn owned(&self) -> Option<ContextHandle> {
        self.owned
    }

    /// Context currently reachable through the indirection.
    pub fn current(&self) -> Option<ContextHandle> {
        match &self.indirection {
            Indirection::Uninitialized => None,
            Indirection::Owned => self.owned,
            Indirection::External(slot) => *slot.lock(),
        }
    }

    /// Resolve the context, creating one on first use.
    pub fn acquire<D: DeviceDriver + ?Sized>(
        &mut self,
        driver: &D,
        config: &RuntimeConfig,
    ) -> Result<ContextHandle> {
        if matches!(self.indirection, Indirection::Uninitialized) {
            self.indirection = Indirection::Owned;
        }

        if let Some(context) = self.current() {
            self.acquired = true;
            return Ok(context);
        }

        let context = create_context(driver, config)?;
        match &self.indirection {
            Indirection::External(slot) => *slot.lock() = Some(context),
            _ => self.owned = Some(context),
        }
        self.acquired = true;
        Ok(context)
    }

    /// Forget the owned context without destroying it.
    pub(crate) fn take_owned(&mut self) -> Option<ContextHandle> {
        self.owned.take()
    }

    /// Return to the uninitialized state so the next acquisition starts over.
    pub(crate) fn reset(&mut self) {
        self.indirection = Indirection::Uninitialized;
        self.acquired = false;
    }
}

/// Initialize the driver, pick a device and create a context on it.
fn create_context<D: DeviceDriver + ?Sized>(
    driver: &D,
    config: &RuntimeConfig,
) -> Result<ContextHandle> {
    driver.init().map_err(AccelError::driver("init"))?;

    let device_count = driver
        .device_count()
        .map_err(AccelError::driver("device_count"))?;
    if device_count == 0 {
        return Err(AccelError::NoDevice);
    }

    let device = select_device(driver, config, device_count)?;
    tracing::debug!(backend = driver.name(), device = device.0, "got device, creating context");

    let context = driver
        .context_create(device)
        .map_err(AccelError::driver("context_create"))?;
    tracing::info!(
        backend = driver.name(),
        device = device.0,
        context = context.as_raw(),
        "created accelerator context"
    );
    Ok(context)
}

/// Apply the device-index override, or scan from the highest candidate
/// ordinal down. Ordinal 0 is conventionally the display device.
fn select_device<D: DeviceDriver + ?Sized>(
    driver: &D,
    config: &RuntimeConfig,
    device_count: u32,
) -> Result<DeviceId> {
    let candidates: Vec<u32> = match config.device_index {
        Some(index) => vec![index],
        None => (0..device_count.min(config.max_scan_devices)).rev().collect(),
    };

    let mut last_status = crate::error::DriverStatus::NO_DEVICE;
    for &ordinal in &candidates {
        match driver.device_get(ordinal) {
            Ok(device) => return Ok(device),
            Err(status) => {
                tracing::debug!(ordinal, %status, "device unavailable");
                last_status = status;
            }
        }
    }

    Err(AccelError::DeviceUnavailable {
        tried: candidates,
        status: last_status,
    })
}
