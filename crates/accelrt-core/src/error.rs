//! Error types for the accelerator runtime.
//!
//! Library code never aborts. Every driver failure and every violated
//! precondition is returned as an [`AccelError`]; the fatal policy of the
//! generated-code boundary is applied by [`OrAbort`].

use std::fmt;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, AccelError>;

/// Result type returned by every [`DeviceDriver`](crate::driver::DeviceDriver) call.
pub type DriverResult<T> = std::result::Result<T, DriverStatus>;

/// Numeric status code reported by the accelerator driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverStatus(i32);

impl DriverStatus {
    /// The call completed.
    pub const SUCCESS: Self = Self(0);
    /// An argument was out of range.
    pub const INVALID_VALUE: Self = Self(1);
    /// The device ran out of memory.
    pub const OUT_OF_MEMORY: Self = Self(2);
    /// The driver has not been initialized.
    pub const NOT_INITIALIZED: Self = Self(3);
    /// The driver is shutting down.
    pub const DEINITIALIZED: Self = Self(4);
    /// No accelerator device is installed.
    pub const NO_DEVICE: Self = Self(100);
    /// The device ordinal does not name a usable device.
    pub const INVALID_DEVICE: Self = Self(101);
    /// The module image could not be loaded.
    pub const INVALID_IMAGE: Self = Self(200);
    /// No valid context is bound.
    pub const INVALID_CONTEXT: Self = Self(201);
    /// A handle does not refer to a live object.
    pub const INVALID_HANDLE: Self = Self(400);
    /// A named symbol was not found.
    pub const NOT_FOUND: Self = Self(500);
    /// A kernel launch failed.
    pub const LAUNCH_FAILED: Self = Self(719);
    /// Unclassified failure.
    pub const UNKNOWN: Self = Self(999);

    /// Wrap a raw driver status code.
    pub const fn from_raw(code: i32) -> Self {
        Self(code)
    }

    /// Raw numeric code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Whether this is the success code.
    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Whether the driver reported that process-wide shutdown has begun.
    pub const fn is_deinitialized(self) -> bool {
        self.0 == Self::DEINITIALIZED.0
    }

    /// Symbolic name of well-known codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "SUCCESS",
            Self::INVALID_VALUE => "INVALID_VALUE",
            Self::OUT_OF_MEMORY => "OUT_OF_MEMORY",
            Self::NOT_INITIALIZED => "NOT_INITIALIZED",
            Self::DEINITIALIZED => "DEINITIALIZED",
            Self::NO_DEVICE => "NO_DEVICE",
            Self::INVALID_DEVICE => "INVALID_DEVICE",
            Self::INVALID_IMAGE => "INVALID_IMAGE",
            Self::INVALID_CONTEXT => "INVALID_CONTEXT",
            Self::INVALID_HANDLE => "INVALID_HANDLE",
            Self::NOT_FOUND => "NOT_FOUND",
            Self::LAUNCH_FAILED => "LAUNCH_FAILED",
            Self::UNKNOWN => "UNKNOWN",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Errors raised by the accelerator runtime.
#[derive(Debug, Error)]
pub enum AccelError {
    // ===== Driver errors =====
    /// A driver call returned a non-success status.
    #[error("{op} returned non-success: {status}")]
    Driver {
        /// Driver operation that failed.
        op: &'static str,
        /// Status it returned.
        status: DriverStatus,
    },

    // ===== Device errors =====
    /// The driver enumerated zero devices.
    #[error("no accelerator device found")]
    NoDevice,

    /// No candidate device could be acquired.
    #[error("failed to get device (tried ordinals {tried:?}): {status}")]
    DeviceUnavailable {
        /// Ordinals that were tried, in order.
        tried: Vec<u32>,
        /// Status of the last attempt.
        status: DriverStatus,
    },

    // ===== Buffer errors =====
    /// A buffer's computed device size is zero.
    #[error("buffer has zero size (extent {extent:?}, stride {stride:?}, elem_size {elem_size})")]
    ZeroSizedBuffer {
        /// Per-dimension extents.
        extent: [i32; 4],
        /// Per-dimension strides.
        stride: [i32; 4],
        /// Element size in bytes.
        elem_size: i32,
    },

    /// A copy was requested while host or device storage is missing.
    #[error("{op} requires host and device storage (host present: {host}, device present: {device})")]
    MissingStorage {
        /// Operation that needed the storage.
        op: &'static str,
        /// Whether host storage was attached.
        host: bool,
        /// Whether device storage was allocated.
        device: bool,
    },

    /// The driver reported success but handed back a null allocation.
    #[error("device allocation of {size} bytes returned a null handle")]
    NullAllocation {
        /// Requested size in bytes.
        size: usize,
    },

    /// A device handle is not recognized by the driver.
    #[error("bad device pointer {ptr:#x}: {status}")]
    InvalidDevicePointer {
        /// The rejected handle.
        ptr: u64,
        /// Driver status of the lookup.
        status: DriverStatus,
    },

    // ===== Module and kernel errors =====
    /// A module token does not belong to this runtime.
    #[error("invalid module token {0}")]
    InvalidModuleToken(usize),

    /// The module for a token has no loaded handle.
    #[error("module {0} is not loaded")]
    ModuleNotLoaded(usize),

    /// The entry point could not be resolved.
    #[error("kernel entry point '{name}' not found: {status}")]
    KernelNotFound {
        /// Entry point name.
        name: String,
        /// Driver status of the lookup.
        status: DriverStatus,
    },

    /// Argument pointer and size arrays differ in length.
    #[error("kernel argument mismatch: {pointers} pointers, {sizes} sizes")]
    ArgumentCountMismatch {
        /// Number of argument pointers.
        pointers: usize,
        /// Number of argument sizes.
        sizes: usize,
    },

    // ===== Ambient errors =====
    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The requested backend is not compiled in or not installed.
    #[error("backend not available: {0}")]
    BackendUnavailable(String),
}

impl AccelError {
    /// Build a closure mapping a [`DriverStatus`] to [`AccelError::Driver`].
    pub fn driver(op: &'static str) -> impl FnOnce(DriverStatus) -> AccelError {
        move |status| AccelError::Driver { op, status }
    }

    /// Driver status carried by this error, if any.
    pub fn status(&self) -> Option<DriverStatus> {
        match self {
            AccelError::Driver { status, .. }
            | AccelError::DeviceUnavailable { status, .. }
            | AccelError::InvalidDevicePointer { status, .. }
            | AccelError::KernelNotFound { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error is a driver shutdown race.
    pub fn is_deinitialized(&self) -> bool {
        self.status().is_some_and(DriverStatus::is_deinitialized)
    }
}

impl From<config::ConfigError> for AccelError {
    fn from(e: config::ConfigError) -> Self {
        AccelError::Config(e.to_string())
    }
}

/// Treat a driver shutdown race as success.
///
/// Only the teardown path of `release()` may use this; everywhere else a
/// deinitialized driver is an ordinary failure.
pub fn tolerate_deinit(op: &'static str, result: DriverResult<()>) -> Result<()> {
    match result {
        Err(status) if status.is_deinitialized() => {
            tracing::warn!(op, "driver already deinitialized, ignoring");
            Ok(())
        }
        other => other.map_err(AccelError::driver(op)),
    }
}

/// Fatal error policy for generated callers.
///
/// The runtime reports every failure as a value; code that must keep the
/// "no silent continuation" contract unwraps through this trait, which
/// reports the failing operation and terminates the process.
pub trait OrAbort<T> {
    /// Return the value or abort the process with a diagnostic naming `op`.
    fn or_abort(self, op: &str) -> T;
}

impl<T> OrAbort<T> for Result<T> {
    fn or_abort(self, op: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                let code = e.status().map(DriverStatus::code);
                tracing::error!(op, error = %e, status = ?code, "fatal accelerator runtime error");
                eprintln!("accelrt: {op} failed: {e}");
                std::process::abort()
            }
        }
    }
}
