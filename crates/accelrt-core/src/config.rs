//! Runtime configuration.
//!
//! Values come from environment variables prefixed `ACCELRT_` (for example
//! `ACCELRT_DEVICE_INDEX=1`), from a TOML document, or from
//! [`RuntimeConfigBuilder`].
//!
//! ```ignore
//! use accelrt_core::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()?;
//! ```

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{AccelError, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ACCELRT";

/// Configuration read once, when the runtime is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Pin device selection to this ordinal instead of scanning.
    #[serde(default)]
    pub device_index: Option<u32>,

    /// Log per-call GPU timings.
    #[serde(default)]
    pub timing: bool,

    /// Check device handles against the driver before frees and copies.
    #[serde(default)]
    pub validate_pointers: bool,

    /// Number of highest ordinals considered by the device scan.
    #[serde(default = "default_max_scan_devices")]
    pub max_scan_devices: u32,
}

fn default_max_scan_devices() -> u32 {
    2
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            timing: false,
            validate_pointers: false,
            max_scan_devices: default_max_scan_devices(),
        }
    }
}

impl RuntimeConfig {
    /// Load from `ACCELRT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML document, with environment variables on top.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Create a builder starting from defaults.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_scan_devices == 0 {
            return Err(AccelError::Config(
                "max_scan_devices must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the device ordinal.
    #[must_use]
    pub fn device_index(mut self, index: u32) -> Self {
        self.config.device_index = Some(index);
        self
    }

    /// Enable or disable call timing.
    #[must_use]
    pub fn timing(mut self, enabled: bool) -> Self {
        self.config.timing = enabled;
        self
    }

    /// Enable or disable device pointer validation.
    #[must_use]
    pub fn validate_pointers(mut self, enabled: bool) -> Self {
        self.config.validate_pointers = enabled;
        self
    }

    /// Set how many of the highest ordinals the scan considers.
    #[must_use]
    pub fn max_scan_devices(mut self, count: u32) -> Self {
        self.config.max_scan_devices = count;
        self
    }

    /// Build and validate.
    pub fn build(self) -> Result<RuntimeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
