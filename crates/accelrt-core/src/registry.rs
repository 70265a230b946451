//! Registry of loaded kernel modules.
//!
//! Each independently compiled kernel unit owns one record. The caller keeps
//! the [`ModuleToken`] returned by the first initialization and passes it
//! back on later calls, so many units can share one context without a
//! global name lookup. The registry only exists to release every module at
//! teardown.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::driver::{DeviceDriver, ModuleHandle};
use crate::error::{tolerate_deinit, AccelError, Result};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Caller-held token naming a module record.
///
/// A token is only valid for the registry (and so the runtime) that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleToken {
    registry: u64,
    index: usize,
}

impl ModuleToken {
    /// Index of the record inside its registry.
    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Debug, Default)]
struct ModuleRecord {
    handle: Option<ModuleHandle>,
}

/// Arena of module records in creation order.
#[derive(Debug)]
pub struct ModuleRegistry {
    id: u64,
    records: Vec<ModuleRecord>,
}

impl ModuleRegistry {
    /// Create an empty registry with its own token namespace.
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            records: Vec::new(),
        }
    }

    /// Number of records ever created.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record has been created.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with a loaded module.
    pub fn loaded_count(&self) -> usize {
        self.records.iter().filter(|r| r.handle.is_some()).count()
    }

    /// Loaded module handle of `token`.
    pub fn handle(&self, token: ModuleToken) -> Result<Option<ModuleHandle>> {
        self.check(token).map(|index| self.records[index].handle)
    }

    /// Tokens from most recently created to oldest.
    pub fn tokens(&self) -> impl Iterator<Item = ModuleToken> + '_ {
        (0..self.records.len()).rev().map(|index| self.token(index))
    }

    fn token(&self, index: usize) -> ModuleToken {
        ModuleToken {
            registry: self.id,
            index,
        }
    }

    /// Record index of `token`, if this registry issued it.
    fn check(&self, token: ModuleToken) -> Result<usize> {
        if token.registry == self.id && token.index < self.records.len() {
            Ok(token.index)
        } else {
            Err(AccelError::InvalidModuleToken(token.index))
        }
    }

    /// Create a record for an empty token, or validate a retained one.
    fn record(&mut self, token: Option<ModuleToken>) -> Result<usize> {
        match token {
            Some(token) => self.check(token),
            None => {
                self.records.push(ModuleRecord::default());
                Ok(self.records.len() - 1)
            }
        }
    }

    /// Ensure the module for `token` is loaded, creating its record if
    /// `token` is empty.
    ///
    /// Loading an already loaded module is a no-op.
    pub fn init_module<D: DeviceDriver + ?Sized>(
        &mut self,
        driver: &D,
        token: Option<ModuleToken>,
        image: &[u8],
    ) -> Result<ModuleToken> {
        let index = self.record(token)?;
        let record = &mut self.records[index];

        if record.handle.is_none() {
            let handle = driver
                .module_load(image)
                .map_err(AccelError::driver("module_load"))?;
            tracing::debug!(
                module = index,
                handle = handle.as_raw(),
                image_bytes = image.len(),
                "loaded module"
            );
            record.handle = Some(handle);
        }

        Ok(self.token(index))
    }

    /// Unload every loaded module and clear its handle.
    ///
    /// A driver that is already shutting down counts as success. Records are
    /// kept so retained tokens stay valid and reload on next use. Every
    /// module is attempted; the first failure is returned.
    pub fn teardown_all<D: DeviceDriver + ?Sized>(&mut self, driver: &D) -> Result<()> {
        let mut first_error = None;

        for record in self.records.iter_mut().rev() {
            let Some(handle) = record.handle.take() else {
                continue;
            };
            if let Err(e) = tolerate_deinit("module_unload", driver.module_unload(handle)) {
                tracing::warn!(handle = handle.as_raw(), error = %e, "failed to unload module");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverStatus;
    use crate::mock::MockDriver;

    #[test]
    fn test_distinct_empty_tokens_create_distinct_records() {
        let driver = MockDriver::new();
        let mut registry = ModuleRegistry::new();

        let a = registry.init_module(&driver, None, b"a").unwrap();
        let b = registry.init_module(&driver, None, b"b").unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.loaded_count(), 2);
        assert_eq!(registry.tokens().collect::<Vec<_>>(), vec![b, a]);
    }

    #[test]
    fn test_retained_token_does_not_reload() {
        let driver = MockDriver::new();
        let mut registry = ModuleRegistry::new();

        let token = registry.init_module(&driver, None, b"a").unwrap();
        let handle = registry.handle(token).unwrap();
        let again = registry.init_module(&driver, Some(token), b"a").unwrap();

        assert_eq!(token, again);
        assert_eq!(registry.handle(token).unwrap(), handle);
        assert_eq!(driver.stats().modules_loaded, 1);
    }

    #[test]
    fn test_unknown_token() {
        let driver = MockDriver::new();
        let mut registry = ModuleRegistry::new();
        let foreign = ModuleToken {
            registry: registry.id,
            index: 5,
        };

        assert!(matches!(
            registry.init_module(&driver, Some(foreign), b"a"),
            Err(AccelError::InvalidModuleToken(5))
        ));
        assert!(registry.handle(foreign).is_err());
    }

    #[test]
    fn test_token_from_other_registry_with_index_in_range() {
        let driver = MockDriver::new();
        let mut ours = ModuleRegistry::new();
        let mut theirs = ModuleRegistry::new();
        ours.init_module(&driver, None, b"a").unwrap();
        let foreign = theirs.init_module(&driver, None, b"b").unwrap();
        assert_eq!(foreign.index(), 0);

        assert!(matches!(
            ours.init_module(&driver, Some(foreign), b"b"),
            Err(AccelError::InvalidModuleToken(0))
        ));
        assert!(ours.handle(foreign).is_err());
        assert_eq!(ours.len(), 1);
        assert_eq!(driver.stats().modules_loaded, 2);
    }

    #[test]
    fn test_load_failure_keeps_record_unloaded() {
        let driver = MockDriver::new();
        let mut registry = ModuleRegistry::new();

        let err = registry.init_module(&driver, None, b"").unwrap_err();
        assert_eq!(err.status(), Some(DriverStatus::INVALID_IMAGE));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.loaded_count(), 0);
    }

    #[test]
    fn test_teardown_unloads_everything() {
        let driver = MockDriver::new();
        let mut registry = ModuleRegistry::new();
        let a = registry.init_module(&driver, None, b"a").unwrap();
        registry.init_module(&driver, None, b"b").unwrap();

        registry.teardown_all(&driver).unwrap();
        assert_eq!(driver.stats().modules_unloaded, 2);
        assert_eq!(registry.loaded_count(), 0);
        assert_eq!(registry.len(), 2);

        // A retained token reloads on next use.
        registry.init_module(&driver, Some(a), b"a").unwrap();
        assert_eq!(driver.stats().modules_loaded, 3);
    }

    #[test]
    fn test_teardown_tolerates_deinitialized_driver() {
        let driver = MockDriver::new();
        let mut registry = ModuleRegistry::new();
        registry.init_module(&driver, None, b"a").unwrap();

        driver.deinitialize();
        registry.teardown_all(&driver).unwrap();
        assert_eq!(registry.loaded_count(), 0);
    }

    #[test]
    fn test_teardown_continues_after_failure() {
        let driver = MockDriver::new();
        let mut registry = ModuleRegistry::new();
        registry.init_module(&driver, None, b"a").unwrap();
        registry.init_module(&driver, None, b"b").unwrap();

        driver.fail_next("module_unload", DriverStatus::INVALID_HANDLE);
        let err = registry.teardown_all(&driver).unwrap_err();
        assert_eq!(err.status(), Some(DriverStatus::INVALID_HANDLE));
        assert_eq!(registry.loaded_count(), 0);
        assert_eq!(driver.stats().modules_unloaded, 1);
    }
}
