//! Registry of hardware module implementations.
//!
//! Provides a `ModuleRegistry` mapping module type names to factories. The
//! binary builds one at startup and selects the module by name; there is no
//! process-wide table.

use crate::error::{ErrorKind, HwmError, HwmResult};
use crate::loopback::LoopbackModule;
use crate::module::{HardwareModuleInterface, ModuleFactory};
use std::collections::BTreeMap;

/// Registry of available module types.
pub struct ModuleRegistry {
    factories: BTreeMap<&'static str, ModuleFactory>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every module type shipped in this crate.
    pub fn with_builtin_modules() -> Self {
        let mut registry = Self::new();
        // The registry is empty, so the name cannot collide.
        let _ = registry.register(LoopbackModule::TYPE_NAME, LoopbackModule::factory);
        registry
    }

    /// Register a module factory.
    ///
    /// # Errors
    /// `AlreadyExists` if `name` is taken.
    pub fn register(&mut self, name: &'static str, factory: ModuleFactory) -> HwmResult<()> {
        if self.factories.contains_key(name) {
            return Err(HwmError::new(
                ErrorKind::AlreadyExists,
                format!("Module '{name}' is already registered"),
            ));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Get a module factory by name.
    pub fn get_factory(&self, name: &str) -> Option<ModuleFactory> {
        self.factories.get(name).copied()
    }

    /// Create a module instance by name.
    ///
    /// # Errors
    /// `NotFound` if no module with the given name is registered.
    pub fn create_module(&self, name: &str) -> HwmResult<Box<dyn HardwareModuleInterface>> {
        let factory = self.get_factory(name).ok_or_else(|| {
            HwmError::new(
                ErrorKind::NotFound,
                format!(
                    "Unknown module '{name}', available: {}",
                    self.list_modules().join(", ")
                ),
            )
        })?;
        Ok(factory())
    }

    /// Registered module names, sorted.
    pub fn list_modules(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
