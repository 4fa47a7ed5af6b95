//! `ModuleRegistry`: the lookup table of modules known to the engine.

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, EngineResult, ModuleError};
use crate::event::Event;
use crate::state::SimState;

use super::descriptor::ModuleDescriptor;
use super::traits::{GroupModule, Handler, SimModule};

/// Modules keyed by registration name, plus an optional engine-wide fallback
/// handler for undefined event types.
///
/// Registration order is preserved, so iteration is deterministic.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, Arc<dyn SimModule>>,
    fallback: Option<Handler>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    /// Register `module` under `key`.
    ///
    /// Fails with `NameMismatch` if the module's descriptor declares a
    /// different name, and with `DuplicateRegistration` if `key` is taken.
    pub fn register(&mut self, key: &str, module: impl SimModule + 'static) -> EngineResult<()> {
        self.register_arc(key, Arc::new(module))
    }

    pub fn register_arc(&mut self, key: &str, module: Arc<dyn SimModule>) -> EngineResult<()> {
        let declared = module.descriptor().name;
        if declared != key {
            return Err(EngineError::NameMismatch {
                registered: key.to_string(),
                declared,
            });
        }
        if self.modules.contains_key(key) {
            return Err(EngineError::DuplicateRegistration(key.to_string()));
        }
        debug!(module = %key, "module registered");
        self.modules.insert(key.to_string(), module);
        Ok(())
    }

    /// Register a module group from its descriptor alone.
    pub fn register_group(&mut self, descriptor: ModuleDescriptor) -> EngineResult<()> {
        let key = descriptor.name.clone();
        self.register(&key, GroupModule::new(descriptor))
    }

    /// Install the handler used when a module has no handler for an event
    /// type.
    pub fn set_fallback<F>(&mut self, handler: F)
    where
        F: Fn(&mut SimState, &Event) -> Result<(), ModuleError> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(handler));
    }

    pub fn fallback(&self) -> Option<&Handler> {
        self.fallback.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SimModule>> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<ModuleDescriptor> {
        self.modules.get(name).map(|m| m.descriptor())
    }

    /// Descriptors for `names`, in the given order.
    pub fn descriptors_for<S: AsRef<str>>(&self, names: &[S]) -> EngineResult<Vec<ModuleDescriptor>> {
        names
            .iter()
            .map(|n| {
                self.descriptor(n.as_ref())
                    .ok_or_else(|| EngineError::UnknownModule(n.as_ref().to_string()))
            })
            .collect()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
