//! `SimModule` trait and the closure-backed `FnModule`.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::error::ModuleError;
use crate::event::Event;
use crate::state::SimState;

use super::descriptor::ModuleDescriptor;

// ── SimModule ─────────────────────────────────────────────────────────

/// Trait implemented by every simulation module.
///
/// A module is a descriptor plus a dispatcher. The engine calls
/// [`dispatch`](SimModule::dispatch) with exclusive access to the state for
/// the duration of one event.
///
/// # Contract
///
/// Implementations **must**:
/// - Keep all data in the state container, not in `self`, so that
///   checkpoints capture it.
/// - Return [`ModuleError::UndefinedEventType`] for event types they do not
///   handle.
/// - Be deterministic for equal state, or draw randomness from
///   [`SimState::rng`].
///
/// # Example
///
/// ```rust
/// use tessera::module::{ModuleDescriptor, SimModule};
/// use tessera::{Event, ModuleError, SimState};
///
/// struct Counter;
///
/// impl SimModule for Counter {
///     fn descriptor(&self) -> ModuleDescriptor {
///         ModuleDescriptor::new("counter").output("count", "int")
///     }
///
///     fn dispatch(&self, state: &mut SimState, event: &Event) -> Result<(), ModuleError> {
///         match event.event_type.as_str() {
///             "init" => {
///                 state.set_object("count", 0);
///                 Ok(())
///             }
///             other => Err(ModuleError::UndefinedEventType {
///                 module: "counter".into(),
///                 event_type: other.into(),
///             }),
///         }
///     }
/// }
/// ```
pub trait SimModule: Send + Sync {
    /// The module's declared metadata.
    fn descriptor(&self) -> ModuleDescriptor;

    /// Run the handler for `event.event_type`.
    fn dispatch(&self, state: &mut SimState, event: &Event) -> Result<(), ModuleError>;
}

// ── Handlers ──────────────────────────────────────────────────────────

/// An event handler closure.
pub type Handler = Arc<dyn Fn(&mut SimState, &Event) -> Result<(), ModuleError> + Send + Sync>;

/// A module assembled from a descriptor and handler closures keyed by event
/// type.
#[derive(Clone)]
pub struct FnModule {
    descriptor: ModuleDescriptor,
    handlers: IndexMap<String, Handler>,
    otherwise: Option<Handler>,
}

impl FnModule {
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        FnModule {
            descriptor,
            handlers: IndexMap::new(),
            otherwise: None,
        }
    }

    /// Register the handler for `event_type`, replacing any previous one.
    pub fn on<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut SimState, &Event) -> Result<(), ModuleError> + Send + Sync + 'static,
    {
        self.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Handler for event types with no dedicated handler.
    pub fn otherwise<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut SimState, &Event) -> Result<(), ModuleError> + Send + Sync + 'static,
    {
        self.otherwise = Some(Arc::new(handler));
        self
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.otherwise.is_some() || self.handlers.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl SimModule for FnModule {
    fn descriptor(&self) -> ModuleDescriptor {
        self.descriptor.clone()
    }

    fn dispatch(&self, state: &mut SimState, event: &Event) -> Result<(), ModuleError> {
        match self
            .handlers
            .get(&event.event_type)
            .or(self.otherwise.as_ref())
        {
            Some(handler) => handler(state, event),
            None => Err(ModuleError::UndefinedEventType {
                module: self.descriptor.name.clone(),
                event_type: event.event_type.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for FnModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnModule")
            .field("name", &self.descriptor.name)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("otherwise", &self.otherwise.is_some())
            .finish()
    }
}

// ── Group ─────────────────────────────────────────────────────────────

/// A descriptor-only module group. It is expanded into its children before
/// the run and never receives events.
#[derive(Debug, Clone)]
pub struct GroupModule {
    descriptor: ModuleDescriptor,
}

impl GroupModule {
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        GroupModule { descriptor }
    }
}

impl SimModule for GroupModule {
    fn descriptor(&self) -> ModuleDescriptor {
        self.descriptor.clone()
    }

    fn dispatch(&self, _state: &mut SimState, event: &Event) -> Result<(), ModuleError> {
        Err(ModuleError::UndefinedEventType {
            module: self.descriptor.name.clone(),
            event_type: event.event_type.clone(),
        })
    }
}
