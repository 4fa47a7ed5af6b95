//! Structured error types for tessera.
//!
//! Setup-time errors (descriptor parsing, group expansion, load ordering,
//! metadata evaluation) abort initialization. Runtime event errors abort the
//! run after the state has been rolled back to the latest checkpoint, if one
//! exists. Cache and checkpoint failures carry their own error types and are
//! downgraded to warnings by the engine.

use thiserror::Error;

use crate::cache::CacheError;
use crate::checkpoint::{CheckpointError, SnapshotId};
use crate::io::IoError;
use crate::time::SimTime;

/// The top-level error type for the simulation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Module metadata ───────────────────────────────────

    /// A module descriptor could not be parsed.
    #[error("failed to parse descriptor for module '{module}': {message}")]
    Parse { module: String, message: String },

    /// A module declares a different name than the one it was registered under.
    #[error("module registered as '{registered}' declares name '{declared}'")]
    NameMismatch { registered: String, declared: String },

    /// Attempted to register a module under a name that is already in use.
    #[error("module '{0}' is already registered")]
    DuplicateRegistration(String),

    /// A module name was referenced but is not registered.
    #[error("module '{0}' is not registered")]
    UnknownModule(String),

    /// A module group lists itself as a child, directly or transitively.
    #[error("cyclic module group: {}", .chain.join(" -> "))]
    CyclicModuleGroup { chain: Vec<String> },

    /// Required-package edges between modules form a cycle.
    #[error("cyclic package dependency among modules: {}", .modules.join(", "))]
    CyclicDependency { modules: Vec<String> },

    /// Evaluation of a module's metadata block failed.
    #[error("metadata error in module '{module}': {message}")]
    Metadata { module: String, message: String },

    /// A parameter value falls outside its declared range.
    #[error("parameter '{param}' of module '{module}' is {value}, outside [{min}, {max}]")]
    ParameterOutOfRange {
        module: String,
        param: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// An engine configuration document could not be parsed.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    // ── Time ──────────────────────────────────────────────

    /// A time unit name did not resolve in any scope.
    #[error("unknown time unit '{0}'")]
    UnknownTimeUnit(String),

    /// A time unit was registered with a non-positive or non-finite length.
    #[error("invalid time unit '{name}': {seconds} seconds per unit")]
    InvalidTimeUnit { name: String, seconds: f64 },

    // ── Scheduling / dispatch ─────────────────────────────

    /// Attempted to schedule an event in the past or at a non-finite time.
    #[error("cannot schedule event at {requested} when current time is {current}")]
    InvalidScheduleTime { requested: SimTime, current: SimTime },

    /// An event names an event type its module does not handle.
    #[error("module '{module}' has no handler for event type '{event_type}'")]
    UndefinedEventType { module: String, event_type: String },

    /// An event handler failed. `restored_from` names the checkpoint the
    /// state was rolled back to, if any.
    #[error("event '{event_type}' of module '{module}' at {time} failed: {source}")]
    EventFailed {
        time: SimTime,
        module: String,
        event_type: String,
        #[source]
        source: ModuleError,
        restored_from: Option<SnapshotId>,
    },

    // ── Collaborators ─────────────────────────────────────

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Convenience alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error returned by module event handlers.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The module has no handler for the dispatched event type.
    #[error("module '{module}' does not define event type '{event_type}'")]
    UndefinedEventType { module: String, event_type: String },

    /// A required object is absent from the object store.
    #[error("required object '{0}' is missing from the object store")]
    MissingObject(String),

    /// An object or parameter holds a value of the wrong type.
    #[error("'{name}' has unexpected type: expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Free-form handler failure.
    #[error("{0}")]
    Failed(String),

    /// An engine call made from inside a handler failed.
    #[error(transparent)]
    Engine(Box<EngineError>),
}

impl From<EngineError> for ModuleError {
    fn from(err: EngineError) -> Self {
        ModuleError::Engine(Box::new(err))
    }
}

impl From<IoError> for ModuleError {
    fn from(err: IoError) -> Self {
        ModuleError::Engine(Box::new(EngineError::Io(err)))
    }
}
