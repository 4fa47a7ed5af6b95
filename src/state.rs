//! The state container.
//!
//! [`SimState`] owns every piece of simulation data: the object store,
//! per-module parameters and private state, filesystem paths, the clock, the
//! event queue, the completed-event log, the dependency graph and the load
//! order. The engine hands out `&mut SimState` to exactly one event handler
//! at a time; anything that needs a point-in-time view (checkpoints, cache
//! entries) takes an explicit deep copy with [`SimState::copy`].

use indexmap::{IndexMap, IndexSet};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::deps::DependencyGraph;
use crate::error::{EngineResult, ModuleError};
use crate::event::{Condition, EventId};
use crate::eventlog::CompletedLog;
use crate::scheduler::EventQueue;
use crate::time::SimTime;
use crate::units::TimeUnitRegistry;
use crate::value::Value;

// ── Paths ─────────────────────────────────────────────────────────────

/// Role of a filesystem path in the path table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathRole {
    Inputs,
    Outputs,
    Cache,
    Modules,
    Scratch,
}

impl std::fmt::Display for PathRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PathRole::Inputs => "inputs",
            PathRole::Outputs => "outputs",
            PathRole::Cache => "cache",
            PathRole::Modules => "modules",
            PathRole::Scratch => "scratch",
        };
        f.write_str(s)
    }
}

// ── Times ─────────────────────────────────────────────────────────────

/// Clock bookkeeping: start, end, current time and the simulation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimTimes {
    pub start: SimTime,
    pub end: SimTime,
    pub current: SimTime,
    /// The finest unit declared by any active module.
    pub time_unit: String,
}

// ── Object I/O tables ─────────────────────────────────────────────────

/// A row of the inputs table: load `object` from `file` at `load_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub object: String,
    pub file: PathBuf,
    pub load_time: SimTime,
    pub loaded: bool,
}

/// A row of the outputs table: save `object` to `file` at `save_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub object: String,
    pub file: PathBuf,
    pub save_time: SimTime,
    pub saved: bool,
}

// ── Usage tracking ────────────────────────────────────────────────────

/// Objects and parameters a module actually touched while its events ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectUsage {
    pub reads: IndexSet<String>,
    pub writes: IndexSet<String>,
    pub params: IndexSet<String>,
}

// ── State container ───────────────────────────────────────────────────

/// The simulation's mutable world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimState {
    objects: IndexMap<String, Value>,
    params: IndexMap<String, IndexMap<String, Value>>,
    modules: IndexMap<String, IndexMap<String, Value>>,
    paths: IndexMap<PathRole, PathBuf>,
    times: SimTimes,
    units: TimeUnitRegistry,
    queue: EventQueue,
    completed: CompletedLog,
    dependencies: DependencyGraph,
    load_order: Vec<String>,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    rng: ChaCha8Rng,
    started_at: Option<u64>,
    #[serde(skip)]
    usage: RefCell<IndexMap<String, ObjectUsage>>,
    #[serde(skip)]
    active_module: Option<String>,
}

impl SimState {
    /// Create an empty state whose clock runs from `start` to `end` in
    /// `time_unit`.
    pub fn new(start: SimTime, end: SimTime, time_unit: impl Into<String>) -> Self {
        SimState {
            objects: IndexMap::new(),
            params: IndexMap::new(),
            modules: IndexMap::new(),
            paths: IndexMap::new(),
            times: SimTimes {
                start,
                end,
                current: start,
                time_unit: time_unit.into(),
            },
            units: TimeUnitRegistry::new(),
            queue: EventQueue::new(),
            completed: CompletedLog::default(),
            dependencies: DependencyGraph::default(),
            load_order: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(0),
            started_at: None,
            usage: RefCell::new(IndexMap::new()),
            active_module: None,
        }
    }

    /// Reseed the simulation RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Replace the completed log with an empty one of the given capacity.
    pub fn with_completed_capacity(mut self, capacity: usize) -> Self {
        self.completed = CompletedLog::new(capacity);
        self
    }

    /// Use `units` for unit lookups.
    pub fn with_units(mut self, units: TimeUnitRegistry) -> Self {
        self.units = units;
        self
    }

    /// Explicit deep copy. Later mutation of either value never affects the
    /// other; conditional predicates are shared immutably.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    // ── Objects ───────────────────────────────────────────────────

    /// Read an object, recording the access for the active module.
    pub fn object(&self, name: &str) -> Option<&Value> {
        self.note(|u| {
            u.reads.insert(name.to_string());
        });
        self.objects.get(name)
    }

    /// Read an object that must exist.
    pub fn require(&self, name: &str) -> Result<&Value, ModuleError> {
        self.object(name)
            .ok_or_else(|| ModuleError::MissingObject(name.to_string()))
    }

    /// Read a numeric object that must exist.
    pub fn require_f64(&self, name: &str) -> Result<f64, ModuleError> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| ModuleError::TypeMismatch {
            name: name.to_string(),
            expected: "float",
            found: value.type_name(),
        })
    }

    /// Store an object, returning the previous value.
    pub fn set_object(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        self.note(|u| {
            u.writes.insert(name.clone());
        });
        self.objects.insert(name, value.into())
    }

    pub fn remove_object(&mut self, name: &str) -> Option<Value> {
        self.objects.shift_remove(name)
    }

    /// Existence check. Not recorded as a read.
    pub fn has_object(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn object_names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    /// The whole object store, without usage tracking.
    pub fn objects(&self) -> &IndexMap<String, Value> {
        &self.objects
    }

    // ── Parameters ────────────────────────────────────────────────

    /// Read parameter `name` of `module`.
    pub fn param(&self, module: &str, name: &str) -> Option<&Value> {
        let value = self.params.get(module).and_then(|p| p.get(name));
        if value.is_some() {
            self.usage
                .borrow_mut()
                .entry(module.to_string())
                .or_default()
                .params
                .insert(name.to_string());
        }
        value
    }

    /// Read a numeric parameter that must exist.
    pub fn param_f64(&self, module: &str, name: &str) -> Result<f64, ModuleError> {
        let key = format!("{}.{}", module, name);
        let value = self
            .param(module, name)
            .ok_or_else(|| ModuleError::MissingObject(key.clone()))?;
        value.as_f64().ok_or_else(|| ModuleError::TypeMismatch {
            name: key,
            expected: "float",
            found: value.type_name(),
        })
    }

    pub fn set_param(&mut self, module: &str, name: &str, value: impl Into<Value>) {
        self.params
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    /// All parameters of `module`, without usage tracking.
    pub fn params_of(&self, module: &str) -> Option<&IndexMap<String, Value>> {
        self.params.get(module)
    }

    pub fn params(&self) -> &IndexMap<String, IndexMap<String, Value>> {
        &self.params
    }

    // ── Per-module state ──────────────────────────────────────────

    /// Private state of `module`.
    pub fn module_state(&self, module: &str) -> Option<&IndexMap<String, Value>> {
        self.modules.get(module)
    }

    /// Mutable private state of `module`, created on first use.
    pub fn module_state_mut(&mut self, module: &str) -> &mut IndexMap<String, Value> {
        self.modules.entry(module.to_string()).or_default()
    }

    pub fn module_states(&self) -> &IndexMap<String, IndexMap<String, Value>> {
        &self.modules
    }

    // ── Paths ─────────────────────────────────────────────────────

    pub fn path(&self, role: PathRole) -> Option<&Path> {
        self.paths.get(&role).map(PathBuf::as_path)
    }

    pub fn set_path(&mut self, role: PathRole, path: impl Into<PathBuf>) {
        self.paths.insert(role, path.into());
    }

    // ── Time ──────────────────────────────────────────────────────

    pub fn times(&self) -> &SimTimes {
        &self.times
    }

    pub fn now(&self) -> SimTime {
        self.times.current
    }

    pub fn start(&self) -> SimTime {
        self.times.start
    }

    pub fn end(&self) -> SimTime {
        self.times.end
    }

    /// Move the end of the run.
    pub fn set_end(&mut self, end: SimTime) {
        self.times.end = end;
    }

    pub fn time_unit(&self) -> &str {
        &self.times.time_unit
    }

    pub fn units(&self) -> &TimeUnitRegistry {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut TimeUnitRegistry {
        &mut self.units
    }

    /// The current time expressed in the simulation unit.
    pub fn now_in_unit(&self) -> EngineResult<f64> {
        self.times.current.in_unit(&self.times.time_unit, &self.units)
    }

    /// Move the clock forward to `time`. Never rewinds. Returns `true` if the
    /// clock moved.
    pub fn advance_time_if_needed(&mut self, time: SimTime) -> bool {
        if time > self.times.current {
            self.times.current = time;
            true
        } else {
            false
        }
    }

    // ── Scheduling ────────────────────────────────────────────────

    /// Schedule an event at absolute time `time`.
    pub fn schedule(
        &mut self,
        time: SimTime,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
    ) -> EngineResult<EventId> {
        let now = self.times.current;
        self.queue.schedule(now, time, module, event_type, priority)
    }

    /// Schedule an event `delay_secs` seconds from now.
    pub fn schedule_after(
        &mut self,
        delay_secs: f64,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
    ) -> EngineResult<EventId> {
        let time = SimTime::from_secs(self.times.current.as_secs() + delay_secs);
        self.schedule(time, module, event_type, priority)
    }

    /// Schedule an event `delay` units of `unit` from now.
    pub fn schedule_in(
        &mut self,
        delay: f64,
        unit: &str,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
    ) -> EngineResult<EventId> {
        let secs = self.units.to_seconds(delay, unit)?;
        self.schedule_after(secs, module, event_type, priority)
    }

    /// Schedule an event that fires once `condition` holds.
    pub fn schedule_conditional(
        &mut self,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
        condition: impl Fn(&SimState) -> bool + Send + Sync + 'static,
    ) -> EventId {
        let condition: Condition = std::sync::Arc::new(condition);
        self.queue
            .schedule_conditional(module, event_type, priority, condition)
    }

    /// Conditional event restricted to `[min_time, max_time]`.
    pub fn schedule_conditional_within(
        &mut self,
        module: impl Into<String>,
        event_type: impl Into<String>,
        priority: f64,
        min_time: Option<SimTime>,
        max_time: Option<SimTime>,
        condition: impl Fn(&SimState) -> bool + Send + Sync + 'static,
    ) -> EventId {
        let condition: Condition = std::sync::Arc::new(condition);
        self.queue.schedule_conditional_within(
            module, event_type, priority, min_time, max_time, condition,
        )
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    /// Evaluate every pending conditional against the current state and
    /// promote the ones that hold to regular events at the current time.
    /// Each conditional fires at most once. Returns the ids of the new
    /// regular events, in conditional insertion order.
    pub fn poll_conditionals(&mut self) -> Vec<EventId> {
        if self.queue.conditional_len() == 0 {
            return Vec::new();
        }
        let now = self.times.current;
        let pending = self.queue.take_conditionals();
        let mut kept = Vec::with_capacity(pending.len());
        let mut fired = Vec::new();
        for cond in pending {
            if cond.is_expired(now) {
                debug!(id = %cond.id, module = %cond.module, event_type = %cond.event_type, "conditional expired");
                continue;
            }
            if !cond.is_pending(now) && cond.evaluate(self) {
                fired.push(cond);
            } else {
                kept.push(cond);
            }
        }
        self.queue.restore_conditionals(kept);
        fired
            .into_iter()
            .map(|cond| self.queue.promote(now, cond))
            .collect()
    }

    // ── Bookkeeping ───────────────────────────────────────────────

    pub fn completed(&self) -> &CompletedLog {
        &self.completed
    }

    pub(crate) fn completed_mut(&mut self) -> &mut CompletedLog {
        &mut self.completed
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    pub(crate) fn set_dependencies(&mut self, graph: DependencyGraph) {
        self.dependencies = graph;
    }

    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    pub(crate) fn set_load_order(&mut self, order: Vec<String>) {
        self.load_order = order;
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut Vec<InputSpec> {
        &mut self.inputs
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut Vec<OutputSpec> {
        &mut self.outputs
    }

    /// The simulation RNG. Seeded from the engine config.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Wall-clock start of the run, in Unix milliseconds.
    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    pub(crate) fn mark_started(&mut self, at: u64) {
        self.started_at = Some(at);
    }

    // ── Usage tracking ────────────────────────────────────────────

    /// Usage recorded for each module while its handlers ran.
    pub fn usage(&self) -> IndexMap<String, ObjectUsage> {
        self.usage.borrow().clone()
    }

    pub(crate) fn set_active_module(&mut self, module: Option<String>) {
        self.active_module = module;
    }

    pub fn active_module(&self) -> Option<&str> {
        self.active_module.as_deref()
    }

    fn note(&self, record: impl FnOnce(&mut ObjectUsage)) {
        if let Some(module) = &self.active_module {
            let mut usage = self.usage.borrow_mut();
            record(usage.entry(module.clone()).or_default());
        }
    }
}
