/// Simulation execution loop.
///
/// Drives the event queue held by the state container: pops the earliest
/// event, advances the clock, checkpoints when the policy asks for it,
/// consults the event cache for memoized modules, dispatches to the owning
/// module and polls conditional events. The loop is synchronous and
/// single-threaded; exactly one handler holds the state at a time.

mod builder;

pub use builder::SimulationBuilder;

use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, Digest, TAG_FUNCTION, TAG_GRANULARITY};
use crate::checkpoint::{self, CheckpointManager, Snapshot, SnapshotId};
use crate::config::EngineConfig;
use crate::deps::{diagnose, DiagnoseContext, Diagnostic};
use crate::error::{EngineError, EngineResult, ModuleError};
use crate::event::{Event, EventId};
use crate::eventlog::{CompletedEvent, CompletedLog};
use crate::module::{ModuleDescriptor, ModuleRegistry};
use crate::state::SimState;
use crate::time::SimTime;
use crate::value::Value;

/// Event type every module receives once, at start time, in load order.
pub const INIT_EVENT: &str = "init";

/// Event type forwarded to the [`PlotHook`] after dispatch.
pub const PLOT_EVENT: &str = "plot";

// ── Plot hook ─────────────────────────────────────────────────────────

/// Receives every `plot` event after its module handled it. Rendering is
/// the hook's business; the engine only hands over the state.
pub trait PlotHook: Send + Sync {
    fn on_scheduled_plot_event(&self, state: &SimState, event: &Event);
}

impl<F> PlotHook for F
where
    F: Fn(&SimState, &Event) + Send + Sync,
{
    fn on_scheduled_plot_event(&self, state: &SimState, event: &Event) {
        (self)(state, event)
    }
}

// ── Run summary ───────────────────────────────────────────────────────

/// What one `run*` call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Events taken off the queue, including skipped ones.
    pub events: u64,
    /// Events whose effects were replayed from the cache.
    pub from_cache: u64,
    /// Clock at the end of the call.
    pub time: SimTime,
    /// Events still queued (beyond the end time or the call's bound).
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Execution {
    Dispatched,
    Replayed,
    Skipped,
}

// ── Simulation ────────────────────────────────────────────────────────

/// Top-level simulation driver.
///
/// Built by [`SimulationBuilder`]. Call [`run`](Simulation::run) to execute
/// until no event remains at or before the end time, or
/// [`step`](Simulation::step) to advance by exactly one event.
pub struct Simulation {
    state: SimState,
    registry: ModuleRegistry,
    descriptors: IndexMap<String, ModuleDescriptor>,
    config: EngineConfig,
    checkpoints: CheckpointManager,
    cache: Option<Cache>,
    diagnostics: Vec<Diagnostic>,
    supplied: IndexSet<String>,
    available_packages: Vec<String>,
    plot_hook: Option<Arc<dyn PlotHook>>,
    events_processed: u64,
    events_from_cache: u64,
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// Mutable access between steps, e.g. to schedule extra events.
    pub fn state_mut(&mut self) -> &mut SimState {
        &mut self.state
    }

    pub fn into_state(self) -> SimState {
        self.state
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Descriptors of the active modules, in load order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.descriptors.values()
    }

    /// Diagnostics computed when the simulation was built.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn cache(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    pub fn cache_mut(&mut self) -> Option<&mut Cache> {
        self.cache.as_mut()
    }

    pub fn completed(&self) -> &CompletedLog {
        self.state.completed()
    }

    pub fn now(&self) -> SimTime {
        self.state.now()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn events_from_cache(&self) -> u64 {
        self.events_from_cache
    }

    pub fn set_plot_hook(&mut self, hook: impl PlotHook + 'static) {
        self.plot_hook = Some(Arc::new(hook));
    }

    /// Returns `true` if no event remains at or before the end time.
    pub fn is_finished(&self) -> bool {
        self.state
            .queue()
            .peek_next()
            .map_or(true, |e| e.time > self.state.end())
    }

    /// Contract diagnostics re-run against the objects and parameters each
    /// module actually touched so far.
    pub fn usage_diagnostics(&self) -> Vec<Diagnostic> {
        let descriptors: Vec<ModuleDescriptor> = self.descriptors.values().cloned().collect();
        let usage = self.state.usage();
        let ctx = DiagnoseContext {
            supplied: self.supplied.clone(),
            available_packages: &self.available_packages,
            usage: Some(&usage),
        };
        diagnose(&descriptors, &ctx)
    }

    // ── Execution ─────────────────────────────────────────────

    /// Execute a single step: pop one event, advance time, dispatch.
    ///
    /// Returns `Ok(Some(event))` if an event was processed and `Ok(None)`
    /// when no event remains at or before the end time.
    pub fn step(&mut self) -> EngineResult<Option<Event>> {
        let end = self.state.end();
        self.step_until(end)
    }

    /// Run until no event remains at or before the end time.
    pub fn run(&mut self) -> EngineResult<RunSummary> {
        let end = self.state.end();
        self.run_bounded(u64::MAX, end)
    }

    /// Run at most `max_steps` events.
    pub fn run_for(&mut self, max_steps: u64) -> EngineResult<RunSummary> {
        let end = self.state.end();
        self.run_bounded(max_steps, end)
    }

    /// Run every event scheduled at or before `until` (capped at the end
    /// time).
    pub fn run_until(&mut self, until: SimTime) -> EngineResult<RunSummary> {
        let limit = until.min(self.state.end());
        self.run_bounded(u64::MAX, limit)
    }

    /// Roll back to the latest checkpoint and resume the run from there.
    /// Events completed before that checkpoint are not executed again.
    pub fn restart(&mut self) -> EngineResult<RunSummary> {
        let id = self
            .checkpoints
            .latest()
            .map(|s| s.id)
            .ok_or(checkpoint::CheckpointError::Empty)?;
        self.restore(id)?;
        info!(snapshot = %id, time = %self.state.now(), "restarting from checkpoint");
        self.run()
    }

    /// Replace the state with snapshot `id`.
    pub fn restore(&mut self, id: SnapshotId) -> EngineResult<()> {
        let snapshot = self
            .checkpoints
            .get(id)
            .ok_or(checkpoint::CheckpointError::NotFound(id))?;
        self.events_processed = snapshot.events_processed;
        self.state = snapshot.state.copy();
        Ok(())
    }

    /// Adopt a snapshot read from disk and restore it.
    pub fn restore_snapshot(&mut self, snapshot: Snapshot) -> EngineResult<SnapshotId> {
        let id = self.checkpoints.adopt(snapshot);
        self.restore(id)?;
        Ok(id)
    }

    /// Take a checkpoint now, regardless of the policy.
    pub fn checkpoint(&mut self) -> SnapshotId {
        self.checkpoints.checkpoint(&self.state, self.events_processed)
    }

    fn run_bounded(&mut self, max_steps: u64, limit: SimTime) -> EngineResult<RunSummary> {
        let cached_before = self.events_from_cache;
        let mut steps = 0u64;
        while steps < max_steps {
            if self.step_until(limit)?.is_none() {
                break;
            }
            steps += 1;
        }
        let summary = RunSummary {
            events: steps,
            from_cache: self.events_from_cache - cached_before,
            time: self.state.now(),
            pending: self.state.queue().len(),
        };
        info!(
            events = summary.events,
            from_cache = summary.from_cache,
            time = %summary.time,
            pending = summary.pending,
            "run finished"
        );
        Ok(summary)
    }

    fn step_until(&mut self, limit: SimTime) -> EngineResult<Option<Event>> {
        match self.state.queue().peek_next() {
            Some(next) if next.time <= limit => {}
            _ => return Ok(None),
        }
        self.auto_checkpoint();

        let Some(event) = self.state.queue_mut().pop_next() else {
            return Ok(None);
        };
        self.state.advance_time_if_needed(event.time);
        debug!(event = %event, "dispatching");

        let started = Instant::now();
        let execution = match self.execute(&event) {
            Ok(execution) => execution,
            Err(err) => return Err(self.fail(&event, err)),
        };

        if execution != Execution::Skipped {
            let from_cache = execution == Execution::Replayed;
            if from_cache {
                self.events_from_cache += 1;
            }
            self.state.completed_mut().record(CompletedEvent {
                event: event.clone(),
                elapsed_micros: started.elapsed().as_micros() as u64,
                from_cache,
            });
            if event.event_type == PLOT_EVENT {
                if let Some(hook) = &self.plot_hook {
                    hook.on_scheduled_plot_event(&self.state, &event);
                }
            }
        }
        self.events_processed += 1;

        let promoted = self.state.poll_conditionals();
        if !promoted.is_empty() {
            debug!(count = promoted.len(), time = %self.state.now(), "conditional events promoted");
        }
        Ok(Some(event))
    }

    fn auto_checkpoint(&mut self) {
        if !self.checkpoints.is_due(self.events_processed, self.state.now()) {
            return;
        }
        let id = self.checkpoints.checkpoint(&self.state, self.events_processed);
        let Some(path) = &self.config.checkpoint.persist_path else {
            return;
        };
        if let Some(snapshot) = self.checkpoints.get(id) {
            if let Err(e) = checkpoint::persist(snapshot, path) {
                warn!(snapshot = %id, error = %e, "checkpoint failed; continuing without a persisted recovery point");
            }
        }
    }

    fn execute(&mut self, event: &Event) -> Result<Execution, ModuleError> {
        let module = self
            .registry
            .get(&event.module)
            .cloned()
            .ok_or_else(|| EngineError::UnknownModule(event.module.clone()))?;

        let cache_key = self.event_cache_key(event);
        if let Some(key) = &cache_key {
            if self.replay_cached(key, event)? {
                return Ok(Execution::Replayed);
            }
        }

        let before = cache_key.as_ref().map(|_| StateBefore::capture(&self.state));
        let first_new = self.state.queue().next_event_id();
        match self.dispatch_as(event, |state| module.dispatch(state, event)) {
            Ok(()) => {}
            Err(ModuleError::UndefinedEventType { module, event_type }) => {
                if let Some(fallback) = self.registry.fallback().cloned() {
                    debug!(module = %module, event_type = %event_type, "undefined event type; using fallback handler");
                    self.dispatch_as(event, |state| fallback(state, event))?;
                } else if self.config.skip_undefined_events {
                    warn!(module = %module, event_type = %event_type, time = %event.time, "undefined event type; skipped");
                    return Ok(Execution::Skipped);
                } else {
                    return Err(ModuleError::UndefinedEventType { module, event_type });
                }
            }
            Err(e) => return Err(e),
        }

        if let (Some(key), Some(before)) = (cache_key, before) {
            self.store_effects(key, event, first_new, &before);
        }
        Ok(Execution::Dispatched)
    }

    fn dispatch_as<F>(&mut self, event: &Event, f: F) -> Result<(), ModuleError>
    where
        F: FnOnce(&mut SimState) -> Result<(), ModuleError>,
    {
        self.state.set_active_module(Some(event.module.clone()));
        let result = f(&mut self.state);
        self.state.set_active_module(None);
        result
    }

    /// Roll back (when configured) and turn a handler error into the error
    /// returned to the caller.
    fn fail(&mut self, event: &Event, err: ModuleError) -> EngineError {
        let restored_from = self.rollback();
        error!(
            time = %event.time,
            module = %event.module,
            event_type = %event.event_type,
            error = %err,
            restored = restored_from.is_some(),
            "event failed"
        );
        match err {
            ModuleError::UndefinedEventType { module, event_type } => {
                EngineError::UndefinedEventType { module, event_type }
            }
            source => EngineError::EventFailed {
                time: event.time,
                module: event.module.clone(),
                event_type: event.event_type.clone(),
                source,
                restored_from,
            },
        }
    }

    fn rollback(&mut self) -> Option<SnapshotId> {
        if !self.config.restore_on_error {
            return None;
        }
        let snapshot = self.checkpoints.latest()?;
        self.state = snapshot.state.copy();
        self.events_processed = snapshot.events_processed;
        warn!(snapshot = %snapshot.id, time = %self.state.now(), "state restored from checkpoint");
        Some(snapshot.id)
    }

    // ── Event cache ───────────────────────────────────────────

    fn event_cache_key(&self, event: &Event) -> Option<Digest> {
        if !self.config.cache.cached_modules.contains(&event.module) {
            return None;
        }
        let cache = self.cache.as_ref()?;
        match cache.digest(&(event.module.as_str(), event.event_type.as_str(), &self.state)) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(module = %event.module, error = %e, "cache digest failed; executing without cache");
                None
            }
        }
    }

    fn replay_cached(&mut self, key: &Digest, event: &Event) -> Result<bool, ModuleError> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(false);
        };
        let entry = match cache.lookup(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(module = %event.module, error = %e, "cache lookup failed; executing");
                return Ok(false);
            }
        };
        let Some(effects) = EventEffects::from_value(&entry.artifact) else {
            warn!(digest = %key, "cached event effects are malformed; executing");
            return Ok(false);
        };

        for name in &effects.removed {
            self.state.remove_object(name);
        }
        for (name, value) in effects.objects {
            self.state.set_object(name, value);
        }
        for (module, params) in effects.params {
            for (name, value) in params {
                self.state.set_param(&module, &name, value);
            }
        }
        for (module, private) in effects.modules {
            *self.state.module_state_mut(&module) = private;
        }
        for s in effects.scheduled {
            self.state
                .schedule_after(s.delay, s.module, s.event_type, s.priority)?;
        }
        info!(module = %event.module, event_type = %event.event_type, "recovered from cache");
        Ok(true)
    }

    fn store_effects(
        &mut self,
        key: Digest,
        event: &Event,
        first_new: EventId,
        before: &StateBefore,
    ) {
        let queue = self.state.queue();
        if queue.conditionals().iter().any(|c| c.id >= first_new) {
            debug!(module = %event.module, "handler scheduled conditional events; not cached");
            return;
        }
        let now = self.state.now();
        let scheduled: Vec<ScheduledEffect> = queue
            .pending()
            .into_iter()
            .filter(|e| e.id >= first_new)
            .map(|e| ScheduledEffect {
                delay: e.time.as_secs() - now.as_secs(),
                module: e.module,
                event_type: e.event_type,
                priority: e.priority,
            })
            .collect();
        let effects = EventEffects::diff(before, &self.state, scheduled);

        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        let mut tags = IndexMap::new();
        tags.insert(
            TAG_FUNCTION.to_string(),
            format!("{}:{}", event.module, event.event_type),
        );
        tags.insert(TAG_GRANULARITY.to_string(), format!("module:{}", event.module));
        match cache.store(key, effects.to_value(), tags) {
            Ok(()) => info!(module = %event.module, event_type = %event.event_type, "executed"),
            Err(e) => warn!(module = %event.module, error = %e, "cache store failed"),
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now", &self.state.now())
            .field("modules", &self.descriptors.keys().collect::<Vec<_>>())
            .field("pending", &self.state.queue().len())
            .field("events_processed", &self.events_processed)
            .field("checkpoints", &self.checkpoints.len())
            .field("cache", &self.cache)
            .finish()
    }
}

// ── Cached event effects ──────────────────────────────────────────────

type Nested = IndexMap<String, IndexMap<String, Value>>;

/// Objects, parameters and private module state as they were before a
/// cached event ran.
struct StateBefore {
    objects: IndexMap<String, Value>,
    params: Nested,
    modules: Nested,
}

impl StateBefore {
    fn capture(state: &SimState) -> Self {
        StateBefore {
            objects: state.objects().clone(),
            params: state.params().clone(),
            modules: state.module_states().clone(),
        }
    }
}

/// What a memoized event did: every object it wrote or removed, every
/// parameter it set, every module state it changed, and the events it
/// scheduled relative to the time it ran.
struct EventEffects {
    objects: IndexMap<String, Value>,
    removed: Vec<String>,
    params: Nested,
    /// Full replacement state of each module whose private state changed.
    modules: Nested,
    scheduled: Vec<ScheduledEffect>,
}

struct ScheduledEffect {
    delay: f64,
    module: String,
    event_type: String,
    priority: f64,
}

/// Entries of `after` that are new or differ from `before`.
fn changed_entries(
    before: Option<&IndexMap<String, Value>>,
    after: &IndexMap<String, Value>,
) -> IndexMap<String, Value> {
    after
        .iter()
        .filter(|(k, v)| before.and_then(|b| b.get(*k)) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn nested_to_value(nested: &Nested) -> Value {
    Value::Map(
        nested
            .iter()
            .map(|(k, v)| (k.clone(), Value::Map(v.clone())))
            .collect(),
    )
}

fn nested_from_value(value: &Value) -> Option<Nested> {
    value
        .as_map()?
        .iter()
        .map(|(k, v)| Some((k.clone(), v.as_map()?.clone())))
        .collect()
}

impl EventEffects {
    fn diff(before: &StateBefore, after: &SimState, scheduled: Vec<ScheduledEffect>) -> Self {
        let objects = changed_entries(Some(&before.objects), after.objects());
        let removed = before
            .objects
            .keys()
            .filter(|k| !after.objects().contains_key(*k))
            .cloned()
            .collect();
        let params = after
            .params()
            .iter()
            .map(|(module, p)| (module.clone(), changed_entries(before.params.get(module), p)))
            .filter(|(_, p)| !p.is_empty())
            .collect();
        let modules = after
            .module_states()
            .iter()
            .filter(|(module, s)| before.modules.get(*module) != Some(*s))
            .map(|(module, s)| (module.clone(), s.clone()))
            .collect();
        EventEffects {
            objects,
            removed,
            params,
            modules,
            scheduled,
        }
    }

    fn to_value(&self) -> Value {
        let scheduled: Vec<Value> = self
            .scheduled
            .iter()
            .map(|s| {
                Value::from([
                    ("delay", Value::Float(s.delay)),
                    ("module", Value::from(s.module.as_str())),
                    ("event_type", Value::from(s.event_type.as_str())),
                    ("priority", Value::Float(s.priority)),
                ])
            })
            .collect();
        Value::from([
            ("objects", Value::Map(self.objects.clone())),
            (
                "removed",
                Value::List(self.removed.iter().map(|n| Value::from(n.as_str())).collect()),
            ),
            ("params", nested_to_value(&self.params)),
            ("modules", nested_to_value(&self.modules)),
            ("scheduled", Value::List(scheduled)),
        ])
    }

    fn from_value(value: &Value) -> Option<Self> {
        let scheduled = value
            .get("scheduled")?
            .as_list()?
            .iter()
            .map(|s| {
                let delay = s.get("delay")?.as_f64()?;
                (delay.is_finite() && delay >= 0.0).then_some(())?;
                Some(ScheduledEffect {
                    delay,
                    module: s.get("module")?.as_str()?.to_string(),
                    event_type: s.get("event_type")?.as_str()?.to_string(),
                    priority: s.get("priority")?.as_f64()?,
                })
            })
            .collect::<Option<Vec<_>>>()?;
        let removed = value
            .get("removed")?
            .as_list()?
            .iter()
            .map(|n| n.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(EventEffects {
            objects: value.get("objects")?.as_map()?.clone(),
            removed,
            params: nested_from_value(value.get("params")?)?,
            modules: nested_from_value(value.get("modules")?)?,
            scheduled,
        })
    }
}

#[cfg(test)]
mod tests;
