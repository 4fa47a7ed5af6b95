/// Fluent builder for simulation setup.
///
/// Collects modules, times, parameter overrides, initial objects, paths,
/// object I/O tables and the engine configuration, then runs the
/// initialization phase in [`SimulationBuilder::build`]: group expansion,
/// load ordering, time-unit selection, parameter defaults and overrides,
/// contract diagnostics and seeding of one `init` event per module.

use indexmap::{IndexMap, IndexSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::deps::{dedupe, diagnose, expand_groups, resolve_load_order, DependencyGraph};
use crate::deps::{DiagnoseContext, Severity};
use crate::error::{EngineError, EngineResult};
use crate::event::priority;
use crate::module::builtin::load::LOAD_MODULE;
use crate::module::{ModuleDescriptor, ModuleRegistry, SimModule};
use crate::state::{InputSpec, OutputSpec, PathRole, SimState};
use crate::time::{unix_millis, SimTime};
use crate::units::{TimeUnitRegistry, DEFAULT_TIME_UNIT};
use crate::value::Value;

use super::{PlotHook, Simulation, INIT_EVENT};

// ── SimulationBuilder ─────────────────────────────────────────────────

/// Fluent builder for constructing a [`Simulation`].
///
/// Registration errors are held until [`build`](Self::build), so calls
/// chain without intermediate `?`.
///
/// # Example
/// ```rust
/// use tessera::engine::SimulationBuilder;
/// use tessera::module::{FnModule, ModuleDescriptor};
///
/// let gen = FnModule::new(ModuleDescriptor::new("gen").output("map", "series"))
///     .on("init", |state, _| {
///         state.set_object("map", vec![1.0, 2.0]);
///         Ok(())
///     });
///
/// let mut sim = SimulationBuilder::new()
///     .register("gen", gen)
///     .module("gen")
///     .times(0.0, 10.0, "year")
///     .build()
///     .unwrap();
/// sim.run().unwrap();
/// assert!(sim.state().has_object("map"));
/// ```
pub struct SimulationBuilder {
    registry: ModuleRegistry,
    modules: Vec<String>,
    start: f64,
    end: f64,
    times_unit: String,
    time_unit: Option<String>,
    units: TimeUnitRegistry,
    params: Vec<(String, String, Value)>,
    objects: IndexMap<String, Value>,
    paths: Vec<(PathRole, PathBuf)>,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    available_packages: Vec<String>,
    config: EngineConfig,
    plot_hook: Option<Arc<dyn PlotHook>>,
    pending_error: Option<EngineError>,
}

impl SimulationBuilder {
    /// Create a new builder. The clock runs from 0 to 10 seconds until
    /// [`times`](Self::times) says otherwise.
    pub fn new() -> Self {
        SimulationBuilder {
            registry: ModuleRegistry::new(),
            modules: Vec::new(),
            start: 0.0,
            end: 10.0,
            times_unit: DEFAULT_TIME_UNIT.to_string(),
            time_unit: None,
            units: TimeUnitRegistry::new(),
            params: Vec::new(),
            objects: IndexMap::new(),
            paths: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            available_packages: Vec::new(),
            config: EngineConfig::default(),
            plot_hook: None,
            pending_error: None,
        }
    }

    fn hold(&mut self, result: EngineResult<()>) {
        if let Err(e) = result {
            if self.pending_error.is_none() {
                self.pending_error = Some(e);
            }
        }
    }

    // ── Modules ───────────────────────────────────────────────

    /// Register a module under `key`.
    pub fn register(mut self, key: &str, module: impl SimModule + 'static) -> Self {
        let result = self.registry.register(key, module);
        self.hold(result);
        self
    }

    /// Register a module group from its descriptor.
    pub fn register_group(mut self, descriptor: ModuleDescriptor) -> Self {
        let result = self.registry.register_group(descriptor);
        self.hold(result);
        self
    }

    /// Use `registry` instead of the builder's own. Modules registered
    /// earlier on the builder are discarded.
    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Activate a registered module (or group). Order matters: it is the
    /// caller order used where dependencies leave the load order open.
    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.modules.push(name.into());
        self
    }

    pub fn modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules.extend(names.into_iter().map(Into::into));
        self
    }

    // ── Time ──────────────────────────────────────────────────

    /// Start and end time, both expressed in `unit`.
    pub fn times(mut self, start: f64, end: f64, unit: impl Into<String>) -> Self {
        self.start = start;
        self.end = end;
        self.times_unit = unit.into();
        self
    }

    /// Take part in the simulation time-unit choice as if a module declared
    /// `unit`. The finest declared unit wins.
    pub fn time_unit(mut self, unit: impl Into<String>) -> Self {
        self.time_unit = Some(unit.into());
        self
    }

    /// Register a user-defined time unit.
    pub fn register_unit(mut self, name: &str, seconds_per_unit: f64) -> Self {
        let result = self.units.register(name, seconds_per_unit);
        self.hold(result);
        self
    }

    // ── Data ──────────────────────────────────────────────────

    /// Override the default of parameter `name` of `module`.
    pub fn param(mut self, module: &str, name: &str, value: impl Into<Value>) -> Self {
        self.params
            .push((module.to_string(), name.to_string(), value.into()));
        self
    }

    /// Supply an object before the run starts.
    pub fn object(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.objects.insert(name.into(), value.into());
        self
    }

    pub fn path(mut self, role: PathRole, path: impl Into<PathBuf>) -> Self {
        self.paths.push((role, path.into()));
        self
    }

    /// Load `object` from `file` at `at` (requires the load module).
    pub fn input(mut self, object: impl Into<String>, file: impl Into<PathBuf>, at: SimTime) -> Self {
        self.inputs.push(InputSpec {
            object: object.into(),
            file: file.into(),
            load_time: at,
            loaded: false,
        });
        self
    }

    /// Save `object` to `file` at `at` (requires the save module).
    pub fn output(mut self, object: impl Into<String>, file: impl Into<PathBuf>, at: SimTime) -> Self {
        self.outputs.push(OutputSpec {
            object: object.into(),
            file: file.into(),
            save_time: at,
            saved: false,
        });
        self
    }

    /// Declare a package as present for the missing-package diagnostic.
    pub fn available_package(mut self, name: impl Into<String>) -> Self {
        self.available_packages.push(name.into());
        self
    }

    // ── Engine ────────────────────────────────────────────────

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plot_hook(mut self, hook: impl PlotHook + 'static) -> Self {
        self.plot_hook = Some(Arc::new(hook));
        self
    }

    // ── Build ─────────────────────────────────────────────────

    /// Run the initialization phase and return a simulation ready to run.
    ///
    /// Fails on registration errors, unknown modules, cyclic groups or
    /// package dependencies, unknown time units, and metadata errors (which
    /// name the offending module). Contract diagnostics are logged and
    /// kept on the simulation; they never fail the build.
    pub fn build(self) -> EngineResult<Simulation> {
        if let Some(err) = self.pending_error {
            return Err(err);
        }
        let config = self.config;

        let start = SimTime::from_unit(self.start, &self.times_unit, &self.units)?;
        let end = SimTime::from_unit(self.end, &self.times_unit, &self.units)?;
        if end < start {
            return Err(EngineError::Config(format!(
                "end time {} is before start time {}",
                end, start
            )));
        }

        let requested: Vec<ModuleDescriptor> =
            dedupe(&self.registry.descriptors_for(&self.modules)?)
                .into_iter()
                .map(|d| match d.name.as_str() {
                    LOAD_MODULE => with_loaded_outputs(d, &self.inputs),
                    _ => d,
                })
                .collect();
        let expanded = expand_groups(&requested, &self.registry)?;
        let load_order = resolve_load_order(&expanded)?;
        let mut by_name: IndexMap<String, ModuleDescriptor> = expanded
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        let descriptors: IndexMap<String, ModuleDescriptor> = load_order
            .iter()
            .filter_map(|name| by_name.shift_remove(name).map(|d| (name.clone(), d)))
            .collect();

        for d in descriptors.values() {
            check_metadata(d, &self.units)?;
        }
        let time_unit = self
            .units
            .min_unit(
                descriptors
                    .values()
                    .filter_map(|d| d.time_unit.as_deref())
                    .chain(self.time_unit.as_deref()),
            )?
            .unwrap_or_else(|| DEFAULT_TIME_UNIT.to_string());

        let mut state = SimState::new(start, end, time_unit)
            .with_seed(config.seed)
            .with_completed_capacity(config.completed_capacity)
            .with_units(self.units);

        for d in descriptors.values() {
            apply_parameters(&mut state, d, &self.params)?;
        }
        for (module, name, _) in &self.params {
            if !descriptors.contains_key(module) {
                warn!(module = %module, param = %name, "parameter override for a module that is not active");
            }
        }

        let mut supplied: IndexSet<String> = IndexSet::new();
        for (name, value) in self.objects {
            supplied.insert(name.clone());
            state.set_object(name, value);
        }
        for (role, path) in self.paths {
            state.set_path(role, path);
        }
        supplied.extend(self.inputs.iter().map(|row| row.object.clone()));
        state.inputs_mut().extend(self.inputs);
        state.outputs_mut().extend(self.outputs);

        let ordered: Vec<ModuleDescriptor> = descriptors.values().cloned().collect();
        state.set_dependencies(DependencyGraph::build(&ordered));
        state.set_load_order(load_order.clone());

        let diagnostics = diagnose(
            &ordered,
            &DiagnoseContext {
                supplied: supplied.clone(),
                available_packages: &self.available_packages,
                usage: None,
            },
        );
        for d in &diagnostics {
            match d.severity() {
                Severity::Warning => warn!(module = %d.module, "{}", d),
                Severity::Info => debug!(module = %d.module, "{}", d),
            }
        }

        for name in &load_order {
            state.schedule(start, name.as_str(), INIT_EVENT, priority::FIRST)?;
        }
        state.mark_started(unix_millis());

        let checkpoints =
            CheckpointManager::new(config.checkpoint.capacity, config.checkpoint.policy);
        let cache = if config.cache.enabled {
            let options = config.cache.digest.clone();
            Some(match &config.cache.path {
                Some(dir) => Cache::on_disk(dir, options.clone()).unwrap_or_else(|e| {
                    warn!(dir = %dir.display(), error = %e, "cannot open disk cache; using memory");
                    Cache::in_memory(options)
                }),
                None => Cache::in_memory(options),
            })
        } else {
            None
        };

        info!(
            modules = load_order.len(),
            time_unit = %state.time_unit(),
            start = %start,
            end = %end,
            "simulation initialized"
        );

        Ok(Simulation {
            state,
            registry: self.registry,
            descriptors,
            config,
            checkpoints,
            cache,
            diagnostics,
            supplied,
            available_packages: self.available_packages,
            plot_hook: self.plot_hook,
            events_processed: 0,
            events_from_cache: 0,
        })
    }
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract checks that need nothing but the descriptor and the unit table.
/// The load module produces every object of the inputs table, so modules
/// consuming those objects are ordered after it.
fn with_loaded_outputs(mut d: ModuleDescriptor, inputs: &[InputSpec]) -> ModuleDescriptor {
    for row in inputs {
        if !d.output_names().any(|name| name == row.object) {
            d = d.output(row.object.clone(), "input");
        }
    }
    d
}

fn check_metadata(d: &ModuleDescriptor, units: &TimeUnitRegistry) -> EngineResult<()> {
    let metadata = |message: String| EngineError::Metadata {
        module: d.name.clone(),
        message,
    };
    d.validate().map_err(metadata)?;
    if let Some(unit) = &d.time_unit {
        if !units.is_known(unit) {
            return Err(metadata(format!("unknown time unit '{}'", unit)));
        }
    }
    for p in &d.parameters {
        if !p.in_range(&p.default) {
            return Err(metadata(format!(
                "default of parameter '{}' is outside its declared range",
                p.name
            )));
        }
    }
    Ok(())
}

/// Defaults first, then caller overrides, range-checked.
fn apply_parameters(
    state: &mut SimState,
    d: &ModuleDescriptor,
    overrides: &[(String, String, Value)],
) -> EngineResult<()> {
    for p in &d.parameters {
        state.set_param(&d.name, &p.name, p.default.clone());
    }
    for (module, name, value) in overrides.iter().filter(|(m, _, _)| *m == d.name) {
        match d.param_spec(name) {
            Some(spec) if !spec.in_range(value) => {
                return Err(EngineError::ParameterOutOfRange {
                    module: module.clone(),
                    param: name.clone(),
                    value: value.as_f64().unwrap_or(f64::NAN),
                    min: spec.min.unwrap_or(f64::NEG_INFINITY),
                    max: spec.max.unwrap_or(f64::INFINITY),
                });
            }
            Some(_) => {}
            None => warn!(module = %module, param = %name, "override for an undeclared parameter"),
        }
        state.set_param(module, name, value.clone());
    }
    Ok(())
}
