//! End-to-end scenarios for the simulation loop.

use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_test::traced_test;

use crate::checkpoint::{self, CheckpointPolicy};
use crate::config::EngineConfig;
use crate::deps::DiagnosticKind;
use crate::error::{EngineError, ModuleError};
use crate::event::{priority, Event};
use crate::module::{
    FnModule, LoadModule, ModuleDescriptor, ModuleRegistry, ProgressModule, SaveModule,
};
use crate::state::{PathRole, SimState};
use crate::time::SimTime;
use crate::value::Value;

use super::{Simulation, SimulationBuilder};

fn secs(s: f64) -> SimTime {
    SimTime::from_secs(s)
}

/// Produces `map` at init and appends to it every second.
fn gen() -> FnModule {
    FnModule::new(ModuleDescriptor::new("gen").output("map", "series"))
        .on("init", |state, _| {
            state.set_object("map", vec![1.0]);
            state.schedule_after(1.0, "gen", "grow", priority::NORMAL)?;
            Ok(())
        })
        .on("grow", |state, _| {
            let mut map = state.require("map")?.as_series().unwrap_or(&[]).to_vec();
            map.push(map.len() as f64 + 1.0);
            state.set_object("map", map);
            state.schedule_after(1.0, "gen", "grow", priority::NORMAL)?;
            Ok(())
        })
}

/// Consumes `map` at init.
fn user() -> FnModule {
    FnModule::new(ModuleDescriptor::new("use").input("map", "series").output("total", "float"))
        .on("init", |state, _| {
            let total: f64 = state.require("map")?.as_series().unwrap_or(&[]).iter().sum();
            state.set_object("total", total);
            Ok(())
        })
}

fn gen_use() -> SimulationBuilder {
    SimulationBuilder::new()
        .register("gen", gen())
        .register("use", user())
        .modules(["use", "gen"])
        .times(0.0, 5.0, "second")
}

// ── Ordering ──────────────────────────────────────────────────────────

#[test]
fn test_producer_loads_before_consumer() {
    let mut sim = gen_use().build().unwrap();
    assert_eq!(sim.state().load_order(), ["gen".to_string(), "use".to_string()]);

    let first = sim.step().unwrap().unwrap();
    let second = sim.step().unwrap().unwrap();
    assert_eq!((first.module.as_str(), first.event_type.as_str()), ("gen", "init"));
    assert_eq!((second.module.as_str(), second.event_type.as_str()), ("use", "init"));
    assert_eq!(sim.state().object("total"), Some(&Value::Float(1.0)));
}

#[test]
fn test_priority_orders_same_instant() {
    let mut state = SimState::new(SimTime::ZERO, secs(1.0), "second");
    state.schedule(SimTime::ZERO, "use", "init", 2.0).unwrap();
    state.schedule(SimTime::ZERO, "gen", "init", 1.0).unwrap();
    assert_eq!(state.queue_mut().pop_next().unwrap().module, "gen");
    assert_eq!(state.queue_mut().pop_next().unwrap().module, "use");
}

#[test]
fn test_run_stops_at_end_time() {
    let mut sim = gen_use().build().unwrap();
    let summary = sim.run().unwrap();
    // two inits plus grows at 1..=5; the grow at 6 stays queued
    assert_eq!(summary.events, 7);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.time, secs(5.0));
    assert!(sim.is_finished());
    assert_eq!(
        sim.state().object("map").and_then(Value::as_series).map(<[f64]>::len),
        Some(6)
    );
    assert_eq!(sim.completed().len(), 7);
}

#[test]
fn test_run_until_then_resume() {
    let mut sim = gen_use().build().unwrap();
    let first = sim.run_until(secs(2.0)).unwrap();
    assert_eq!(first.events, 4);
    assert_eq!(sim.now(), secs(2.0));
    let rest = sim.run().unwrap();
    assert_eq!(rest.events, 3);

    let mut bounded = gen_use().build().unwrap();
    assert_eq!(bounded.run_for(3).unwrap().events, 3);
}

#[test]
fn test_group_expands_to_children() {
    let sim = SimulationBuilder::new()
        .register("gen", gen())
        .register("use", user())
        .register_group(ModuleDescriptor::new("bundle").child("use").child("gen"))
        .module("bundle")
        .build()
        .unwrap();
    assert_eq!(sim.state().load_order(), ["gen".to_string(), "use".to_string()]);
    assert!(sim.descriptors().all(|d| d.name != "bundle"));
}

// ── Setup errors ──────────────────────────────────────────────────────

#[test]
fn test_setup_errors() {
    let err = SimulationBuilder::new().register("other", gen()).build().unwrap_err();
    assert!(matches!(err, EngineError::NameMismatch { .. }));

    let err = SimulationBuilder::new().module("ghost").build().unwrap_err();
    assert!(matches!(err, EngineError::UnknownModule(name) if name == "ghost"));

    let err = SimulationBuilder::new()
        .register_group(ModuleDescriptor::new("g").child("h"))
        .register_group(ModuleDescriptor::new("h").child("g"))
        .module("g")
        .build()
        .unwrap_err();
    assert!(matches!(err, EngineError::CyclicModuleGroup { .. }));

    let odd_unit = FnModule::new(ModuleDescriptor::new("odd").time_unit("fortnight"));
    let err = SimulationBuilder::new()
        .register("odd", odd_unit)
        .module("odd")
        .build()
        .unwrap_err();
    assert!(matches!(err, EngineError::Metadata { module, .. } if module == "odd"));
}

#[test]
fn test_time_unit_is_finest_declared() {
    let yearly = FnModule::new(ModuleDescriptor::new("yearly").time_unit("year"));
    let daily = FnModule::new(ModuleDescriptor::new("daily").time_unit("day"));
    let sim = SimulationBuilder::new()
        .register("yearly", yearly.clone())
        .register("daily", daily)
        .modules(["yearly", "daily"])
        .build()
        .unwrap();
    assert_eq!(sim.state().time_unit(), "day");

    let sim = SimulationBuilder::new()
        .register("yearly", yearly)
        .module("yearly")
        .time_unit("hour")
        .build()
        .unwrap();
    assert_eq!(sim.state().time_unit(), "hour");
}

#[test]
fn test_parameter_defaults_overrides_and_range() {
    let fire = || FnModule::new(ModuleDescriptor::new("fire").bounded_param("rate", 0.5, 0.0, 1.0));

    let sim = SimulationBuilder::new()
        .register("fire", fire())
        .module("fire")
        .build()
        .unwrap();
    assert_eq!(sim.state().params_of("fire").unwrap()["rate"], Value::Float(0.5));

    let sim = SimulationBuilder::new()
        .register("fire", fire())
        .module("fire")
        .param("fire", "rate", 0.8)
        .build()
        .unwrap();
    assert_eq!(sim.state().params_of("fire").unwrap()["rate"], Value::Float(0.8));

    let err = SimulationBuilder::new()
        .register("fire", fire())
        .module("fire")
        .param("fire", "rate", 2.0)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ParameterOutOfRange { ref module, ref param, value, .. }
            if module == "fire" && param == "rate" && value == 2.0
    ));
}

// ── Conditional events ────────────────────────────────────────────────

#[test]
fn test_conditional_fires_once_during_run() {
    let watch = FnModule::new(ModuleDescriptor::new("watch").input("map", "series"))
        .on("init", |state, _| {
            state.schedule_conditional("watch", "alert", priority::NORMAL, |s| {
                s.objects()
                    .get("map")
                    .and_then(Value::as_series)
                    .map_or(false, |m| m.len() >= 3)
            });
            Ok(())
        })
        .on("alert", |state, _| {
            let alerts = state.module_state_mut("watch");
            let n = alerts.get("alerts").and_then(Value::as_i64).unwrap_or(0);
            alerts.insert("alerts".into(), Value::Int(n + 1));
            let now = state.now().as_secs();
            state.set_object("alerted_at", now);
            Ok(())
        });

    let mut sim = SimulationBuilder::new()
        .register("gen", gen())
        .register("watch", watch)
        .modules(["gen", "watch"])
        .times(0.0, 6.0, "second")
        .build()
        .unwrap();
    sim.run().unwrap();

    assert_eq!(sim.state().module_state("watch").unwrap()["alerts"], Value::Int(1));
    assert_eq!(sim.state().object("alerted_at"), Some(&Value::Float(2.0)));
    assert_eq!(sim.state().queue().conditional_len(), 0);
}

// ── Undefined event types ─────────────────────────────────────────────

fn odd() -> FnModule {
    FnModule::new(ModuleDescriptor::new("odd")).on("init", |state, _| {
        state.schedule_after(1.0, "odd", "mystery", priority::NORMAL)?;
        state.schedule_after(2.0, "odd", "init", priority::NORMAL)?;
        Ok(())
    })
}

#[test]
fn test_undefined_event_type_is_fatal_by_default() {
    let mut sim = SimulationBuilder::new()
        .register("odd", odd())
        .module("odd")
        .times(0.0, 1.5, "second")
        .build()
        .unwrap();
    let err = sim.run().unwrap_err();
    assert!(matches!(
        err,
        EngineError::UndefinedEventType { ref module, ref event_type }
            if module == "odd" && event_type == "mystery"
    ));
    // rolled back to just before the failing event
    assert_eq!(sim.state().queue().peek_next().unwrap().event_type, "mystery");
}

#[test]
#[traced_test]
fn test_undefined_event_type_skipped() {
    let mut sim = SimulationBuilder::new()
        .register("odd", odd())
        .module("odd")
        .times(0.0, 1.5, "second")
        .config(EngineConfig::default().with_skip_undefined_events(true))
        .build()
        .unwrap();
    let summary = sim.run().unwrap();
    assert_eq!(summary.events, 2);
    assert!(sim.completed().iter().all(|c| c.event.event_type != "mystery"));
    assert!(logs_contain("undefined event type; skipped"));
}

#[test]
fn test_undefined_event_type_fallback() {
    let mut registry = ModuleRegistry::new();
    registry.register("odd", odd()).unwrap();
    registry.set_fallback(|state, event| {
        state.set_object("fallback", event.event_type.as_str());
        Ok(())
    });
    let mut sim = SimulationBuilder::new()
        .registry(registry)
        .module("odd")
        .times(0.0, 1.5, "second")
        .build()
        .unwrap();
    sim.run().unwrap();
    assert_eq!(sim.state().object("fallback"), Some(&Value::from("mystery")));
    assert_eq!(sim.completed().len(), 2);
}

// ── Failure, rollback and restart ─────────────────────────────────────

fn flaky(failed: Arc<AtomicBool>) -> FnModule {
    FnModule::new(ModuleDescriptor::new("flaky").output("n", "int"))
        .on("init", |state, _| {
            state.set_object("n", 0);
            state.schedule_after(1.0, "flaky", "tick", priority::NORMAL)?;
            Ok(())
        })
        .on("tick", move |state, _| {
            let n = state.require("n")?.as_i64().unwrap_or(0) + 1;
            state.set_object("n", n);
            if n == 2 && !failed.swap(true, Ordering::SeqCst) {
                state.set_object("n", 999);
                return Err(ModuleError::Failed("disk full".into()));
            }
            state.schedule_after(1.0, "flaky", "tick", priority::NORMAL)?;
            Ok(())
        })
}

#[test]
fn test_failure_rolls_back_and_restart_resumes() {
    let mut sim = SimulationBuilder::new()
        .register("flaky", flaky(Arc::new(AtomicBool::new(false))))
        .module("flaky")
        .times(0.0, 5.0, "second")
        .build()
        .unwrap();

    let err = sim.run().unwrap_err();
    match err {
        EngineError::EventFailed {
            time,
            ref module,
            ref event_type,
            restored_from,
            ..
        } => {
            assert_eq!(time, secs(2.0));
            assert_eq!((module.as_str(), event_type.as_str()), ("flaky", "tick"));
            assert!(restored_from.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sim.state().object("n"), Some(&Value::Int(1)));
    assert_eq!(sim.now(), secs(1.0));
    assert_eq!(sim.completed().len(), 2);

    let summary = sim.restart().unwrap();
    assert_eq!(summary.events, 4);
    assert_eq!(sim.state().object("n"), Some(&Value::Int(5)));
    // every completed event ran exactly once
    let ticks = sim
        .completed()
        .iter()
        .filter(|c| c.event.event_type == "tick")
        .count();
    assert_eq!(ticks, 5);
}

#[test]
fn test_failure_without_rollback_keeps_state() {
    let mut sim = SimulationBuilder::new()
        .register("flaky", flaky(Arc::new(AtomicBool::new(false))))
        .module("flaky")
        .times(0.0, 5.0, "second")
        .config(EngineConfig::default().with_checkpoint_policy(CheckpointPolicy::Off))
        .build()
        .unwrap();
    let err = sim.run().unwrap_err();
    assert!(matches!(err, EngineError::EventFailed { restored_from: None, .. }));
    assert_eq!(sim.state().object("n"), Some(&Value::Int(999)));
    assert!(matches!(
        sim.restart().unwrap_err(),
        EngineError::Checkpoint(checkpoint::CheckpointError::Empty)
    ));
}

#[test]
fn test_persisted_checkpoint_restores() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latest.tsck");
    let config = EngineConfig::default()
        .with_checkpoint_policy(CheckpointPolicy::EveryEvents(2))
        .with_checkpoint_path(&path);
    let mut sim = gen_use().config(config).build().unwrap();
    sim.run().unwrap();

    let snapshot = checkpoint::load(&path).unwrap();
    assert_eq!(snapshot.events_processed, 6);
    let at = snapshot.sim_time;

    let mut fresh = gen_use().build().unwrap();
    fresh.restore_snapshot(snapshot).unwrap();
    assert_eq!(fresh.now(), at);
    assert_eq!(fresh.events_processed(), 6);
    assert_eq!(fresh.run().unwrap().events, 1);
}

// ── Event cache ───────────────────────────────────────────────────────

fn slow(calls: Arc<AtomicUsize>) -> FnModule {
    FnModule::new(
        ModuleDescriptor::new("slow")
            .param("rate", 1.5)
            .output("result", "float"),
    )
    .on("init", {
        let calls = calls.clone();
        move |state, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            let rate = state.param_f64("slow", "rate")?;
            state.set_object("result", rate * 2.0);
            state.schedule_after(1.0, "slow", "again", priority::NORMAL)?;
            Ok(())
        }
    })
    .on("again", move |state, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        let r = state.require_f64("result")?;
        state.set_object("result", r + 1.0);
        let steps = state.module_state_mut("slow");
        let n = steps.get("steps").and_then(Value::as_i64).unwrap_or(0);
        steps.insert("steps".into(), Value::Int(n + 1));
        state.schedule_after(1.0, "slow", "again", priority::NORMAL)?;
        Ok(())
    })
}

#[test]
#[traced_test]
fn test_event_cache_replays_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let build = || {
        SimulationBuilder::new()
            .register("slow", slow(calls.clone()))
            .module("slow")
            .times(0.0, 3.0, "second")
            .config(
                EngineConfig::default()
                    .with_cache_path(dir.path())
                    .with_cached_module("slow"),
            )
            .build()
            .unwrap()
    };

    let mut first = build();
    first.run().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(first.events_from_cache(), 0);

    let mut second = build();
    let summary = second.run().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(summary.from_cache, 4);
    assert!(second.completed().iter().all(|c| c.from_cache));
    assert_eq!(second.state().object("result"), first.state().object("result"));
    assert_eq!(
        second.state().module_state("slow"),
        first.state().module_state("slow")
    );
    assert_eq!(second.state().queue().len(), first.state().queue().len());
    logs_assert(|lines: &[&str]| {
        let at_info = |msg: &str| {
            lines
                .iter()
                .filter(|l| l.contains(" INFO ") && l.contains(msg))
                .count()
        };
        match (at_info("executed"), at_info("recovered from cache")) {
            (4, 4) => Ok(()),
            (e, r) => Err(format!("executed={} recovered={}", e, r)),
        }
    });
}

/// Removes its declared output, writes an undeclared object and tunes its
/// own parameter.
fn rewriter(calls: Arc<AtomicUsize>) -> FnModule {
    FnModule::new(ModuleDescriptor::new("m").output("result", "float"))
        .on("init", move |state, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            state.remove_object("result");
            state.set_object("aux", 7.0);
            state.set_param("m", "tuned", 3.0);
            Ok(())
        })
}

#[test]
fn test_event_cache_replays_removals_and_undeclared_writes() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let build = || {
        SimulationBuilder::new()
            .register("m", rewriter(calls.clone()))
            .module("m")
            .times(0.0, 1.0, "second")
            .object("result", 1.0)
            .config(
                EngineConfig::default()
                    .with_cache_path(dir.path())
                    .with_cached_module("m"),
            )
            .build()
            .unwrap()
    };

    let mut first = build();
    first.run().unwrap();
    let mut second = build();
    let summary = second.run().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.from_cache, 1);
    for sim in [&first, &second] {
        assert_eq!(sim.state().object("result"), None);
        assert_eq!(sim.state().object("aux"), Some(&Value::Float(7.0)));
        assert_eq!(
            sim.state().params_of("m").and_then(|p| p.get("tuned")),
            Some(&Value::Float(3.0))
        );
    }
}

#[test]
fn test_event_cache_keys_on_objects_named_like_stripped_fields() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let run = |stamp: f64| {
        let calls = calls.clone();
        let doubler = FnModule::new(
            ModuleDescriptor::new("dbl")
                .input("timestamp", "float")
                .output("out", "float"),
        )
        .on("init", move |state, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            let t = state.require_f64("timestamp")?;
            state.set_object("out", t * 2.0);
            Ok(())
        });
        let mut sim = SimulationBuilder::new()
            .register("dbl", doubler)
            .module("dbl")
            .times(0.0, 1.0, "second")
            .object("timestamp", stamp)
            .config(
                EngineConfig::default()
                    .with_cache_path(dir.path())
                    .with_cached_module("dbl"),
            )
            .build()
            .unwrap();
        sim.run().unwrap();
        sim
    };

    assert_eq!(run(1.0).state().object("out"), Some(&Value::Float(2.0)));
    let second = run(50.0);
    assert_eq!(second.state().object("out"), Some(&Value::Float(100.0)));
    assert_eq!(second.events_from_cache(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_uncached_modules_always_execute() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = EngineConfig::default().with_cache();
    for _ in 0..2 {
        let mut sim = SimulationBuilder::new()
            .register("slow", slow(calls.clone()))
            .module("slow")
            .times(0.0, 1.0, "second")
            .config(cache.clone())
            .build()
            .unwrap();
        sim.run().unwrap();
        assert_eq!(sim.events_from_cache(), 0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

// ── Plot hook ─────────────────────────────────────────────────────────

#[test]
fn test_plot_hook_sees_plot_events() {
    let painter = FnModule::new(ModuleDescriptor::new("painter"))
        .on("init", |state, _| {
            state.schedule_after(1.0, "painter", "plot", priority::LAST)?;
            state.schedule_after(2.0, "painter", "plot", priority::LAST)?;
            Ok(())
        })
        .on("plot", |_, _| Ok(()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let mut sim = SimulationBuilder::new()
        .register("painter", painter)
        .module("painter")
        .plot_hook(move |_: &SimState, e: &Event| sink.lock().unwrap().push(e.time))
        .build()
        .unwrap();
    sim.run().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![secs(1.0), secs(2.0)]);
}

// ── Determinism ───────────────────────────────────────────────────────

fn noise() -> FnModule {
    FnModule::new(ModuleDescriptor::new("noise").output("x", "float"))
        .on("init", |state, _| {
            state.schedule_after(0.0, "noise", "draw", priority::NORMAL)?;
            Ok(())
        })
        .on("draw", |state, _| {
            let x: f64 = state.rng().gen();
            let delay = state.rng().gen_range(0.5..2.0);
            state.set_object("x", x);
            state.schedule_after(delay, "noise", "draw", priority::NORMAL)?;
            Ok(())
        })
}

fn run_noise(seed: u64) -> Simulation {
    let mut sim = SimulationBuilder::new()
        .register("noise", noise())
        .module("noise")
        .times(0.0, 50.0, "second")
        .config(EngineConfig::default().with_seed(seed))
        .build()
        .unwrap();
    sim.run().unwrap();
    sim
}

#[test]
fn test_same_seed_replays_identically() {
    let a = run_noise(7);
    let b = run_noise(7);
    assert_eq!(a.completed().log_hash(), b.completed().log_hash());
    assert_eq!(a.state().object("x"), b.state().object("x"));

    let c = run_noise(8);
    assert_ne!(a.completed().log_hash(), c.completed().log_hash());
}

// ── Diagnostics ───────────────────────────────────────────────────────

#[test]
fn test_unmet_input_is_diagnosed_not_fatal() {
    let sim = SimulationBuilder::new()
        .register("use", user())
        .module("use")
        .build()
        .unwrap();
    assert!(sim.diagnostics().iter().any(|d| d.module == "use"
        && d.kind == DiagnosticKind::UnmetInputObject { object: "map".into() }));

    let supplied = SimulationBuilder::new()
        .register("use", user())
        .module("use")
        .object("map", vec![2.0, 3.0])
        .build()
        .unwrap();
    assert!(supplied
        .diagnostics()
        .iter()
        .all(|d| !matches!(d.kind, DiagnosticKind::UnmetInputObject { .. })));
}

#[test]
fn test_usage_diagnostics_after_run() {
    let sneaky = FnModule::new(
        ModuleDescriptor::new("sneaky")
            .param("unused", 1.0)
            .output("a", "int"),
    )
    .on("init", |state, _| {
        let secret = state.require("secret")?.clone();
        state.set_object("a", 1);
        state.set_object("b", secret);
        Ok(())
    });
    let mut sim = SimulationBuilder::new()
        .register("sneaky", sneaky)
        .module("sneaky")
        .object("secret", 42)
        .build()
        .unwrap();
    sim.run().unwrap();

    let kinds: Vec<DiagnosticKind> = sim
        .usage_diagnostics()
        .into_iter()
        .filter(|d| d.module == "sneaky")
        .map(|d| d.kind)
        .collect();
    assert!(kinds.contains(&DiagnosticKind::UndeclaredUse { object: "secret".into() }));
    assert!(kinds.contains(&DiagnosticKind::UndeclaredOutput { object: "b".into() }));
    assert!(kinds.contains(&DiagnosticKind::UnusedParameter { param: "unused".into() }));
    assert!(!kinds.contains(&DiagnosticKind::UndeclaredOutput { object: "a".into() }));
}

// ── Built-in modules ──────────────────────────────────────────────────

#[test]
fn test_builtin_progress_and_save() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = SimulationBuilder::new()
        .register(".progress", ProgressModule)
        .register(".save", SaveModule::default())
        .modules([".progress", ".save"])
        .times(0.0, 3.0, "second")
        .object("x", vec![1.0, 2.0])
        .path(PathRole::Outputs, dir.path())
        .output("x", "x.json", secs(2.0))
        .build()
        .unwrap();
    sim.run().unwrap();

    assert_eq!(
        sim.state().module_state(".progress").unwrap()["reports"],
        Value::Int(4)
    );
    assert!(sim.state().outputs()[0].saved);
    assert!(dir.path().join("x.json").exists());
}

#[test]
fn test_loaded_inputs_precede_their_consumers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("map.json"), r#"{"$series": [1.0, 2.0, 3.0]}"#).unwrap();
    let mut sim = SimulationBuilder::new()
        .register(".load", LoadModule::default())
        .register("use", user())
        .modules(["use", ".load"])
        .times(0.0, 1.0, "second")
        .path(PathRole::Inputs, dir.path())
        .input("map", "map.json", secs(0.0))
        .build()
        .unwrap();

    assert_eq!(sim.state().load_order(), [".load".to_string(), "use".to_string()]);
    assert!(sim
        .diagnostics()
        .iter()
        .all(|d| !matches!(d.kind, DiagnosticKind::UnmetInputObject { .. })));
    sim.run().unwrap();
    assert!(sim.state().inputs()[0].loaded);
    assert_eq!(sim.state().object("total"), Some(&Value::Float(6.0)));
}
