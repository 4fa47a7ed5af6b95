use tessera::{
    priority, EngineConfig, EngineError, FnModule, ModuleDescriptor, Simulation,
    SimulationBuilder, Value,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("═══════════════════════════════════════════════════════");
    println!("  Tessera — Modular Discrete-Event Simulation");
    println!("  Load ordering + event cache + replay verification");
    println!("═══════════════════════════════════════════════════════");
    println!();

    let cache_dir = std::env::temp_dir().join("tessera-demo-cache");

    // ── Run 1: executes every event, fills the cache ──────────
    let run1 = run_simulation("Run 1", &cache_dir)?;

    // ── Run 2: identical inputs, effects come from the cache ──
    let run2 = run_simulation("Run 2", &cache_dir)?;

    // ── Verify ────────────────────────────────────────────────
    let hash1 = run1.completed().log_hash();
    let hash2 = run2.completed().log_hash();
    println!("  Verification:");
    println!("    Run 1 log hash: {:016x}", hash1);
    println!("    Run 2 log hash: {:016x}", hash2);
    if hash1 == hash2 && run1.state().object("total") == run2.state().object("total") {
        println!("    ✓ Runs are IDENTICAL — cached replay matches execution.");
    } else {
        println!("    ✗ MISMATCH — cached replay diverged!");
    }
    println!();
    Ok(())
}

fn run_simulation(label: &str, cache_dir: &std::path::Path) -> Result<Simulation, EngineError> {
    let gen = FnModule::new(ModuleDescriptor::new("gen").time_unit("day").output("map", "series"))
        .on("init", |state, _| {
            state.set_object("map", vec![1.0]);
            state.schedule_in(1.0, "day", "gen", "grow", priority::NORMAL)?;
            Ok(())
        })
        .on("grow", |state, _| {
            let mut map = state.require("map")?.as_series().unwrap_or(&[]).to_vec();
            map.push(map.len() as f64 + 1.0);
            state.set_object("map", map);
            state.schedule_in(1.0, "day", "gen", "grow", priority::NORMAL)?;
            Ok(())
        });

    let user = FnModule::new(
        ModuleDescriptor::new("use")
            .time_unit("week")
            .input("map", "series")
            .output("total", "float"),
    )
    .on("init", |state, _| {
        state.schedule_in(1.0, "week", "use", "sum", priority::LAST)?;
        Ok(())
    })
    .on("sum", |state, _| {
        let total: f64 = state.require("map")?.as_series().unwrap_or(&[]).iter().sum();
        state.set_object("total", total);
        Ok(())
    });

    let mut sim = SimulationBuilder::new()
        .register("gen", gen)
        .register("use", user)
        .modules(["use", "gen"])
        .times(0.0, 2.0, "week")
        .config(
            EngineConfig::default()
                .with_cache_path(cache_dir)
                .with_cached_module("gen"),
        )
        .build()?;

    for d in sim.diagnostics() {
        println!("    diagnostic: {}", d);
    }
    let summary = sim.run()?;

    println!(
        "  {}: load order {:?}, unit '{}', {} events ({} from cache), total = {}",
        label,
        sim.state().load_order(),
        sim.state().time_unit(),
        summary.events,
        summary.from_cache,
        sim.state()
            .object("total")
            .and_then(Value::as_f64)
            .unwrap_or(f64::NAN),
    );
    Ok(sim)
}
