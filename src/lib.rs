//! # Tessera — Modular Discrete-Event Simulation Engine
//!
//! Advances a single state container through simulated time by repeatedly
//! executing the earliest scheduled event. Events belong to pluggable
//! modules that declare their parameters and input/output object contracts;
//! the engine orders module initialization from those contracts, memoizes
//! deterministic events by content digest, and checkpoints the state so a
//! failed run can be rolled back and restarted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  SimulationBuilder                    │ ← expand groups, resolve load order,
//! │  ┌─────────────────────────────────┐  │   init metadata, seed init events
//! │  │  Simulation                     │  │ ← execution loop
//! │  │  ┌───────────┐  ┌────────────┐  │  │
//! │  │  │ SimState  │  │ Registry   │  │  │ ← state container / module lookup
//! │  │  │ ┌───────┐ │  └────────────┘  │  │
//! │  │  │ │ Queue │ │  ┌────────────┐  │  │
//! │  │  │ └───────┘ │  │ Checkpoint │  │  │ ← bounded snapshot ring
//! │  │  │ ┌───────┐ │  └────────────┘  │  │
//! │  │  │ │ Units │ │  ┌────────────┐  │  │
//! │  │  │ └───────┘ │  │ Cache      │  │  │ ← digest-keyed memoization
//! │  │  └───────────┘  └────────────┘  │  │
//! │  └─────────────────────────────────┘  │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tessera::{priority, FnModule, ModuleDescriptor, SimulationBuilder};
//!
//! let gen = FnModule::new(ModuleDescriptor::new("gen").output("map", "series"))
//!     .on("init", |state, _| {
//!         state.set_object("map", vec![0.0]);
//!         state.schedule_after(1.0, "gen", "grow", priority::NORMAL)?;
//!         Ok(())
//!     })
//!     .on("grow", |state, _| {
//!         let mut map = state.require("map")?.as_series().unwrap_or(&[]).to_vec();
//!         map.push(state.now().as_secs());
//!         state.set_object("map", map);
//!         state.schedule_after(1.0, "gen", "grow", priority::NORMAL)?;
//!         Ok(())
//!     });
//!
//! let mut sim = SimulationBuilder::new()
//!     .register("gen", gen)
//!     .module("gen")
//!     .times(0.0, 3.0, "second")
//!     .build()
//!     .unwrap();
//! let summary = sim.run().unwrap();
//! assert_eq!(summary.events, 4);
//! ```

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod deps;
pub mod engine;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod io;
pub mod module;
pub mod scheduler;
pub mod state;
pub mod time;
pub mod units;
pub mod value;

// Re-exports for convenience.
pub use cache::{Cache, CacheFilter, DigestAlgorithm, DigestOptions, Granularity};
pub use checkpoint::{CheckpointManager, CheckpointPolicy, SnapshotId};
pub use config::EngineConfig;
pub use deps::{Diagnostic, DiagnosticKind};
pub use engine::{PlotHook, RunSummary, Simulation, SimulationBuilder};
pub use error::{EngineError, EngineResult, ModuleError};
pub use event::{priority, Event, EventId};
pub use eventlog::{CompletedEvent, CompletedLog};
pub use module::{FnModule, ModuleDescriptor, ModuleRegistry, SimModule};
pub use scheduler::EventQueue;
pub use state::{PathRole, SimState};
pub use time::SimTime;
pub use units::TimeUnitRegistry;
pub use value::Value;
